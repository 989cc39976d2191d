//! Copilot completion gateway core: device-flow login, single-flight token refresh, resilient
//! SSE forwarding, and traffic guards in one crate built for production.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod config;
pub mod error;
pub mod flows;
pub mod forward;
pub mod gateway;
pub mod guard;
pub mod http;
pub mod obs;
pub mod provider;
pub mod store;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		auth::AccessCredential,
		config::RefreshSettings,
		flows::{DeviceAuthorizationSession, DevicePrompt, Refresher},
		http::ReqwestHttpClient,
		provider::UpstreamDescriptor,
		store::{MemoryStore, SecretStore},
	};

	/// Client identifier used by the mock upstream in integration tests.
	pub const TEST_CLIENT_ID: &str = "Iv1.test-client";

	/// Builds a reqwest HTTP client suitable for talking to `httpmock` servers.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Builds a descriptor whose endpoints all point at the provided mock server base URL.
	pub fn test_descriptor(base: &str) -> UpstreamDescriptor {
		let url = |path: &str| {
			Url::parse(&format!("{base}{path}")).expect("Failed to parse mock upstream URL.")
		};

		UpstreamDescriptor::builder(TEST_CLIENT_ID)
			.device_code_endpoint(url("/login/device/code"))
			.access_token_endpoint(url("/login/oauth/access_token"))
			.copilot_token_endpoint(url("/copilot_internal/v2/token"))
			.completions_endpoint(url("/v1/engines/copilot-codex/completions"))
			.build()
			.expect("Mock upstream descriptor should build successfully.")
	}

	/// Device prompt that records every session it is shown.
	#[derive(Debug, Default)]
	pub struct RecordingPrompt {
		shown: Mutex<Vec<String>>,
	}
	impl RecordingPrompt {
		/// Returns the user codes displayed so far.
		pub fn user_codes(&self) -> Vec<String> {
			self.shown.lock().clone()
		}
	}
	impl DevicePrompt for RecordingPrompt {
		fn show(&self, session: &DeviceAuthorizationSession) {
			self.shown.lock().push(session.user_code.clone());
		}
	}

	/// Renders an upstream SSE body carrying one fragment per text, terminated by `[DONE]`.
	pub fn sse_body(texts: &[&str]) -> String {
		let mut body = texts
			.iter()
			.map(|text| format!("data: {}\n\n", serde_json::json!({ "choices": [{ "text": text }] })))
			.collect::<String>();

		body.push_str("data: [DONE]\n\n");

		body
	}

	/// Builds an access credential that stays valid for half an hour.
	pub fn test_credential(token: &str) -> AccessCredential {
		AccessCredential::from_exchange(token, Some(1_800), OffsetDateTime::now_utc())
	}

	/// Constructs a [`Refresher`] backed by an in-memory store and a recording prompt.
	pub fn build_test_refresher(
		base: &str,
	) -> (Refresher, Arc<MemoryStore>, Arc<RecordingPrompt>) {
		let store_backend = Arc::new(MemoryStore::default());
		let store: Arc<dyn SecretStore> = store_backend.clone();
		let prompt = Arc::new(RecordingPrompt::default());
		let refresher = Refresher::with_http_client(
			test_descriptor(base),
			RefreshSettings::default(),
			store,
			test_reqwest_http_client(),
		)
		.with_prompt(prompt.clone());

		(refresher, store_backend, prompt)
	}
}

mod _prelude {
	pub use std::{
		collections::{HashMap, VecDeque},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
		time::Duration as StdDuration,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError, StatusCode};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use url;
#[cfg(test)] use httpmock as _;
