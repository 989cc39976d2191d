//! Transport primitives shared by the credential flows and the forwarder.
//!
//! [`ReqwestHttpClient`] keeps shared HTTP behavior in one place; the free helpers turn raw
//! responses into gateway errors so every caller classifies upstream failures the same way.

// std
use std::ops::Deref;
// crates.io
use reqwest::{
	RequestBuilder, Response,
	header::{ACCEPT, HeaderMap, HeaderName, HeaderValue, USER_AGENT},
};
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	error::{ConfigError, TransportError, UpstreamError},
	provider::UpstreamQuirks,
};

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
///
/// Credential endpoints return results directly, so custom clients should disable redirect
/// following the same way [`ReqwestHttpClient::build`] does.
#[derive(Clone)]
pub struct ReqwestHttpClient(pub ReqwestClient);
impl ReqwestHttpClient {
	/// Connect timeout used by the gateway's own clients.
	pub const DEFAULT_CONNECT_TIMEOUT: StdDuration = StdDuration::from_secs(10);

	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Builds a client with redirects disabled and the provided connect timeout.
	pub fn build(connect_timeout: StdDuration) -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder()
			.redirect(reqwest::redirect::Policy::none())
			.connect_timeout(connect_timeout)
			.build()
			.map_err(ConfigError::http_client_build)?;

		Ok(Self(client))
	}
}
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
impl Debug for ReqwestHttpClient {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("ReqwestHttpClient(..)")
	}
}

/// Headers identifying the gateway as an editor integration.
pub(crate) fn editor_headers(quirks: &UpstreamQuirks) -> HeaderMap {
	let mut headers = HeaderMap::new();
	let mut insert = |name: HeaderName, value: &str| {
		if let Ok(value) = HeaderValue::from_str(value) {
			headers.insert(name, value);
		}
	};

	insert(HeaderName::from_static("editor-version"), &quirks.editor_version);
	insert(HeaderName::from_static("editor-plugin-version"), &quirks.editor_plugin_version);
	insert(USER_AGENT, &quirks.user_agent);

	headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

	headers
}

/// Sends a request, mapping transport failures to [`TransportError::Network`].
pub(crate) async fn send(endpoint: &'static str, request: RequestBuilder) -> Result<Response> {
	request.send().await.map_err(|e| TransportError::network(endpoint, e).into())
}

/// Fails with [`UpstreamError::Status`] when the response is not a success.
pub(crate) async fn ensure_success(endpoint: &'static str, response: Response) -> Result<Response> {
	let status = response.status();

	if status.is_success() {
		return Ok(response);
	}

	let body = response.text().await.map_err(|e| TransportError::stream(endpoint, e))?;

	Err(UpstreamError::status(status.as_u16(), &body).into())
}

/// Reads the full body and parses it with path-aware error reporting.
pub(crate) async fn read_json<T>(endpoint: &'static str, response: Response) -> Result<T>
where
	T: DeserializeOwned,
{
	let bytes = response.bytes().await.map_err(|e| TransportError::stream(endpoint, e))?;

	parse_json(&bytes)
}

/// Parses a JSON payload, reporting the failing field path.
pub(crate) fn parse_json<T>(bytes: &[u8]) -> Result<T>
where
	T: DeserializeOwned,
{
	let mut de = serde_json::Deserializer::from_slice(bytes);

	serde_path_to_error::deserialize(&mut de).map_err(|e| UpstreamError::parse(e).into())
}
