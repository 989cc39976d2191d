//! Upstream descriptor data structures shared by the credential flows and the forwarder.
//!
//! The module exposes validated endpoint metadata, supporting builder utilities, and
//! client quirks (editor identification headers) so every outbound call is described in a
//! transport-agnostic way.

/// Builder API for assembling upstream descriptors.
pub mod builder;
/// Client-identification quirks sent with upstream calls.
pub mod quirks;

pub use builder::*;
pub use quirks::*;

// self
use crate::_prelude::*;

/// Endpoint set used by the gateway.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamEndpoints {
	/// Device-code endpoint that starts device authorization.
	pub device_code: Url,
	/// Token endpoint polled while the user approves the device.
	pub access_token: Url,
	/// Endpoint exchanging the long-lived secret for an access credential.
	pub copilot_token: Url,
	/// Completion endpoint that streams SSE fragments.
	pub completions: Url,
}

/// Immutable upstream descriptor consumed by flows and the forwarder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamDescriptor {
	/// OAuth client identifier used during device authorization.
	pub client_id: String,
	/// Scope requested during device authorization.
	pub scope: String,
	/// Endpoint definitions.
	pub endpoints: UpstreamEndpoints,
	/// Client-identification quirks.
	pub quirks: UpstreamQuirks,
}
impl UpstreamDescriptor {
	/// Public client identifier of the editor integration.
	pub const GITHUB_CLIENT_ID: &'static str = "Iv1.b507a08c87ecfe98";
	/// Scope requested by default.
	pub const DEFAULT_SCOPE: &'static str = "read:user";

	/// Creates a new builder for the provided client identifier.
	pub fn builder(client_id: impl Into<String>) -> UpstreamDescriptorBuilder {
		UpstreamDescriptorBuilder::new(client_id)
	}

	/// Returns the production GitHub + Copilot endpoints.
	pub fn github_copilot() -> Result<Self, DescriptorError> {
		let parse = |endpoint: &'static str, raw: &str| {
			Url::parse(raw)
				.map_err(|e| DescriptorError::InvalidUrl { endpoint, reason: e.to_string() })
		};

		Self::builder(Self::GITHUB_CLIENT_ID)
			.device_code_endpoint(parse("device_code", "https://github.com/login/device/code")?)
			.access_token_endpoint(parse(
				"access_token",
				"https://github.com/login/oauth/access_token",
			)?)
			.copilot_token_endpoint(parse(
				"copilot_token",
				"https://api.github.com/copilot_internal/v2/token",
			)?)
			.completions_endpoint(parse(
				"completions",
				"https://copilot-proxy.githubusercontent.com/v1/engines/copilot-codex/completions",
			)?)
			.build()
	}
}
