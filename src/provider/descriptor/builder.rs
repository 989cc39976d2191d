// self
use crate::{
	_prelude::*,
	provider::{UpstreamDescriptor, UpstreamEndpoints, UpstreamQuirks},
};

/// Errors raised while constructing or validating descriptors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum DescriptorError {
	/// A required endpoint was never configured.
	#[error("Missing {endpoint} endpoint.")]
	MissingEndpoint {
		/// Which endpoint is missing.
		endpoint: &'static str,
	},
	/// Endpoint URL could not be parsed.
	#[error("The {endpoint} endpoint is not a valid URL: {reason}.")]
	InvalidUrl {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Parser message.
		reason: String,
	},
	/// Endpoints must use HTTPS unless they point at a loopback host.
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// Client identifier must not be blank.
	#[error("Client identifier must not be empty.")]
	EmptyClientId,
}

/// Builder for [`UpstreamDescriptor`] values.
#[derive(Debug)]
pub struct UpstreamDescriptorBuilder {
	/// OAuth client identifier.
	pub client_id: String,
	/// Requested device-authorization scope.
	pub scope: String,
	/// Device-code endpoint.
	pub device_code_endpoint: Option<Url>,
	/// Device token polling endpoint.
	pub access_token_endpoint: Option<Url>,
	/// Access-credential exchange endpoint.
	pub copilot_token_endpoint: Option<Url>,
	/// Completion endpoint.
	pub completions_endpoint: Option<Url>,
	/// Client-identification quirks.
	pub quirks: UpstreamQuirks,
}
impl UpstreamDescriptorBuilder {
	/// Creates a new builder seeded with the provided client identifier.
	pub fn new(client_id: impl Into<String>) -> Self {
		Self {
			client_id: client_id.into(),
			scope: UpstreamDescriptor::DEFAULT_SCOPE.into(),
			device_code_endpoint: None,
			access_token_endpoint: None,
			copilot_token_endpoint: None,
			completions_endpoint: None,
			quirks: UpstreamQuirks::default(),
		}
	}

	/// Overrides the requested scope.
	pub fn scope(mut self, scope: impl Into<String>) -> Self {
		self.scope = scope.into();

		self
	}

	/// Sets the device-code endpoint.
	pub fn device_code_endpoint(mut self, url: Url) -> Self {
		self.device_code_endpoint = Some(url);

		self
	}

	/// Sets the device token polling endpoint.
	pub fn access_token_endpoint(mut self, url: Url) -> Self {
		self.access_token_endpoint = Some(url);

		self
	}

	/// Sets the access-credential exchange endpoint.
	pub fn copilot_token_endpoint(mut self, url: Url) -> Self {
		self.copilot_token_endpoint = Some(url);

		self
	}

	/// Sets the completion endpoint.
	pub fn completions_endpoint(mut self, url: Url) -> Self {
		self.completions_endpoint = Some(url);

		self
	}

	/// Overrides the client-identification quirks.
	pub fn quirks(mut self, quirks: UpstreamQuirks) -> Self {
		self.quirks = quirks;

		self
	}

	/// Consumes the builder and validates the resulting descriptor.
	pub fn build(self) -> Result<UpstreamDescriptor, DescriptorError> {
		let require = |endpoint: &'static str, url: Option<Url>| {
			url.ok_or(DescriptorError::MissingEndpoint { endpoint })
		};
		let endpoints = UpstreamEndpoints {
			device_code: require("device_code", self.device_code_endpoint)?,
			access_token: require("access_token", self.access_token_endpoint)?,
			copilot_token: require("copilot_token", self.copilot_token_endpoint)?,
			completions: require("completions", self.completions_endpoint)?,
		};
		let descriptor = UpstreamDescriptor {
			client_id: self.client_id,
			scope: self.scope,
			endpoints,
			quirks: self.quirks,
		};

		descriptor.validate()?;

		Ok(descriptor)
	}
}

impl UpstreamDescriptor {
	/// Validates invariants for the descriptor.
	fn validate(&self) -> Result<(), DescriptorError> {
		if self.client_id.trim().is_empty() {
			return Err(DescriptorError::EmptyClientId);
		}

		validate_endpoint("device_code", &self.endpoints.device_code)?;
		validate_endpoint("access_token", &self.endpoints.access_token)?;
		validate_endpoint("copilot_token", &self.endpoints.copilot_token)?;
		validate_endpoint("completions", &self.endpoints.completions)?;

		Ok(())
	}
}

fn validate_endpoint(name: &'static str, url: &Url) -> Result<(), DescriptorError> {
	match url.scheme() {
		"https" => Ok(()),
		"http" if is_loopback(url) => Ok(()),
		_ => Err(DescriptorError::InsecureEndpoint { endpoint: name, url: url.to_string() }),
	}
}

fn is_loopback(url: &Url) -> bool {
	match url.host() {
		Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
		Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
		Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
		None => false,
	}
}
