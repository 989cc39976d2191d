//! Gateway-level error types shared across flows, forwarders, guards, and stores.

// self
use crate::_prelude::*;

/// Gateway-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type SharedError = Arc<dyn StdError + Send + Sync>;

/// Canonical gateway error exposed by public APIs.
///
/// Errors are cheap to clone so every caller waiting on a coalesced refresh observes the same
/// failure.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Credential acquisition or validation failed.
	#[error(transparent)]
	Authentication(#[from] AuthError),
	/// Upstream returned an unusable response.
	#[error(transparent)]
	Upstream(#[from] UpstreamError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Caller supplied malformed input; never retried.
	#[error("Request is invalid: {reason}.")]
	Validation {
		/// Human-readable reason.
		reason: String,
	},
	/// Rate limiter rejected the call.
	#[error("Rate limit exceeded; retry later.")]
	RateLimited,
	/// Circuit breaker is open or the half-open probe budget is exhausted.
	#[error("Upstream is temporarily unavailable; circuit is open.")]
	CircuitOpen,
}
impl Error {
	/// Builds a validation error from any displayable reason.
	pub fn validation(reason: impl Into<String>) -> Self {
		Self::Validation { reason: reason.into() }
	}

	/// Stable machine-readable error code.
	pub fn code(&self) -> &'static str {
		match self {
			Self::Storage(_) => "storage_error",
			Self::Config(_) => "configuration_error",
			Self::Authentication(_) => "authentication_error",
			Self::Upstream(UpstreamError::CompletionFailed { .. }) => "completion_failed",
			Self::Upstream(_) => "upstream_error",
			Self::Transport(_) => "transport_error",
			Self::Validation { .. } => "invalid_request",
			Self::RateLimited => "rate_limit_exceeded",
			Self::CircuitOpen => "service_unavailable",
		}
	}

	/// HTTP-equivalent status for the outward envelope.
	pub fn status(&self) -> u16 {
		match self {
			Self::Storage(_) | Self::Config(_) => 500,
			Self::Authentication(_) => 401,
			Self::Upstream(UpstreamError::CompletionFailed { .. }) => 500,
			Self::Upstream(_) | Self::Transport(_) => 502,
			Self::Validation { .. } => 400,
			Self::RateLimited => 429,
			Self::CircuitOpen => 503,
		}
	}

	/// Returns `true` when the upstream rejected the access credential (HTTP 401).
	pub fn is_unauthorized(&self) -> bool {
		matches!(self, Self::Upstream(UpstreamError::Status { status: 401, .. }))
	}

	/// Returns `true` when the error should count against the circuit breaker.
	pub fn counts_as_failure(&self) -> bool {
		!matches!(self, Self::Validation { .. } | Self::RateLimited | Self::CircuitOpen)
	}

	/// Renders the redacted envelope body handed to the response builder.
	pub fn to_body(&self) -> ErrorBody {
		ErrorBody { code: self.code(), status: self.status(), message: self.to_string() }
	}
}

/// Serializable error payload consumed by the outward response-envelope builder.
///
/// The message is the error's `Display` output, which never embeds secrets or tokens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
	/// Stable error code.
	pub code: &'static str,
	/// HTTP-equivalent status.
	pub status: u16,
	/// Human-readable message.
	pub message: String,
}

/// Credential failures: device authorization outcomes and rejected secrets.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum AuthError {
	/// Device-code endpoint did not issue a session.
	#[error("Device code request failed with HTTP {status}.")]
	DeviceCodeRequest {
		/// HTTP status returned by the device-code endpoint.
		status: u16,
	},
	/// User or provider denied the device authorization.
	#[error("Device authorization was denied: {error}{}.", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
	Denied {
		/// OAuth error code returned while polling.
		error: String,
		/// Optional provider description.
		description: Option<String>,
	},
	/// Device authorization session expired before the user approved it.
	#[error("Device authorization timed out after {waited_secs} seconds.")]
	Expired {
		/// Seconds spent polling.
		waited_secs: u64,
	},
	/// Upstream rejected the long-lived secret or the exchange failed.
	#[error("Credential exchange failed: {reason}.")]
	Rejected {
		/// Provider- or gateway-supplied reason string.
		reason: String,
	},
}

/// Upstream response failures.
#[derive(Clone, Debug, ThisError)]
pub enum UpstreamError {
	/// Upstream answered with a non-success HTTP status.
	#[error("Upstream returned HTTP {status}{}.", .preview.as_deref().map(|p| format!(": {p}")).unwrap_or_default())]
	Status {
		/// HTTP status code.
		status: u16,
		/// Truncated body preview.
		preview: Option<String>,
	},
	/// Upstream responded with JSON that could not be parsed.
	#[error("Upstream returned malformed JSON at `{path}`.")]
	Parse {
		/// Path of the field that failed to parse.
		path: String,
		/// Structured parsing failure.
		#[source]
		source: SharedError,
	},
	/// Retries were exhausted while forwarding a completion.
	#[error("Completion failed after {attempts} attempt(s): {last}")]
	CompletionFailed {
		/// Attempts performed.
		attempts: u32,
		/// Last observed failure.
		#[source]
		last: Box<Error>,
	},
}
impl UpstreamError {
	const PREVIEW_LIMIT: usize = 256;

	/// Builds a status failure, keeping only a bounded body preview.
	pub fn status(status: u16, body: &str) -> Self {
		let body = body.trim();
		let preview = if body.is_empty() {
			None
		} else if body.chars().count() <= Self::PREVIEW_LIMIT {
			Some(body.to_owned())
		} else {
			let mut buf = body.chars().take(Self::PREVIEW_LIMIT).collect::<String>();

			buf.push('…');

			Some(buf)
		};

		Self::Status { status, preview }
	}

	/// Wraps a `serde_path_to_error` failure.
	pub fn parse(err: serde_path_to_error::Error<serde_json::Error>) -> Self {
		Self::Parse { path: err.path().to_string(), source: Arc::new(err.into_inner()) }
	}
}

/// Configuration and validation failures raised by the gateway.
#[derive(Clone, Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: SharedError,
	},
	/// Descriptor failed validation.
	#[error(transparent)]
	Descriptor(#[from] crate::provider::DescriptorError),
	/// A tunable was outside its accepted range.
	#[error("Configuration value `{field}` is invalid: {reason}.")]
	InvalidValue {
		/// Offending field.
		field: &'static str,
		/// Why the value was rejected.
		reason: &'static str,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::HttpClientBuild { source: Arc::new(src) }
	}
}

/// Transport-level failures (network, IO).
#[derive(Clone, Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling {endpoint}.")]
	Network {
		/// Logical endpoint label.
		endpoint: &'static str,
		/// Transport-specific network error.
		#[source]
		source: SharedError,
	},
	/// Upstream stream ended with a read failure.
	#[error("Stream from {endpoint} was interrupted.")]
	Stream {
		/// Logical endpoint label.
		endpoint: &'static str,
		/// Transport-specific read error.
		#[source]
		source: SharedError,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(endpoint: &'static str, src: ReqwestError) -> Self {
		Self::Network { endpoint, source: Arc::new(src.without_url()) }
	}

	/// Wraps a body read failure.
	pub fn stream(endpoint: &'static str, src: ReqwestError) -> Self {
		Self::Stream { endpoint, source: Arc::new(src.without_url()) }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn codes_and_statuses_follow_the_taxonomy() {
		let cases = [
			(Error::validation("empty prompt"), "invalid_request", 400),
			(
				Error::from(AuthError::Expired { waited_secs: 900 }),
				"authentication_error",
				401,
			),
			(Error::RateLimited, "rate_limit_exceeded", 429),
			(Error::CircuitOpen, "service_unavailable", 503),
			(Error::from(UpstreamError::status(500, "boom")), "upstream_error", 502),
		];

		for (err, code, status) in cases {
			assert_eq!(err.code(), code);
			assert_eq!(err.status(), status);
		}
	}

	#[test]
	fn completion_failure_wraps_the_last_error() {
		let last = Error::from(UpstreamError::status(503, "overloaded"));
		let err = Error::from(UpstreamError::CompletionFailed { attempts: 3, last: Box::new(last) });

		assert_eq!(err.code(), "completion_failed");
		assert_eq!(err.status(), 500);
		assert!(err.to_string().contains("3 attempt(s)"));
		assert!(err.to_string().contains("HTTP 503"));
	}

	#[test]
	fn status_preview_is_bounded() {
		let body = "x".repeat(1_000);
		let UpstreamError::Status { preview, .. } = UpstreamError::status(500, &body) else {
			panic!("Status constructor should build a status variant.");
		};
		let preview = preview.expect("Non-empty bodies should keep a preview.");

		assert_eq!(preview.chars().count(), UpstreamError::PREVIEW_LIMIT + 1);
		assert!(preview.ends_with('…'));
	}

	#[test]
	fn only_http_401_is_unauthorized() {
		assert!(Error::from(UpstreamError::status(401, "")).is_unauthorized());
		assert!(!Error::from(UpstreamError::status(403, "")).is_unauthorized());
		assert!(!Error::from(AuthError::Rejected { reason: "nope".into() }).is_unauthorized());
	}

	#[test]
	fn denied_message_includes_description() {
		let err = AuthError::Denied {
			error: "access_denied".into(),
			description: Some("user cancelled".into()),
		};

		assert_eq!(
			err.to_string(),
			"Device authorization was denied: access_denied (user cancelled)."
		);
	}
}
