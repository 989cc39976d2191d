//! Runtime tunables for the refresher, forwarder, and traffic guards.
//!
//! Every struct deserializes with defaults so hosts can load partial configuration from
//! whatever source they use; [`GatewayConfig::validate`] rejects values that would disable a
//! safety mechanism outright.

// self
use crate::{
	_prelude::*,
	error::ConfigError,
	forward::RetryPolicy,
	guard::{CircuitBreakerConfig, RateLimitConfig},
};

/// Aggregate gateway configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
	/// Credential refresh settings.
	pub refresh: RefreshSettings,
	/// Forwarder retry policy.
	pub retry: RetryPolicy,
	/// Rate limiter configuration.
	pub rate_limit: RateLimitConfig,
	/// Circuit breaker configuration.
	pub circuit_breaker: CircuitBreakerConfig,
}
impl GatewayConfig {
	/// Validates every section.
	pub fn validate(&self) -> Result<(), ConfigError> {
		self.refresh.validate()?;
		self.retry.validate()?;
		self.rate_limit.validate()?;
		self.circuit_breaker.validate()?;

		Ok(())
	}
}

/// Credential refresher settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshSettings {
	/// Store entry holding the long-lived secret.
	pub secret_name: String,
	/// Seconds before expiry at which a credential is treated as stale.
	pub expiry_buffer_secs: u64,
	/// Seconds between background refresh ticks.
	pub background_interval_secs: u64,
	/// Seconds between progress log lines while waiting for device approval.
	pub progress_interval_secs: u64,
}
impl RefreshSettings {
	/// Default store entry name for the long-lived secret.
	pub const DEFAULT_SECRET_NAME: &'static str = "github_token";

	/// Expiry buffer as a signed duration.
	pub fn expiry_buffer(&self) -> Duration {
		Duration::seconds(i64::try_from(self.expiry_buffer_secs).unwrap_or(i64::MAX))
	}

	/// Background refresh period.
	pub fn background_interval(&self) -> StdDuration {
		StdDuration::from_secs(self.background_interval_secs)
	}

	/// Progress reporting period during device authorization.
	pub fn progress_interval(&self) -> StdDuration {
		StdDuration::from_secs(self.progress_interval_secs)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if crate::store::validate_name(&self.secret_name).is_err() {
			return Err(ConfigError::InvalidValue {
				field: "refresh.secret_name",
				reason: "must be a plain file name",
			});
		}
		if self.background_interval_secs == 0 {
			return Err(ConfigError::InvalidValue {
				field: "refresh.background_interval_secs",
				reason: "must be greater than zero",
			});
		}
		if self.progress_interval_secs == 0 {
			return Err(ConfigError::InvalidValue {
				field: "refresh.progress_interval_secs",
				reason: "must be greater than zero",
			});
		}

		Ok(())
	}
}
impl Default for RefreshSettings {
	fn default() -> Self {
		Self {
			secret_name: Self::DEFAULT_SECRET_NAME.into(),
			expiry_buffer_secs: 5 * 60,
			background_interval_secs: 25 * 60,
			progress_interval_secs: 5,
		}
	}
}
