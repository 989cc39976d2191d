//! Bounded exponential backoff for completion attempts.

// self
use crate::{_prelude::*, error::ConfigError};

/// Retry budget applied to one logical completion request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
	/// Total attempts, including the first.
	pub max_attempts: u32,
	/// Delay after the first failed attempt, in milliseconds.
	pub base_delay_ms: u64,
	/// Upper bound on any single delay, in milliseconds.
	pub max_delay_ms: u64,
}
impl RetryPolicy {
	/// Delay to wait after failed attempt number `attempt` (1-based):
	/// `min(base * 2^(attempt - 1), max)`.
	pub fn delay_for(&self, attempt: u32) -> StdDuration {
		let exponent = attempt.saturating_sub(1).min(63);
		let factor = 1_u64 << exponent;
		let millis = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);

		StdDuration::from_millis(millis)
	}

	pub(crate) fn validate(&self) -> Result<(), ConfigError> {
		if self.max_attempts == 0 {
			return Err(ConfigError::InvalidValue {
				field: "retry.max_attempts",
				reason: "must be greater than zero",
			});
		}
		if self.max_delay_ms < self.base_delay_ms {
			return Err(ConfigError::InvalidValue {
				field: "retry.max_delay_ms",
				reason: "must not be smaller than retry.base_delay_ms",
			});
		}

		Ok(())
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self { max_attempts: 3, base_delay_ms: 1_000, max_delay_ms: 5_000 }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn delays_double_then_cap() {
		let policy = RetryPolicy::default();
		let delays = (1..=5).map(|n| policy.delay_for(n).as_millis()).collect::<Vec<_>>();

		assert_eq!(delays, vec![1_000, 2_000, 4_000, 5_000, 5_000]);
		assert_eq!(policy.delay_for(200), StdDuration::from_millis(5_000));
	}

	#[test]
	fn zero_attempts_are_rejected() {
		let policy = RetryPolicy { max_attempts: 0, ..Default::default() };

		assert!(policy.validate().is_err());
	}
}
