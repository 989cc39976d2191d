//! Sliding-window rate limiter with a one-second burst cap.

// crates.io
use tokio::time::Instant;
// self
use crate::{_prelude::*, error::ConfigError};

const WINDOW: StdDuration = StdDuration::from_secs(60);
const BURST_WINDOW: StdDuration = StdDuration::from_secs(1);

/// Rate limiter tunables.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
	/// Admissions allowed in any trailing 60-second window.
	pub requests_per_minute: u32,
	/// Admissions allowed in any trailing 1-second window.
	pub burst_size: u32,
}
impl RateLimitConfig {
	pub(crate) fn validate(&self) -> Result<(), ConfigError> {
		if self.requests_per_minute == 0 {
			return Err(ConfigError::InvalidValue {
				field: "rate_limit.requests_per_minute",
				reason: "must be greater than zero",
			});
		}
		if self.burst_size == 0 {
			return Err(ConfigError::InvalidValue {
				field: "rate_limit.burst_size",
				reason: "must be greater than zero",
			});
		}

		Ok(())
	}
}
impl Default for RateLimitConfig {
	fn default() -> Self {
		Self { requests_per_minute: 50, burst_size: 10 }
	}
}

/// Non-blocking admission check over a sliding window of admitted calls.
#[derive(Debug)]
pub struct RateLimiter {
	config: RateLimitConfig,
	window: Mutex<VecDeque<Instant>>,
}
impl RateLimiter {
	/// Creates an empty limiter.
	pub fn new(config: RateLimitConfig) -> Self {
		Self { config, window: Mutex::new(VecDeque::new()) }
	}

	/// Returns `true` and records the call when it fits both windows.
	///
	/// Rejected calls are not recorded, so a rejected burst does not extend the penalty.
	pub fn acquire(&self) -> bool {
		let now = Instant::now();
		let mut window = self.window.lock();

		while window.front().is_some_and(|admitted| now.duration_since(*admitted) >= WINDOW) {
			window.pop_front();
		}

		if window.len() >= self.config.requests_per_minute as usize {
			return false;
		}

		let recent = window
			.iter()
			.rev()
			.take_while(|admitted| now.duration_since(**admitted) < BURST_WINDOW)
			.count();

		if recent >= self.config.burst_size as usize {
			return false;
		}

		window.push_back(now);

		true
	}

	/// Calls currently counted against the 60-second window.
	pub fn in_window(&self) -> usize {
		let now = Instant::now();

		self.window.lock().iter().filter(|admitted| now.duration_since(**admitted) < WINDOW).count()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use tokio::time;
	// self
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn burst_cap_rejects_the_eleventh_call_within_a_second() {
		let limiter = RateLimiter::new(RateLimitConfig { requests_per_minute: 50, burst_size: 10 });

		for _ in 0..10 {
			assert!(limiter.acquire());
		}

		assert!(!limiter.acquire());

		time::advance(StdDuration::from_millis(1_001)).await;

		assert!(limiter.acquire());
	}

	#[tokio::test(start_paused = true)]
	async fn window_rolls_after_sixty_seconds() {
		let limiter = RateLimiter::new(RateLimitConfig { requests_per_minute: 5, burst_size: 5 });

		for _ in 0..5 {
			assert!(limiter.acquire());
		}

		time::advance(StdDuration::from_secs(30)).await;

		assert!(!limiter.acquire());
		assert_eq!(limiter.in_window(), 5);

		time::advance(StdDuration::from_secs(30)).await;

		assert_eq!(limiter.in_window(), 0);
		assert!(limiter.acquire());
	}

	#[tokio::test(start_paused = true)]
	async fn rejected_calls_are_not_recorded() {
		let limiter = RateLimiter::new(RateLimitConfig { requests_per_minute: 2, burst_size: 2 });

		assert!(limiter.acquire());
		assert!(limiter.acquire());

		for _ in 0..10 {
			assert!(!limiter.acquire());
		}

		assert_eq!(limiter.in_window(), 2);
	}
}
