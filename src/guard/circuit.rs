//! Closed/open/half-open circuit breaker with lazy reopen deadlines.

// std
use std::ops::Deref;
// crates.io
use tokio::time::Instant;
// self
use crate::{_prelude::*, error::ConfigError};

/// Circuit breaker tunables.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
	/// Consecutive failures that trip the circuit.
	pub failure_threshold: u32,
	/// Milliseconds the circuit stays open before admitting a probe.
	pub reset_timeout_ms: u64,
	/// Probe calls admitted while half-open.
	pub half_open_max_calls: u32,
}
impl CircuitBreakerConfig {
	/// Open-state cooldown.
	pub fn reset_timeout(&self) -> StdDuration {
		StdDuration::from_millis(self.reset_timeout_ms)
	}

	pub(crate) fn validate(&self) -> Result<(), ConfigError> {
		if self.failure_threshold == 0 {
			return Err(ConfigError::InvalidValue {
				field: "circuit_breaker.failure_threshold",
				reason: "must be greater than zero",
			});
		}
		if self.half_open_max_calls == 0 {
			return Err(ConfigError::InvalidValue {
				field: "circuit_breaker.half_open_max_calls",
				reason: "must be greater than zero",
			});
		}

		Ok(())
	}
}
impl Default for CircuitBreakerConfig {
	fn default() -> Self {
		Self { failure_threshold: 5, reset_timeout_ms: 60_000, half_open_max_calls: 1 }
	}
}

/// Breaker state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
	/// Calls flow normally.
	Closed,
	/// Calls are rejected until the reopen deadline.
	Open,
	/// A bounded number of probe calls test recovery.
	HalfOpen,
}

/// Point-in-time breaker statistics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CircuitStats {
	/// Current state.
	pub state: CircuitState,
	/// Failures since the last success.
	pub consecutive_failures: u32,
	/// Calls admitted to the wrapped operation.
	pub admitted: u64,
	/// Calls rejected without running the operation.
	pub rejected: u64,
	/// Admitted calls that failed.
	pub failures: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Admission {
	Normal,
	Probe,
}

#[derive(Debug)]
struct Inner {
	state: CircuitState,
	consecutive_failures: u32,
	reopen_at: Option<Instant>,
	probes_in_flight: u32,
	admitted: u64,
	rejected: u64,
	failures: u64,
}
impl Inner {
	fn closed() -> Self {
		Self {
			state: CircuitState::Closed,
			consecutive_failures: 0,
			reopen_at: None,
			probes_in_flight: 0,
			admitted: 0,
			rejected: 0,
			failures: 0,
		}
	}

	// Moves Open to HalfOpen once the deadline has passed.
	fn observe(&mut self, now: Instant) {
		if self.state == CircuitState::Open && self.reopen_at.is_some_and(|at| now >= at) {
			tracing::info!("Circuit breaker half-open; admitting probe calls.");

			self.state = CircuitState::HalfOpen;
			self.reopen_at = None;
			self.probes_in_flight = 0;
		}
	}

	fn trip(&mut self, now: Instant, timeout: StdDuration) {
		tracing::warn!(
			consecutive_failures = self.consecutive_failures,
			reset_timeout_ms = timeout.as_millis() as u64,
			"Circuit breaker opened."
		);

		self.state = CircuitState::Open;
		self.reopen_at = Some(now + timeout);
		self.probes_in_flight = 0;
	}
}

/// Circuit breaker shared by every request through the forwarder.
#[derive(Debug)]
pub struct CircuitBreaker {
	config: CircuitBreakerConfig,
	inner: Mutex<Inner>,
}
impl CircuitBreaker {
	/// Creates a closed breaker.
	pub fn new(config: CircuitBreakerConfig) -> Self {
		Self { config, inner: Mutex::new(Inner::closed()) }
	}

	/// Current state, applying any elapsed reopen deadline.
	pub fn state(&self) -> CircuitState {
		let mut inner = self.inner.lock();

		inner.observe(Instant::now());

		inner.state
	}

	/// Current statistics, applying any elapsed reopen deadline.
	pub fn stats(&self) -> CircuitStats {
		let mut inner = self.inner.lock();

		inner.observe(Instant::now());

		CircuitStats {
			state: inner.state,
			consecutive_failures: inner.consecutive_failures,
			admitted: inner.admitted,
			rejected: inner.rejected,
			failures: inner.failures,
		}
	}

	/// Forces the breaker closed and clears the failure counter.
	pub fn reset(&self) {
		let mut inner = self.inner.lock();

		inner.state = CircuitState::Closed;
		inner.consecutive_failures = 0;
		inner.reopen_at = None;
		inner.probes_in_flight = 0;
	}

	/// Runs `op` when the breaker admits the call, recording its outcome.
	///
	/// Rejections fail with [`Error::CircuitOpen`] without invoking `op`. Errors for which
	/// [`Error::counts_as_failure`] is `false` leave the failure counter untouched.
	pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let permit = CircuitPermit { breaker: self, admission: self.admit()?, settled: false };
		let result = op().await;

		match &result {
			Ok(_) => permit.succeed(),
			Err(e) => permit.fail(e),
		}

		result
	}

	/// Admits one call whose outcome is reported later through the returned permit.
	///
	/// Used when the call outlives the caller's frame, such as a streamed response.
	pub fn acquire(self: &Arc<Self>) -> Result<CircuitPermit> {
		let admission = self.admit()?;

		Ok(CircuitPermit { breaker: self.clone(), admission, settled: false })
	}

	fn admit(&self) -> Result<Admission> {
		let mut inner = self.inner.lock();

		inner.observe(Instant::now());

		let admission = match inner.state {
			CircuitState::Closed => Some(Admission::Normal),
			CircuitState::Open => None,
			CircuitState::HalfOpen if inner.probes_in_flight < self.config.half_open_max_calls => {
				inner.probes_in_flight += 1;

				Some(Admission::Probe)
			},
			CircuitState::HalfOpen => None,
		};

		match admission {
			Some(admission) => {
				inner.admitted += 1;

				Ok(admission)
			},
			None => {
				inner.rejected += 1;

				Err(Error::CircuitOpen)
			},
		}
	}

	fn settle(&self, admission: Admission, outcome: Outcome) {
		let mut inner = self.inner.lock();
		let now = Instant::now();

		if outcome == Outcome::Failure {
			inner.failures += 1;
		}

		match (admission, inner.state) {
			(Admission::Probe, CircuitState::HalfOpen) => {
				inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);

				match outcome {
					Outcome::Success => {
						tracing::info!("Circuit breaker closed after a successful probe.");

						inner.state = CircuitState::Closed;
						inner.consecutive_failures = 0;
					},
					Outcome::Failure => {
						inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
						inner.trip(now, self.config.reset_timeout());
					},
					Outcome::Neutral | Outcome::Abandoned => {},
				}
			},
			(Admission::Normal, CircuitState::Closed) => match outcome {
				Outcome::Success => inner.consecutive_failures = 0,
				Outcome::Failure => {
					inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

					if inner.consecutive_failures >= self.config.failure_threshold {
						inner.trip(now, self.config.reset_timeout());
					}
				},
				Outcome::Neutral | Outcome::Abandoned => {},
			},
			// Outcomes of calls admitted under an earlier state do not move the current one.
			_ => {},
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
	Success,
	Failure,
	Neutral,
	Abandoned,
}

/// One admitted call; dropping it unsettled releases a half-open probe slot without
/// recording an outcome.
pub struct CircuitPermit<B = Arc<CircuitBreaker>>
where
	B: Deref<Target = CircuitBreaker>,
{
	breaker: B,
	admission: Admission,
	settled: bool,
}
impl<B> CircuitPermit<B>
where
	B: Deref<Target = CircuitBreaker>,
{
	/// Records a successful call.
	pub fn succeed(mut self) {
		self.settle(Outcome::Success);
	}

	/// Records a failed call; errors that do not count as failures leave the counter untouched.
	pub fn fail(mut self, err: &Error) {
		self.settle(if err.counts_as_failure() { Outcome::Failure } else { Outcome::Neutral });
	}

	fn settle(&mut self, outcome: Outcome) {
		self.settled = true;
		self.breaker.settle(self.admission, outcome);
	}
}
impl<B> Debug for CircuitPermit<B>
where
	B: Deref<Target = CircuitBreaker>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CircuitPermit")
			.field("admission", &self.admission)
			.field("settled", &self.settled)
			.finish()
	}
}
impl<B> Drop for CircuitPermit<B>
where
	B: Deref<Target = CircuitBreaker>,
{
	fn drop(&mut self) {
		if !self.settled {
			self.breaker.settle(self.admission, Outcome::Abandoned);
		}
	}
}
