//! Access-credential refresh with single-flight coordination and a background schedule.
//!
//! Every caller that needs a new credential goes through [`Refresher::coalesced_refresh`]: the
//! first caller to take the flight gate performs the exchange, and callers that queued behind it
//! adopt the finished outcome (credential or failure) by comparing the state generation they
//! observed before waiting. The exchange itself falls back to device authorization when the
//! stored secret is missing or rejected.

mod metrics;

pub use metrics::RefreshMetrics;

// crates.io
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	auth::{AccessCredential, TokenSecret},
	error::AuthError,
	flows::{CredentialFuture, CredentialProvider, Refresher},
	http,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

#[derive(Debug, Deserialize)]
struct ExchangeBody {
	token: String,
	#[serde(default)]
	expires_in: Option<i64>,
}

/// Non-authoritative view of the refresher state, safe to expose on debug endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RefreshSnapshot {
	/// Whether a credential is currently cached.
	pub has_credential: bool,
	/// Redacted suffix of the cached credential.
	pub token_hint: Option<String>,
	/// Expiry of the cached credential, when known.
	#[serde(with = "time::serde::rfc3339::option")]
	pub expires_at: Option<OffsetDateTime>,
	/// Instant of the last successful exchange.
	#[serde(with = "time::serde::rfc3339::option")]
	pub refreshed_at: Option<OffsetDateTime>,
	/// Number of completed exchange attempts.
	pub generation: u64,
}

/// Handle to the periodic refresh task; dropping it stops the task.
#[derive(Debug)]
pub struct RefreshTask {
	cancel: CancellationToken,
	handle: Option<JoinHandle<()>>,
}
impl RefreshTask {
	/// Returns `true` once the task has been asked to stop.
	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	/// Stops the task and waits for it to exit.
	pub async fn shutdown(mut self) {
		self.cancel.cancel();

		if let Some(handle) = self.handle.take() {
			if let Err(e) = handle.await {
				tracing::warn!(error = %e, "Background refresh task ended abnormally.");
			}
		}
	}
}
impl Drop for RefreshTask {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

impl Refresher {
	/// Returns the cached credential when it is outside the expiry buffer, refreshing otherwise.
	pub async fn valid_credential(&self) -> Result<AccessCredential> {
		if let Some(current) = self.cached_valid(OffsetDateTime::now_utc(), None) {
			return Ok(current);
		}

		self.coalesced_refresh(None).await
	}

	/// Exchanges the long-lived secret for a new credential, sharing any in-flight exchange.
	pub async fn refresh(&self) -> Result<AccessCredential> {
		let observed = self.state.read().generation;

		self.metrics.record_attempt();

		let _flight = self.flight.lock().await;

		if let Some(outcome) = self.adopt_if_newer(observed) {
			return outcome;
		}

		self.run_exchange(None).await
	}

	/// Replaces a credential upstream refused.
	///
	/// When another caller already replaced `rejected`, the newer credential is returned
	/// without a second exchange.
	pub async fn force_refresh(&self, rejected: &AccessCredential) -> Result<AccessCredential> {
		{
			let mut state = self.state.write();

			if state.current.as_ref() == Some(rejected) {
				state.current = None;
			}
		}

		self.coalesced_refresh(Some(rejected)).await
	}

	/// Startup hook: ensures a secret exists and warms the credential cache.
	///
	/// Failures are logged; the next caller retries lazily.
	pub async fn initialize(&self) {
		match self.store.load(&self.settings.secret_name).await {
			Ok(Some(secret)) if !secret.is_blank() => {
				tracing::debug!(secret = %secret.hint(), "Found stored secret.");
			},
			Ok(_) => {
				tracing::info!("No stored secret; starting device authorization.");

				if let Err(e) = self.authorize_device().await {
					tracing::error!(error = %e, "Device authorization failed during startup.");

					return;
				}
			},
			Err(e) => {
				tracing::error!(error = %e, "Secret store could not be read during startup.");

				return;
			},
		}

		match self.refresh().await {
			Ok(credential) => tracing::info!(
				token = %credential.token.hint(),
				expires_at = ?credential.expires_at,
				"Initial credential refresh succeeded."
			),
			Err(e) => tracing::warn!(error = %e, "Initial credential refresh failed; will retry on demand."),
		}
	}

	/// Starts the periodic refresh task.
	///
	/// The first tick fires one `interval` after the call. Tick failures are logged and never
	/// stop the schedule.
	pub fn spawn_background(&self, interval: StdDuration) -> RefreshTask {
		let cancel = CancellationToken::new();
		let token = cancel.clone();
		let refresher = self.clone();
		let span = FlowSpan::new(FlowKind::Refresh, "background");
		let interval = interval.max(StdDuration::from_millis(1));
		let schedule = async move {
			let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

			loop {
				tokio::select! {
					_ = token.cancelled() => break,
					_ = ticker.tick() => {
						if let Err(e) = refresher.refresh().await {
							tracing::warn!(error = %e, "Background credential refresh failed.");
						}
					},
				}
			}

			tracing::debug!("Background refresh stopped.");
		};
		let handle = tokio::spawn(span.instrument(schedule));

		RefreshTask { cancel, handle: Some(handle) }
	}

	/// Returns a redacted view of the current state.
	pub fn snapshot(&self) -> RefreshSnapshot {
		let state = self.state.read();
		let current = state.current.as_ref();

		RefreshSnapshot {
			has_credential: current.is_some(),
			token_hint: current.map(|c| c.token.hint()),
			expires_at: current.and_then(|c| c.expires_at),
			refreshed_at: state.refreshed_at,
			generation: state.generation,
		}
	}

	fn cached_valid(
		&self,
		now: OffsetDateTime,
		rejected: Option<&AccessCredential>,
	) -> Option<AccessCredential> {
		let state = self.state.read();

		state
			.current
			.as_ref()
			.filter(|c| rejected != Some(*c))
			.filter(|c| c.is_valid_at(now, self.settings.expiry_buffer()))
			.cloned()
	}

	fn adopt_if_newer(&self, observed: u64) -> Option<Result<AccessCredential>> {
		let state = self.state.read();

		if state.generation == observed {
			return None;
		}

		let outcome = state.last_outcome.clone()?;

		self.metrics.record_coalesced();

		Some(outcome)
	}

	pub(crate) async fn coalesced_refresh(
		&self,
		rejected: Option<&AccessCredential>,
	) -> Result<AccessCredential> {
		let observed = self.state.read().generation;

		self.metrics.record_attempt();

		let _flight = self.flight.lock().await;

		if let Some(outcome) = self.adopt_if_newer(observed) {
			return outcome;
		}
		if let Some(current) = self.cached_valid(OffsetDateTime::now_utc(), rejected) {
			return Ok(current);
		}

		self.run_exchange(rejected).await
	}

	// Caller must hold the flight gate.
	async fn run_exchange(&self, rejected: Option<&AccessCredential>) -> Result<AccessCredential> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, "exchange");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);
		self.metrics.record_exchange();

		let outcome =
			span.instrument(self.exchange_with_recovery()).await.map_err(as_auth_failure);
		let outcome = obs::record_result(KIND, outcome);
		let mut state = self.state.write();

		state.generation += 1;

		match &outcome {
			Ok(credential) => {
				self.metrics.record_success();
				tracing::info!(
					token = %credential.token.hint(),
					remaining_secs = credential
						.remaining_at(OffsetDateTime::now_utc())
						.map(|d| d.whole_seconds()),
					"Access credential refreshed."
				);

				state.current = Some(credential.clone());
				state.refreshed_at = Some(credential.issued_at);
			},
			Err(e) => {
				self.metrics.record_failure();
				tracing::warn!(error = %e, "Credential refresh failed.");

				if rejected.is_some() && state.current.as_ref() == rejected {
					state.current = None;
				}
			},
		}

		state.last_outcome = Some(outcome.clone());

		outcome
	}

	async fn exchange_with_recovery(&self) -> Result<AccessCredential> {
		let name = self.settings.secret_name.as_str();
		let secret = match self.store.load(name).await? {
			Some(secret) if !secret.is_blank() => secret,
			_ => self.authorize_device().await?,
		};

		match self.exchange(&secret).await {
			Ok(credential) => Ok(credential),
			Err(e) if e.is_unauthorized() => {
				tracing::warn!(
					secret = %secret.hint(),
					"Stored secret was rejected; discarding it and re-running device authorization."
				);

				self.store.remove(name).await?;

				let secret = self.authorize_device().await?;

				self.exchange(&secret).await
			},
			Err(e) => Err(e),
		}
	}

	/// Performs one exchange of `secret` for an access credential.
	pub async fn exchange(&self, secret: &TokenSecret) -> Result<AccessCredential> {
		const ENDPOINT: &str = "copilot_token";

		let request = self
			.http_client
			.get(self.descriptor.endpoints.copilot_token.clone())
			.headers(http::editor_headers(&self.descriptor.quirks))
			.header(reqwest::header::AUTHORIZATION, format!("token {}", secret.expose()));
		let response = http::send(ENDPOINT, request).await?;
		let response = http::ensure_success(ENDPOINT, response).await?;
		let body = http::read_json::<ExchangeBody>(ENDPOINT, response).await?;

		if body.token.trim().is_empty() {
			return Err(AuthError::Rejected { reason: "exchange returned an empty token".into() }.into());
		}

		let credential =
			AccessCredential::from_exchange(body.token, body.expires_in, OffsetDateTime::now_utc());

		tracing::debug!(
			token = %credential.token.hint(),
			expires_at = ?credential.expires_at,
			"Exchanged secret for access credential."
		);

		Ok(credential)
	}
}
impl CredentialProvider for Refresher {
	fn valid_credential(&self) -> CredentialFuture<'_> {
		Box::pin(Refresher::valid_credential(self))
	}

	fn force_refresh<'a>(&'a self, rejected: &'a AccessCredential) -> CredentialFuture<'a> {
		Box::pin(Refresher::force_refresh(self, rejected))
	}
}

// Refresh failures surface as authentication errors, including device-flow transport and
// parse failures. Store errors pass through so a broken secret store stays diagnosable.
fn as_auth_failure(err: Error) -> Error {
	match err {
		Error::Authentication(_) | Error::Storage(_) => err,
		other => AuthError::Rejected { reason: other.to_string() }.into(),
	}
}
