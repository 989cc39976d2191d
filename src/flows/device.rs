//! Device authorization flow: request a user code, show it, and poll until the user approves.
//!
//! The session walks `Idle → CodeRequested → Polling → {Approved | Denied | Expired}`.
//! [`PollSchedule`] holds the pure polling transitions (interval handling and response
//! classification) while [`Refresher::authorize_device`] drives the network side. A progress
//! reporter task shares a [`CancellationToken`] with the poll loop, so every exit path
//! (approval, denial, deadline) stops both.

// crates.io
use tokio::time::{self as tokio_time, Instant};
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	error::AuthError,
	flows::Refresher,
	http,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

const GRANT_TYPE_DEVICE_CODE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Session returned by the device-code endpoint; never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct DeviceAuthorizationSession {
	/// Opaque code exchanged while polling.
	pub device_code: TokenSecret,
	/// Short code the user types on the verification page.
	pub user_code: String,
	/// Page where the user enters the code.
	pub verification_uri: String,
	/// Session lifetime in seconds.
	pub expires_in: u64,
	/// Minimum polling interval in seconds.
	#[serde(default = "DeviceAuthorizationSession::default_interval")]
	pub interval: u64,
}
impl DeviceAuthorizationSession {
	const DEFAULT_INTERVAL_SECS: u64 = 5;
	const MAX_LIFETIME_SECS: u64 = 24 * 60 * 60;

	fn default_interval() -> u64 {
		Self::DEFAULT_INTERVAL_SECS
	}

	/// Session lifetime as a duration, capped at one day.
	pub fn lifetime(&self) -> StdDuration {
		StdDuration::from_secs(self.expires_in.min(Self::MAX_LIFETIME_SECS))
	}
}

/// Presents a device code to the human who must approve it.
pub trait DevicePrompt
where
	Self: Send + Sync,
{
	/// Displays the user code and verification URI.
	fn show(&self, session: &DeviceAuthorizationSession);
}

/// Default presenter that writes the code to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogPrompt;
impl DevicePrompt for LogPrompt {
	fn show(&self, session: &DeviceAuthorizationSession) {
		tracing::warn!(
			user_code = %session.user_code,
			verification_uri = %session.verification_uri,
			expires_in = session.expires_in,
			"Device authorization required: open the verification URI and enter the user code."
		);
	}
}

/// One classified answer from the device token endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollResponse {
	/// User approved; carries the long-lived secret.
	Token(TokenSecret),
	/// Endpoint returned a named OAuth error.
	Error {
		/// OAuth `error` code.
		error: String,
		/// Optional `error_description`.
		description: Option<String>,
	},
	/// Transport failure, non-2xx status without a named error, or an unrecognized body.
	Transient {
		/// Short description for the log.
		reason: String,
	},
}

/// Next step chosen by [`PollSchedule::on_response`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollStep {
	/// Sleep for [`PollSchedule::interval`] and poll again.
	Continue,
	/// The user approved the device.
	Approved(TokenSecret),
}

/// Polling state for one device authorization session.
#[derive(Clone, Debug)]
pub struct PollSchedule {
	interval: StdDuration,
	polls: u32,
}
impl PollSchedule {
	const MIN_SLOW_DOWN_INTERVAL: StdDuration = StdDuration::from_secs(1);

	/// Starts polling at the session's advertised interval.
	pub fn new(session: &DeviceAuthorizationSession) -> Self {
		Self { interval: StdDuration::from_secs(session.interval), polls: 0 }
	}

	/// Delay before the next poll.
	pub fn interval(&self) -> StdDuration {
		self.interval
	}

	/// Number of responses observed so far.
	pub fn polls(&self) -> u32 {
		self.polls
	}

	/// Applies one endpoint response.
	///
	/// `slow_down` doubles the interval (from at least one second) for the rest of the session,
	/// as RFC 8628 section 3.5 requires. Clients that restore the previous interval after a
	/// single slower poll read the same signal as one-off; here it persists. Any named error
	/// other than `authorization_pending` ends the session as denied.
	pub fn on_response(&mut self, response: PollResponse) -> Result<PollStep> {
		self.polls += 1;

		match response {
			PollResponse::Token(secret) => Ok(PollStep::Approved(secret)),
			PollResponse::Error { error, .. } if error == "authorization_pending" =>
				Ok(PollStep::Continue),
			PollResponse::Error { error, .. } if error == "slow_down" => {
				self.interval = self.interval.max(Self::MIN_SLOW_DOWN_INTERVAL).saturating_mul(2);

				tracing::debug!(
					interval_secs = self.interval.as_secs(),
					"Device token endpoint asked to slow down."
				);

				Ok(PollStep::Continue)
			},
			PollResponse::Error { error, description } =>
				Err(AuthError::Denied { error, description }.into()),
			PollResponse::Transient { reason } => {
				tracing::warn!(%reason, "Device token poll failed; continuing.");

				Ok(PollStep::Continue)
			},
		}
	}
}

#[derive(Debug, Deserialize)]
struct PollBody {
	access_token: Option<String>,
	error: Option<String>,
	error_description: Option<String>,
}

impl Refresher {
	/// Runs the full device authorization flow and persists the obtained secret.
	///
	/// Failures leave no partial state: the session is dropped and nothing is stored.
	pub async fn authorize_device(&self) -> Result<TokenSecret> {
		const KIND: FlowKind = FlowKind::DeviceAuthorization;

		let span = FlowSpan::new(KIND, "authorize_device");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let session = self.request_device_code().await?;

				self.prompt.show(&session);

				let secret = self.poll_for_secret(&session).await?;

				self.store.save(&self.settings.secret_name, secret.clone()).await?;
				tracing::info!(secret = %secret.hint(), "Device authorization approved.");

				Ok(secret)
			})
			.await;

		obs::record_result(KIND, result)
	}

	/// Requests a new device/user code pair.
	pub async fn request_device_code(&self) -> Result<DeviceAuthorizationSession> {
		const ENDPOINT: &str = "device_code";

		let body = serde_json::json!({
			"client_id": self.descriptor.client_id,
			"scope": self.descriptor.scope,
		});
		let request = self
			.http_client
			.post(self.descriptor.endpoints.device_code.clone())
			.headers(http::editor_headers(&self.descriptor.quirks))
			.json(&body);
		let response = http::send(ENDPOINT, request).await?;
		let status = response.status();

		if !status.is_success() {
			return Err(AuthError::DeviceCodeRequest { status: status.as_u16() }.into());
		}

		http::read_json(ENDPOINT, response).await
	}

	/// Polls the token endpoint until the session resolves or its lifetime elapses.
	pub async fn poll_for_secret(&self, session: &DeviceAuthorizationSession) -> Result<TokenSecret> {
		let cancel = CancellationToken::new();
		let _stop_progress = cancel.clone().drop_guard();
		let lifetime = session.lifetime();
		let deadline = Instant::now() + lifetime;

		tokio::spawn(tracing::Instrument::in_current_span(report_progress(
			cancel.child_token(),
			deadline,
			self.settings.progress_interval(),
		)));

		tokio::select! {
			result = self.poll_loop(session) => result,
			_ = tokio_time::sleep_until(deadline) => {
				Err(AuthError::Expired { waited_secs: lifetime.as_secs() }.into())
			},
		}
	}

	async fn poll_loop(&self, session: &DeviceAuthorizationSession) -> Result<TokenSecret> {
		let mut schedule = PollSchedule::new(session);

		loop {
			tokio_time::sleep(schedule.interval()).await;

			let response = self.poll_once(session).await;

			if let PollStep::Approved(secret) = schedule.on_response(response)? {
				return Ok(secret);
			}
		}
	}

	async fn poll_once(&self, session: &DeviceAuthorizationSession) -> PollResponse {
		let body = serde_json::json!({
			"client_id": self.descriptor.client_id,
			"device_code": session.device_code.expose(),
			"grant_type": GRANT_TYPE_DEVICE_CODE,
		});
		let request = self
			.http_client
			.post(self.descriptor.endpoints.access_token.clone())
			.headers(http::editor_headers(&self.descriptor.quirks))
			.json(&body);
		let response = match request.send().await {
			Ok(response) => response,
			Err(e) => return PollResponse::Transient { reason: format!("transport error: {e}") },
		};
		let status = response.status();
		let bytes = match response.bytes().await {
			Ok(bytes) => bytes,
			Err(e) => return PollResponse::Transient { reason: format!("body read error: {e}") },
		};

		classify_poll_body(status, &bytes)
	}
}

/// Classifies a raw token-endpoint answer.
///
/// Named OAuth errors win regardless of status because providers disagree on whether
/// `authorization_pending` is a 200 or a 400.
pub fn classify_poll_body(status: StatusCode, bytes: &[u8]) -> PollResponse {
	let parsed = http::parse_json::<PollBody>(bytes).ok();

	if let Some(body) = parsed {
		if let Some(token) = body.access_token.filter(|t| !t.trim().is_empty()) {
			return PollResponse::Token(TokenSecret::new(token));
		}
		if let Some(error) = body.error {
			return PollResponse::Error { error, description: body.error_description };
		}
	}

	if status.is_success() {
		PollResponse::Transient { reason: "response carried neither a token nor an error".into() }
	} else {
		PollResponse::Transient { reason: format!("HTTP {}", status.as_u16()) }
	}
}

async fn report_progress(cancel: CancellationToken, deadline: Instant, every: StdDuration) {
	loop {
		tokio::select! {
			_ = cancel.cancelled() => break,
			_ = tokio_time::sleep(every) => {
				let remaining = deadline.saturating_duration_since(Instant::now());

				if remaining.is_zero() {
					break;
				}

				tracing::info!(
					remaining_secs = remaining.as_secs(),
					"Waiting for device authorization."
				);
			},
		}
	}
}
