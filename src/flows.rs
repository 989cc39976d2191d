//! Credential flows: device authorization and access-credential refresh.
//!
//! [`Refresher`] owns the HTTP client, secret store, upstream descriptor, and the in-memory
//! credential state so the individual flow implementations can focus on protocol logic.
//! Cloning a refresher is cheap and every clone shares the same state and single-flight gate.

pub mod device;
pub mod refresh;

pub use device::*;
pub use refresh::*;

// self
use crate::{
	_prelude::*,
	auth::AccessCredential,
	config::RefreshSettings,
	error::ConfigError,
	http::ReqwestHttpClient,
	provider::UpstreamDescriptor,
	store::SecretStore,
};

/// Boxed future returned by [`CredentialProvider`] operations.
pub type CredentialFuture<'a> = Pin<Box<dyn Future<Output = Result<AccessCredential>> + 'a + Send>>;

/// Source of access credentials consumed by the forwarder.
pub trait CredentialProvider
where
	Self: Send + Sync,
{
	/// Returns a credential that is valid right now, refreshing first when required.
	fn valid_credential(&self) -> CredentialFuture<'_>;

	/// Replaces `rejected` after upstream refused it; concurrent callers share one exchange.
	fn force_refresh<'a>(&'a self, rejected: &'a AccessCredential) -> CredentialFuture<'a>;
}

/// Acquires, validates, refreshes, and persists the upstream credential.
#[derive(Clone)]
pub struct Refresher {
	/// HTTP client wrapper used for every outbound credential request.
	pub http_client: ReqwestHttpClient,
	/// Upstream endpoints and client identity.
	pub descriptor: UpstreamDescriptor,
	/// Refresh tunables.
	pub settings: RefreshSettings,
	/// Durable store holding the long-lived secret.
	pub store: Arc<dyn SecretStore>,
	/// Presenter for device authorization codes.
	pub prompt: Arc<dyn DevicePrompt>,
	/// Shared metrics recorder for refresh outcomes.
	pub metrics: Arc<RefreshMetrics>,
	state: Arc<RwLock<CredentialState>>,
	flight: Arc<AsyncMutex<()>>,
}
impl Refresher {
	/// Creates a refresher with its own redirect-free reqwest transport.
	pub fn new(
		descriptor: UpstreamDescriptor,
		settings: RefreshSettings,
		store: Arc<dyn SecretStore>,
	) -> Result<Self, ConfigError> {
		let http_client = ReqwestHttpClient::build(ReqwestHttpClient::DEFAULT_CONNECT_TIMEOUT)?;

		Ok(Self::with_http_client(descriptor, settings, store, http_client))
	}

	/// Creates a refresher that reuses the caller-provided transport.
	pub fn with_http_client(
		descriptor: UpstreamDescriptor,
		settings: RefreshSettings,
		store: Arc<dyn SecretStore>,
		http_client: impl Into<ReqwestHttpClient>,
	) -> Self {
		Self {
			http_client: http_client.into(),
			descriptor,
			settings,
			store,
			prompt: Arc::new(LogPrompt),
			metrics: Default::default(),
			state: Default::default(),
			flight: Default::default(),
		}
	}

	/// Replaces the device-code presenter.
	pub fn with_prompt(mut self, prompt: Arc<dyn DevicePrompt>) -> Self {
		self.prompt = prompt;

		self
	}
}
impl Debug for Refresher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Refresher")
			.field("descriptor", &self.descriptor)
			.field("settings", &self.settings)
			.field("generation", &self.state.read().generation)
			.finish()
	}
}

/// In-memory credential slot guarded by the refresher.
#[derive(Debug, Default)]
pub(crate) struct CredentialState {
	/// Current access credential, if any.
	pub(crate) current: Option<AccessCredential>,
	/// Number of completed exchange attempts; waiters compare it to adopt a finished outcome.
	pub(crate) generation: u64,
	/// Outcome of the most recent exchange attempt.
	pub(crate) last_outcome: Option<Result<AccessCredential>>,
	/// Instant of the most recent successful exchange.
	pub(crate) refreshed_at: Option<OffsetDateTime>,
}
