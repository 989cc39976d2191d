//! Host-facing facade wiring the refresher, forwarder, and traffic guards together.

// crates.io
use futures::StreamExt;
// self
use crate::{
	_prelude::*,
	config::GatewayConfig,
	error::ConfigError,
	flows::{RefreshSnapshot, RefreshTask, Refresher},
	forward::{CompletionRequest, CompletionStream, Forwarder},
	guard::{CircuitBreaker, CircuitPermit, CircuitStats, RateLimiter},
	http::ReqwestHttpClient,
	provider::UpstreamDescriptor,
	store::SecretStore,
};

/// Completion gateway: rate limiter, then circuit breaker, then forwarder.
#[derive(Debug)]
pub struct Gateway {
	config: GatewayConfig,
	refresher: Refresher,
	forwarder: Forwarder<Refresher>,
	breaker: Arc<CircuitBreaker>,
	limiter: RateLimiter,
}
impl Gateway {
	/// Validates `config` and builds a gateway with its own HTTP client.
	pub fn new(
		descriptor: UpstreamDescriptor,
		config: GatewayConfig,
		store: Arc<dyn SecretStore>,
	) -> Result<Self, ConfigError> {
		let http_client = ReqwestHttpClient::build(ReqwestHttpClient::DEFAULT_CONNECT_TIMEOUT)?;

		Self::with_http_client(descriptor, config, store, http_client)
	}

	/// Validates `config` and builds a gateway over the caller-provided transport.
	pub fn with_http_client(
		descriptor: UpstreamDescriptor,
		config: GatewayConfig,
		store: Arc<dyn SecretStore>,
		http_client: impl Into<ReqwestHttpClient>,
	) -> Result<Self, ConfigError> {
		config.validate()?;

		let http_client = http_client.into();
		let refresher = Refresher::with_http_client(
			descriptor.clone(),
			config.refresh.clone(),
			store,
			http_client.clone(),
		);

		Ok(Self::from_refresher(refresher, http_client, descriptor, config))
	}

	/// Builds a gateway around an existing refresher, e.g. one with a custom device prompt.
	pub fn from_refresher(
		refresher: Refresher,
		http_client: ReqwestHttpClient,
		descriptor: UpstreamDescriptor,
		config: GatewayConfig,
	) -> Self {
		let forwarder =
			Forwarder::new(http_client, descriptor, config.retry.clone(), Arc::new(refresher.clone()));

		Self {
			breaker: Arc::new(CircuitBreaker::new(config.circuit_breaker.clone())),
			limiter: RateLimiter::new(config.rate_limit.clone()),
			config,
			refresher,
			forwarder,
		}
	}

	/// Active configuration.
	pub fn config(&self) -> &GatewayConfig {
		&self.config
	}

	/// Credential refresher shared with the forwarder.
	pub fn refresher(&self) -> &Refresher {
		&self.refresher
	}

	/// Buffered completion.
	pub async fn complete(&self, request: &CompletionRequest) -> Result<String> {
		self.admit()?;
		self.breaker.execute(|| self.forwarder.complete(request)).await
	}

	/// Streaming completion.
	///
	/// The circuit breaker settles when the stream ends, so a mid-stream failure counts against
	/// it; a stream dropped early records no outcome.
	pub async fn complete_streaming(&self, request: &CompletionRequest) -> Result<CompletionStream> {
		self.admit()?;

		let permit = self.breaker.acquire()?;

		match self.forwarder.complete_streaming(request).await {
			Ok(stream) => Ok(settle_on_end(stream, permit)),
			Err(e) => {
				permit.fail(&e);

				Err(e)
			},
		}
	}

	/// Startup hook; never fails.
	pub async fn initialize(&self) {
		self.refresher.initialize().await;
	}

	/// Starts the periodic refresh at the configured interval.
	pub fn start_background_refresh(&self) -> RefreshTask {
		self.refresher.spawn_background(self.config.refresh.background_interval())
	}

	/// Circuit breaker statistics.
	pub fn circuit_stats(&self) -> CircuitStats {
		self.breaker.stats()
	}

	/// Redacted refresher state.
	pub fn refresh_snapshot(&self) -> RefreshSnapshot {
		self.refresher.snapshot()
	}

	fn admit(&self) -> Result<()> {
		if self.limiter.acquire() {
			Ok(())
		} else {
			tracing::debug!("Rate limiter rejected a completion.");

			Err(Error::RateLimited)
		}
	}
}

fn settle_on_end(stream: CompletionStream, permit: CircuitPermit) -> CompletionStream {
	Box::pin(futures::stream::unfold((stream, Some(permit)), |(mut stream, mut permit)| async move {
		let item = stream.next().await;

		match &item {
			Some(Ok(_)) => {},
			Some(Err(e)) =>
				if let Some(permit) = permit.take() {
					permit.fail(e);
				},
			None =>
				if let Some(permit) = permit.take() {
					permit.succeed();
				},
		}

		item.map(|item| (item, (stream, permit)))
	}))
}
