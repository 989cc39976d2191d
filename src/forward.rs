//! Resilient completion forwarding.
//!
//! [`Forwarder::execute`] is the only place that talks to the completion endpoint: it obtains a
//! credential, sends the request, and retries failures with bounded exponential backoff. A 401
//! triggers exactly one forced credential refresh per logical request. [`Delivery`] decides
//! whether the successful response is drained into a string or handed back as a lazy
//! [`CompletionStream`].

pub mod request;
pub mod retry;
pub mod sse;

pub use request::*;
pub use retry::*;
pub use sse::*;

// crates.io
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{
	Response,
	header::{ACCEPT, HeaderValue},
};
// self
use crate::{
	_prelude::*,
	auth::AccessCredential,
	error::{TransportError, UpstreamError},
	flows::CredentialProvider,
	http::{self, ReqwestHttpClient},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	provider::UpstreamDescriptor,
};

const ENDPOINT: &str = "completions";

/// Returned by [`Forwarder::complete`] when upstream finished without producing any text.
///
/// Callers that render completions treat a lone newline as "nothing to insert"; an empty string
/// is reserved for transport-level absence.
pub const EMPTY_COMPLETION_PLACEHOLDER: &str = "\n";

/// Lazy, non-restartable sequence of completion fragments.
///
/// Dropping the stream drops the upstream body and releases its connection.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<CompletionChunk>> + Send>>;

type BodyStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// One incremental piece of completion text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionChunk {
	/// Text fragment.
	pub text: String,
	/// Choice index the fragment belongs to.
	pub index: u32,
	/// Finish reason, on the last fragment of a choice.
	pub finish_reason: Option<String>,
}

/// How a successful upstream response is handed to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
	/// Read the whole stream and concatenate the text.
	Drain,
	/// Hand back the stream for incremental consumption.
	Incremental,
}

/// Result of [`Forwarder::execute`], shaped by the requested [`Delivery`].
pub enum Delivered {
	/// Concatenated completion text.
	Text(String),
	/// Lazily decoded fragments.
	Stream(CompletionStream),
}
impl Debug for Delivered {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
			Self::Stream(_) => f.write_str("Stream(..)"),
		}
	}
}

/// Sends completion requests upstream with retries and credential recovery.
pub struct Forwarder<P>
where
	P: ?Sized,
{
	/// HTTP client used for completion calls.
	pub http_client: ReqwestHttpClient,
	/// Upstream endpoints and editor headers.
	pub descriptor: UpstreamDescriptor,
	/// Retry budget per logical request.
	pub retry: RetryPolicy,
	/// Source of access credentials.
	pub credentials: Arc<P>,
}
impl<P> Forwarder<P>
where
	P: ?Sized + CredentialProvider,
{
	/// Creates a forwarder.
	pub fn new(
		http_client: impl Into<ReqwestHttpClient>,
		descriptor: UpstreamDescriptor,
		retry: RetryPolicy,
		credentials: Arc<P>,
	) -> Self {
		Self { http_client: http_client.into(), descriptor, retry, credentials }
	}

	/// Returns the full completion text.
	///
	/// When upstream produced no text at all, [`EMPTY_COMPLETION_PLACEHOLDER`] is returned.
	pub async fn complete(&self, request: &CompletionRequest) -> Result<String> {
		match self.execute(request, Delivery::Drain).await? {
			Delivered::Text(text) => Ok(text),
			Delivered::Stream(stream) => drain(stream).await,
		}
	}

	/// Returns the completion as a lazy stream of fragments.
	///
	/// Retries cover connection setup and the response status; a failure after the stream
	/// was handed out is yielded as the stream's last item.
	pub async fn complete_streaming(&self, request: &CompletionRequest) -> Result<CompletionStream> {
		match self.execute(request, Delivery::Incremental).await? {
			Delivered::Stream(stream) => Ok(stream),
			Delivered::Text(text) => Ok(Box::pin(futures::stream::once(async move {
				Ok(CompletionChunk { text, index: 0, finish_reason: None })
			}))),
		}
	}

	/// Runs one logical completion request.
	pub async fn execute(&self, request: &CompletionRequest, delivery: Delivery) -> Result<Delivered> {
		const KIND: FlowKind = FlowKind::Completion;

		let span = FlowSpan::new(KIND, "execute");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.execute_inner(request, delivery)).await;

		obs::record_result(KIND, result)
	}

	async fn execute_inner(
		&self,
		request: &CompletionRequest,
		delivery: Delivery,
	) -> Result<Delivered> {
		request.validate()?;

		let mut credential = self.credentials.valid_credential().await?;
		let mut refreshed = false;
		let mut attempt = 0;

		loop {
			attempt += 1;

			let err = match self.attempt(request, &credential, delivery).await {
				Ok(delivered) => return Ok(delivered),
				Err(e) => e,
			};

			if attempt >= self.retry.max_attempts {
				tracing::warn!(attempts = attempt, error = %err, "Completion retries exhausted.");

				return Err(UpstreamError::CompletionFailed { attempts: attempt, last: Box::new(err) }
					.into());
			}
			if err.is_unauthorized() && !refreshed {
				refreshed = true;

				tracing::info!(
					token = %credential.token.hint(),
					"Upstream rejected the access credential; forcing a refresh."
				);

				credential = self.credentials.force_refresh(&credential).await?;
			}

			let delay = self.retry.delay_for(attempt);

			tracing::warn!(
				attempt,
				delay_ms = delay.as_millis() as u64,
				error = %err,
				"Completion attempt failed; retrying."
			);
			tokio::time::sleep(delay).await;
		}
	}

	async fn attempt(
		&self,
		request: &CompletionRequest,
		credential: &AccessCredential,
		delivery: Delivery,
	) -> Result<Delivered> {
		let mut headers = http::editor_headers(&self.descriptor.quirks);

		headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

		let builder = self
			.http_client
			.post(self.descriptor.endpoints.completions.clone())
			.headers(headers)
			.bearer_auth(credential.token.expose())
			.json(&request.upstream_body());
		let response = http::send(ENDPOINT, builder).await?;
		let response = http::ensure_success(ENDPOINT, response).await?;
		let stream = chunk_stream(response);

		match delivery {
			Delivery::Drain => drain(stream).await.map(Delivered::Text),
			Delivery::Incremental => Ok(Delivered::Stream(stream)),
		}
	}
}
impl<P> Debug for Forwarder<P>
where
	P: ?Sized,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Forwarder")
			.field("endpoint", &self.descriptor.endpoints.completions.as_str())
			.field("retry", &self.retry)
			.finish()
	}
}

async fn drain(mut stream: CompletionStream) -> Result<String> {
	let mut text = String::new();

	while let Some(chunk) = stream.next().await {
		text.push_str(&chunk?.text);
	}

	if text.is_empty() {
		tracing::debug!("Upstream produced no text; returning the placeholder.");

		return Ok(EMPTY_COMPLETION_PLACEHOLDER.to_owned());
	}

	Ok(text)
}

struct ChunkState {
	body: Option<BodyStream>,
	decoder: SseDecoder,
	pending: VecDeque<CompletionChunk>,
}
impl ChunkState {
	fn absorb(&mut self, frames: Vec<SseFrame>) {
		for frame in frames {
			match frame {
				SseFrame::Chunk(chunk) => self.pending.push_back(chunk),
				// Terminal marker; release the connection right away.
				SseFrame::Done => self.body = None,
			}
		}
	}
}

fn chunk_stream(response: Response) -> CompletionStream {
	let state = ChunkState {
		body: Some(Box::pin(response.bytes_stream())),
		decoder: SseDecoder::default(),
		pending: VecDeque::new(),
	};

	Box::pin(futures::stream::unfold(state, |mut state| async move {
		loop {
			if let Some(chunk) = state.pending.pop_front() {
				return Some((Ok(chunk), state));
			}

			let body = state.body.as_mut()?;

			match body.next().await {
				Some(Ok(bytes)) => {
					let frames = state.decoder.push(&bytes);

					state.absorb(frames);
				},
				Some(Err(e)) => {
					state.body = None;

					return Some((Err(TransportError::stream(ENDPOINT, e).into()), state));
				},
				None => {
					state.body = None;

					let frames = state.decoder.finish();

					state.absorb(frames);
				},
			}
		}
	}))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn stream_of(chunks: Vec<Result<CompletionChunk>>) -> CompletionStream {
		Box::pin(futures::stream::iter(chunks))
	}

	fn chunk(text: &str) -> Result<CompletionChunk> {
		Ok(CompletionChunk { text: text.into(), index: 0, finish_reason: None })
	}

	#[tokio::test]
	async fn drain_concatenates_fragments() {
		let text = drain(stream_of(vec![chunk("ab"), chunk("cd")])).await.expect("Drain should succeed.");

		assert_eq!(text, "abcd");
	}

	#[tokio::test]
	async fn drain_substitutes_the_placeholder_for_empty_output() {
		let text = drain(stream_of(vec![chunk(""), chunk("")])).await.expect("Drain should succeed.");

		assert_eq!(text, EMPTY_COMPLETION_PLACEHOLDER);
	}

	#[tokio::test]
	async fn drain_propagates_mid_stream_failures() {
		let err = drain(stream_of(vec![chunk("ab"), Err(UpstreamError::status(500, "").into())]))
			.await
			.expect_err("A failing fragment should fail the drain.");

		assert_eq!(err.code(), "upstream_error");
	}
}
