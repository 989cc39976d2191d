#![cfg(feature = "test")]

// std
use std::sync::atomic::{AtomicU32, Ordering};
// crates.io
use futures::StreamExt;
use httpmock::prelude::*;
// self
use copilot_gateway::{
	_preludet::*,
	auth::AccessCredential,
	error::{AuthError, UpstreamError},
	flows::{CredentialFuture, CredentialProvider},
	forward::{
		CompletionOptions, CompletionRequest, EMPTY_COMPLETION_PLACEHOLDER, Forwarder, RetryPolicy,
	},
};

const COMPLETIONS: &str = "/v1/engines/copilot-codex/completions";

/// Hands out `stale-token` until a forced refresh swaps in `fresh-token`.
#[derive(Debug)]
struct SwappingCredentials {
	current: Mutex<String>,
	refreshes: AtomicU32,
	fail_acquire: bool,
}
impl SwappingCredentials {
	fn new() -> Self {
		Self { current: Mutex::new("stale-token".into()), refreshes: AtomicU32::new(0), fail_acquire: false }
	}

	fn refreshes(&self) -> u32 {
		self.refreshes.load(Ordering::SeqCst)
	}
}
impl CredentialProvider for SwappingCredentials {
	fn valid_credential(&self) -> CredentialFuture<'_> {
		Box::pin(async move {
			if self.fail_acquire {
				return Err(AuthError::Rejected { reason: "no secret".into() }.into());
			}

			Ok(test_credential(&self.current.lock().clone()))
		})
	}

	fn force_refresh<'a>(&'a self, _rejected: &'a AccessCredential) -> CredentialFuture<'a> {
		Box::pin(async move {
			self.refreshes.fetch_add(1, Ordering::SeqCst);

			*self.current.lock() = "fresh-token".into();

			Ok(test_credential("fresh-token"))
		})
	}
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
	RetryPolicy { max_attempts, base_delay_ms: 10, max_delay_ms: 20 }
}

fn forwarder(
	server: &MockServer,
	retry: RetryPolicy,
) -> (Forwarder<SwappingCredentials>, Arc<SwappingCredentials>) {
	let credentials = Arc::new(SwappingCredentials::new());
	let forwarder = Forwarder::new(
		test_reqwest_http_client(),
		test_descriptor(&server.base_url()),
		retry,
		credentials.clone(),
	);

	(forwarder, credentials)
}

#[tokio::test]
async fn buffered_completion_concatenates_fragments() {
	let server = MockServer::start_async().await;
	let (forwarder, _) = forwarder(&server, fast_retry(3));
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path(COMPLETIONS)
				.header("authorization", "Bearer stale-token")
				.header("accept", "text/event-stream")
				.body_includes("\"stream\":true")
				.body_includes("\"language\":\"rust\"");
			then.status(200)
				.header("content-type", "text/event-stream")
				.body(sse_body(&["ab", "cd"]));
		})
		.await;
	let request = CompletionRequest::new("fn main() {")
		.with_options(CompletionOptions { language: "rust".into(), ..Default::default() });
	let text = forwarder.complete(&request).await.expect("Completion should succeed.");

	assert_eq!(text, "abcd");
	mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn empty_completion_returns_the_placeholder() {
	let server = MockServer::start_async().await;
	let (forwarder, _) = forwarder(&server, fast_retry(3));

	server
		.mock_async(|when, then| {
			when.method(POST).path(COMPLETIONS);
			then.status(200).header("content-type", "text/event-stream").body(sse_body(&[]));
		})
		.await;

	let text = forwarder
		.complete(&CompletionRequest::new("x"))
		.await
		.expect("Empty completion should still succeed.");

	assert_eq!(text, EMPTY_COMPLETION_PLACEHOLDER);
}

#[tokio::test]
async fn unauthorized_attempt_forces_exactly_one_refresh() {
	let server = MockServer::start_async().await;
	let (forwarder, credentials) = forwarder(&server, fast_retry(3));
	let stale = server
		.mock_async(|when, then| {
			when.method(POST).path(COMPLETIONS).header("authorization", "Bearer stale-token");
			then.status(401).body("unauthorized");
		})
		.await;
	let fresh = server
		.mock_async(|when, then| {
			when.method(POST).path(COMPLETIONS).header("authorization", "Bearer fresh-token");
			then.status(200)
				.header("content-type", "text/event-stream")
				.body(sse_body(&["recovered"]));
		})
		.await;
	let text = forwarder.complete(&CompletionRequest::new("x")).await.expect("Retry should recover.");

	assert_eq!(text, "recovered");
	assert_eq!(credentials.refreshes(), 1);
	stale.assert_calls_async(1).await;
	fresh.assert_calls_async(1).await;
}

#[tokio::test]
async fn repeated_unauthorized_does_not_loop_refreshes() {
	let server = MockServer::start_async().await;
	let (forwarder, credentials) = forwarder(&server, fast_retry(3));
	let rejected = server
		.mock_async(|when, then| {
			when.method(POST).path(COMPLETIONS);
			then.status(401).body("unauthorized");
		})
		.await;
	let err = forwarder
		.complete(&CompletionRequest::new("x"))
		.await
		.expect_err("Persistent 401s should exhaust the retries.");

	assert_eq!(credentials.refreshes(), 1);
	assert!(matches!(
		&err,
		Error::Upstream(UpstreamError::CompletionFailed { attempts: 3, last }) if last.is_unauthorized()
	));
	rejected.assert_calls_async(3).await;
}

#[tokio::test]
async fn server_errors_are_retried_then_wrapped() {
	let server = MockServer::start_async().await;
	let (forwarder, credentials) = forwarder(&server, fast_retry(3));
	let failing = server
		.mock_async(|when, then| {
			when.method(POST).path(COMPLETIONS);
			then.status(503).body("overloaded");
		})
		.await;
	let err = forwarder
		.complete(&CompletionRequest::new("x"))
		.await
		.expect_err("Persistent 503s should exhaust the retries.");

	assert_eq!(err.code(), "completion_failed");
	assert_eq!(err.status(), 500);
	assert!(err.to_string().contains("HTTP 503"));
	assert_eq!(credentials.refreshes(), 0);
	failing.assert_calls_async(3).await;
}

#[tokio::test]
async fn validation_failures_never_reach_upstream() {
	let server = MockServer::start_async().await;
	let (forwarder, _) = forwarder(&server, fast_retry(3));
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path(COMPLETIONS);
			then.status(200).body(sse_body(&["unused"]));
		})
		.await;
	let err = forwarder
		.complete(&CompletionRequest::new("   "))
		.await
		.expect_err("Blank prompts should be rejected.");

	assert_eq!(err.code(), "invalid_request");
	mock.assert_calls_async(0).await;
}

#[tokio::test]
async fn credential_failures_are_not_retried() {
	let server = MockServer::start_async().await;
	let credentials = Arc::new(SwappingCredentials { fail_acquire: true, ..SwappingCredentials::new() });
	let forwarder = Forwarder::new(
		test_reqwest_http_client(),
		test_descriptor(&server.base_url()),
		fast_retry(3),
		credentials,
	);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path(COMPLETIONS);
			then.status(200).body(sse_body(&["unused"]));
		})
		.await;
	let err = forwarder
		.complete(&CompletionRequest::new("x"))
		.await
		.expect_err("Credential failures should surface directly.");

	assert_eq!(err.code(), "authentication_error");
	mock.assert_calls_async(0).await;
}

#[tokio::test]
async fn streaming_completion_yields_fragments_lazily() {
	let server = MockServer::start_async().await;
	let (forwarder, _) = forwarder(&server, fast_retry(3));

	server
		.mock_async(|when, then| {
			when.method(POST).path(COMPLETIONS);
			then.status(200)
				.header("content-type", "text/event-stream")
				.body(sse_body(&["ab", "cd", "ef"]));
		})
		.await;

	let stream = forwarder
		.complete_streaming(&CompletionRequest::new("x"))
		.await
		.expect("Streaming completion should start.");
	let texts = stream
		.map(|chunk| chunk.expect("Every fragment should decode.").text)
		.collect::<Vec<_>>()
		.await;

	assert_eq!(texts, vec!["ab", "cd", "ef"]);
}

#[tokio::test]
async fn streaming_setup_is_retried_like_buffered_calls() {
	let server = MockServer::start_async().await;
	let (forwarder, credentials) = forwarder(&server, fast_retry(2));

	server
		.mock_async(|when, then| {
			when.method(POST).path(COMPLETIONS).header("authorization", "Bearer stale-token");
			then.status(401);
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(POST).path(COMPLETIONS).header("authorization", "Bearer fresh-token");
			then.status(200)
				.header("content-type", "text/event-stream")
				.body(sse_body(&["ok"]));
		})
		.await;

	let mut stream = forwarder
		.complete_streaming(&CompletionRequest::new("x"))
		.await
		.expect("Streaming completion should recover after one refresh.");
	let first = stream.next().await.expect("Stream should yield a fragment.").expect("Fragment should decode.");

	assert_eq!(first.text, "ok");
	assert!(stream.next().await.is_none());
	assert_eq!(credentials.refreshes(), 1);
}
