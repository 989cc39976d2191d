#![cfg(feature = "test")]

// crates.io
use futures::future;
use httpmock::prelude::*;
// self
use copilot_gateway::{
	_preludet::*,
	auth::TokenSecret,
	config::RefreshSettings,
	error::AuthError,
	flows::Refresher,
	store::{MemoryStore, SecretStore},
};

const STORED_SECRET: &str = "gho_stored_secret_0001";
const FRESH_SECRET: &str = "gho_fresh_secret_0002";

fn exchange_body(token: &str) -> String {
	serde_json::json!({ "token": token, "expires_in": 1_800 }).to_string()
}

async fn seed(store: &MemoryStore, secret: &str) {
	store.save("github_token", TokenSecret::new(secret)).await.expect("Seeding the store should succeed.");
}

async fn mock_device_approval<'a>(
	server: &'a MockServer,
	secret: &str,
) -> (httpmock::Mock<'a>, httpmock::Mock<'a>) {
	let code = server
		.mock_async(|when, then| {
			when.method(POST).path("/login/device/code");
			then.status(200).header("content-type", "application/json").body(
				serde_json::json!({
					"device_code": "dc-refresh",
					"user_code": "REFR-0001",
					"verification_uri": "https://github.com/login/device",
					"expires_in": 60,
					"interval": 0,
				})
				.to_string(),
			);
		})
		.await;
	let token = server
		.mock_async(|when, then| {
			when.method(POST).path("/login/oauth/access_token");
			then.status(200)
				.header("content-type", "application/json")
				.body(format!("{{\"access_token\":\"{secret}\"}}"));
		})
		.await;

	(code, token)
}

#[tokio::test]
async fn concurrent_callers_share_one_exchange() {
	let server = MockServer::start_async().await;
	let (refresher, store, _) = build_test_refresher(&server.base_url());

	seed(&store, STORED_SECRET).await;

	let exchange = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/copilot_internal/v2/token")
				.header("authorization", format!("token {STORED_SECRET}"));
			then.status(200)
				.header("content-type", "application/json")
				.delay(StdDuration::from_millis(200))
				.body(exchange_body("tid=shared;exp=9999999999"));
		})
		.await;
	let results =
		future::join_all((0..8).map(|_| refresher.valid_credential())).await;

	for result in results {
		let credential = result.expect("Every caller should receive the shared credential.");

		assert_eq!(credential.token.expose(), "tid=shared;exp=9999999999");
	}

	exchange.assert_calls_async(1).await;
	assert_eq!(refresher.metrics.exchanges(), 1);
	assert_eq!(refresher.metrics.coalesced(), 7);

	// Cached now; no further exchange.
	refresher.valid_credential().await.expect("Cached credential should be returned.");
	exchange.assert_calls_async(1).await;
}

#[tokio::test]
async fn concurrent_callers_share_one_failure() {
	let server = MockServer::start_async().await;
	let (refresher, store, _) = build_test_refresher(&server.base_url());

	seed(&store, STORED_SECRET).await;

	let exchange = server
		.mock_async(|when, then| {
			when.method(GET).path("/copilot_internal/v2/token");
			then.status(500).delay(StdDuration::from_millis(200)).body("upstream down");
		})
		.await;
	let results = future::join_all((0..5).map(|_| refresher.valid_credential())).await;

	for result in results {
		let err = result.expect_err("Every caller should observe the shared failure.");

		assert!(matches!(err, Error::Authentication(AuthError::Rejected { .. })));
		assert!(!err.to_string().contains(STORED_SECRET));
	}

	exchange.assert_calls_async(1).await;
}

#[tokio::test]
async fn rejected_secret_is_replaced_through_device_authorization() {
	let server = MockServer::start_async().await;
	let (refresher, store, prompt) = build_test_refresher(&server.base_url());

	seed(&store, STORED_SECRET).await;

	let revoked = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/copilot_internal/v2/token")
				.header("authorization", format!("token {STORED_SECRET}"));
			then.status(401).body("{\"message\":\"Bad credentials\"}");
		})
		.await;
	let fresh = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/copilot_internal/v2/token")
				.header("authorization", format!("token {FRESH_SECRET}"));
			then.status(200)
				.header("content-type", "application/json")
				.body(exchange_body("tid=recovered"));
		})
		.await;
	let (code, _) = mock_device_approval(&server, FRESH_SECRET).await;
	let credential = refresher.refresh().await.expect("Recovery should produce a credential.");

	assert_eq!(credential.token.expose(), "tid=recovered");
	assert_eq!(prompt.user_codes().len(), 1);
	assert_eq!(
		store.load("github_token").await.expect("Store read should succeed.").map(|s| s.expose().to_owned()),
		Some(FRESH_SECRET.to_owned())
	);
	revoked.assert_calls_async(1).await;
	fresh.assert_calls_async(1).await;
	code.assert_calls_async(1).await;
}

#[tokio::test]
async fn second_rejection_fails_with_an_authentication_error() {
	let server = MockServer::start_async().await;
	let (refresher, store, _) = build_test_refresher(&server.base_url());

	seed(&store, STORED_SECRET).await;
	server
		.mock_async(|when, then| {
			when.method(GET).path("/copilot_internal/v2/token");
			then.status(401).body("{\"message\":\"Bad credentials\"}");
		})
		.await;
	mock_device_approval(&server, FRESH_SECRET).await;

	let err = refresher.refresh().await.expect_err("A second rejection should fail the refresh.");

	assert_eq!(err.code(), "authentication_error");
	assert!(matches!(err, Error::Authentication(AuthError::Rejected { .. })));
}

#[tokio::test]
async fn device_flow_parse_failures_surface_as_authentication_errors() {
	let server = MockServer::start_async().await;
	let (refresher, store, prompt) = build_test_refresher(&server.base_url());

	server
		.mock_async(|when, then| {
			when.method(POST).path("/login/device/code");
			then.status(200).header("content-type", "text/html").body("<html>maintenance</html>");
		})
		.await;

	let err = refresher
		.valid_credential()
		.await
		.expect_err("An unreadable device-code response should fail the refresh.");

	assert_eq!(err.code(), "authentication_error");
	assert_eq!(err.status(), 401);
	assert!(matches!(err, Error::Authentication(AuthError::Rejected { .. })));
	assert!(prompt.user_codes().is_empty());
	assert!(!store.contains("github_token"));
}

#[tokio::test]
async fn secret_round_trips_into_a_fresh_refresher() {
	let server = MockServer::start_async().await;
	let (first, store, _) = build_test_refresher(&server.base_url());
	let (code, _) = mock_device_approval(&server, FRESH_SECRET).await;
	let exchange = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/copilot_internal/v2/token")
				.header("authorization", format!("token {FRESH_SECRET}"));
			then.status(200)
				.header("content-type", "application/json")
				.body(exchange_body("tid=round-trip"));
		})
		.await;
	let original = first.valid_credential().await.expect("First refresher should authorize and exchange.");
	let shared: Arc<dyn SecretStore> = store.clone();
	let second = Refresher::with_http_client(
		test_descriptor(&server.base_url()),
		RefreshSettings::default(),
		shared,
		test_reqwest_http_client(),
	);
	let replayed = second.valid_credential().await.expect("Second refresher should reuse the secret.");

	assert_eq!(original.token, replayed.token);
	code.assert_calls_async(1).await;
	exchange.assert_calls_async(2).await;
}

#[tokio::test]
async fn default_transport_does_not_follow_redirects() {
	let server = MockServer::start_async().await;
	let store = Arc::new(MemoryStore::default());

	seed(&store, STORED_SECRET).await;

	let shared: Arc<dyn SecretStore> = store.clone();
	let refresher =
		Refresher::new(test_descriptor(&server.base_url()), RefreshSettings::default(), shared)
			.expect("Default transport should build.");
	let redirect = server
		.mock_async(|when, then| {
			when.method(GET).path("/copilot_internal/v2/token");
			then.status(302).header("location", "/elsewhere");
		})
		.await;
	let elsewhere = server
		.mock_async(|when, then| {
			when.path("/elsewhere");
			then.status(200)
				.header("content-type", "application/json")
				.body(exchange_body("tid=redirected"));
		})
		.await;
	let err = refresher.valid_credential().await.expect_err("Redirected exchanges should fail.");

	assert_eq!(err.code(), "authentication_error");
	redirect.assert_calls_async(1).await;
	elsewhere.assert_calls_async(0).await;
}

#[tokio::test]
async fn force_refresh_replaces_a_rejected_credential_once() {
	let server = MockServer::start_async().await;
	let (refresher, store, _) = build_test_refresher(&server.base_url());

	seed(&store, STORED_SECRET).await;

	let exchange = server
		.mock_async(|when, then| {
			when.method(GET).path("/copilot_internal/v2/token");
			then.status(200)
				.header("content-type", "application/json")
				.delay(StdDuration::from_millis(100))
				.body(exchange_body("tid=rotating"));
		})
		.await;
	let rejected = refresher.valid_credential().await.expect("Initial credential should be issued.");
	let results = future::join_all((0..4).map(|_| refresher.force_refresh(&rejected))).await;

	for result in results {
		result.expect("Forced refresh should succeed.");
	}

	// One initial exchange plus one shared forced exchange.
	exchange.assert_calls_async(2).await;
	assert_eq!(refresher.snapshot().generation, 2);
}

#[tokio::test]
async fn initialize_swallows_failures() {
	let server = MockServer::start_async().await;
	let (refresher, _, _) = build_test_refresher(&server.base_url());

	server
		.mock_async(|when, then| {
			when.method(POST).path("/login/device/code");
			then.status(503).body("maintenance");
		})
		.await;

	refresher.initialize().await;

	assert!(!refresher.snapshot().has_credential);
}

#[tokio::test]
async fn background_task_refreshes_until_shutdown() {
	let server = MockServer::start_async().await;
	let (refresher, store, _) = build_test_refresher(&server.base_url());

	seed(&store, STORED_SECRET).await;

	let exchange = server
		.mock_async(|when, then| {
			when.method(GET).path("/copilot_internal/v2/token");
			then.status(200)
				.header("content-type", "application/json")
				.body(exchange_body("tid=background"));
		})
		.await;
	let task = refresher.spawn_background(StdDuration::from_millis(50));

	tokio::time::sleep(StdDuration::from_millis(300)).await;
	task.shutdown().await;

	let calls = exchange.calls_async().await;

	assert!(calls >= 1);
	assert!(refresher.snapshot().has_credential);

	tokio::time::sleep(StdDuration::from_millis(200)).await;

	assert_eq!(exchange.calls_async().await, calls);
}
