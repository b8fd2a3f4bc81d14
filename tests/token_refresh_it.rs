mod support;

// std
use std::time::Duration;
// crates.io
use futures_util::future::join_all;
use serde_json::json;
// self
use resilient_api_client::{
	auth::{Credentials, EndReason, SessionState},
	classify::ErrorCode,
	clock::Clock,
	config::ClientConfig,
	http::{ApiRequest, Method},
	request::RequestDescriptor,
	retry::RetryPolicy,
};
use support::*;

fn bearer_is(request: &ApiRequest, token: &str) -> bool {
	request.bearer_token() == Some(token)
}

#[tokio::test(start_paused = true)]
async fn concurrent_401s_trigger_exactly_one_refresh() {
	let server = FakeServer::new(|request, seen| {
		if is_refresh(request) {
			return refresh_reply(seen);
		}
		if bearer_is(request, "access-1") {
			json(200, json!({ "ok": true }))
		} else {
			status(401)
		}
	});

	server.set_delay(Duration::from_millis(50));

	let h = harness(config(RetryPolicy::default()), server);

	h.pipeline.tokens().login(Credentials::new("access-0", "refresh-0")).await.expect("Login.");

	let results = join_all(
		(0..10).map(|_| h.pipeline.send(RequestDescriptor::get("/bookings/"))),
	)
	.await;

	for result in results {
		let response = result.expect("Every request should recover with the new token.");

		assert_eq!(response.status, 200);
	}

	assert_eq!(h.server.refresh_calls(), 1);
	assert_eq!(h.server.calls_to(Method::Get, "/bookings/"), 20);
	assert_eq!(h.pipeline.tokens().metrics().attempts(), 1);
	assert_eq!(h.pipeline.tokens().metrics().successes(), 1);
}

#[tokio::test]
async fn unauthorized_then_refresh_then_original_body() {
	let server = FakeServer::new(|request, seen| match (is_refresh(request), seen) {
		(true, seen) => refresh_reply(seen),
		(false, 0) => status(401),
		(false, _) => json(200, json!({ "id": 5, "room": "Atrium" })),
	});
	let h = harness(config(RetryPolicy::default()), server);

	h.pipeline.tokens().login(Credentials::new("access-0", "refresh-0")).await.expect("Login.");

	let body: serde_json::Value = h
		.pipeline
		.send_json(RequestDescriptor::get("/bookings/5/"))
		.await
		.expect("Caller should receive the intended body.");

	assert_eq!(body, json!({ "id": 5, "room": "Atrium" }));
	assert_eq!(h.server.refresh_calls(), 1);

	let requests = h.server.requests();
	let refresh = requests.iter().find(|r| is_refresh(r)).expect("Refresh should be sent.");

	assert_eq!(refresh.json_body(), Some(json!({ "refresh": "refresh-0" })));
	assert_eq!(refresh.header("authorization"), None);
	assert_eq!(requests.last().and_then(ApiRequest::bearer_token), Some("access-1"));
	assert_eq!(
		h.store.snapshot("api_client.credentials").map(|raw| raw.contains("access-1")),
		Some(true)
	);
}

#[tokio::test]
async fn failed_refresh_surfaces_auth_error_and_ends_session() {
	let server = FakeServer::new(|request, _| if is_refresh(request) { status(400) } else { status(401) });
	let h = harness(config(RetryPolicy::default()), server);
	let mut session = h.pipeline.tokens().subscribe();

	h.pipeline.tokens().login(Credentials::new("access-0", "refresh-0")).await.expect("Login.");

	let error = h
		.pipeline
		.send(RequestDescriptor::get("/bookings/"))
		.await
		.expect_err("A failed refresh should surface.");

	assert_eq!(error.code, ErrorCode::Auth);
	assert_eq!(h.server.refresh_calls(), 1);
	assert_eq!(h.server.calls_to(Method::Get, "/bookings/"), 1);
	assert_eq!(h.pipeline.tokens().credentials(), None);
	assert_eq!(h.store.snapshot("api_client.credentials"), None);
	assert_eq!(
		*session.borrow_and_update(),
		SessionState::Ended { reason: EndReason::RefreshFailed }
	);
}

#[tokio::test]
async fn second_401_is_not_refreshed_again() {
	let server =
		FakeServer::new(|request, seen| if is_refresh(request) { refresh_reply(seen) } else { status(401) });
	let h = harness(config(RetryPolicy::default()), server);

	h.pipeline.tokens().login(Credentials::new("access-0", "refresh-0")).await.expect("Login.");

	let error = h
		.pipeline
		.send(RequestDescriptor::get("/bookings/"))
		.await
		.expect_err("A persistent 401 should surface.");

	assert_eq!(error.code, ErrorCode::Auth);
	assert_eq!(h.server.refresh_calls(), 1);
	assert_eq!(h.server.calls_to(Method::Get, "/bookings/"), 2);
}

#[tokio::test]
async fn anonymous_requests_surface_401_without_refresh() {
	let server = FakeServer::new(|request, seen| if is_refresh(request) { refresh_reply(seen) } else { status(401) });
	let h = harness(config(RetryPolicy::default()), server);

	h.pipeline.tokens().login(Credentials::new("access-0", "refresh-0")).await.expect("Login.");

	let error = h
		.pipeline
		.send(RequestDescriptor::post("/auth/login/").anonymous())
		.await
		.expect_err("Bad login credentials should surface.");

	assert_eq!(error.code, ErrorCode::Auth);
	assert_eq!(h.server.refresh_calls(), 0);
	assert_eq!(h.server.requests()[0].header("authorization"), None);
}

#[tokio::test(start_paused = true)]
async fn timed_out_request_does_not_cancel_refresh() {
	let server = FakeServer::new(|request, seen| {
		if is_refresh(request) {
			return refresh_reply(seen);
		}
		if bearer_is(request, "access-1") { json(200, json!([])) } else { status(401) }
	});

	server.set_delay(Duration::from_millis(200));

	let h = harness(config(RetryPolicy::default()), server);

	h.pipeline.tokens().login(Credentials::new("access-0", "refresh-0")).await.expect("Login.");

	let error = h
		.pipeline
		.send(RequestDescriptor::get("/bookings/").with_timeout(Duration::from_millis(300)))
		.await
		.expect_err("The deadline should expire while the refresh is in flight.");

	assert_eq!(error.code, ErrorCode::Timeout);
	assert_eq!(h.server.refresh_calls(), 1);

	tokio::time::sleep(Duration::from_millis(200)).await;

	let credentials = h.pipeline.tokens().credentials().expect("Refresh should have completed.");

	assert_eq!(credentials.access.expose(), "access-1");

	let response = h
		.pipeline
		.send(RequestDescriptor::get("/bookings/"))
		.await
		.expect("Later requests should reuse the refreshed pair.");

	assert_eq!(response.status, 200);
	assert_eq!(h.server.refresh_calls(), 1);
}

#[tokio::test]
async fn expiring_credentials_are_refreshed_before_sending() {
	let server = FakeServer::new(|request, seen| {
		if is_refresh(request) {
			return refresh_reply(seen);
		}
		if bearer_is(request, "access-1") { json(200, json!([])) } else { status(401) }
	});
	let config = ClientConfig::builder(BASE_URL)
		.preemptive_refresh(Duration::from_secs(60))
		.build()
		.expect("Config should build.");
	let h = harness(config, server);
	let expires_at = h.clock.now() + time::Duration::seconds(30);

	h.pipeline
		.tokens()
		.login(Credentials::new("access-0", "refresh-0").with_expires_at(expires_at))
		.await
		.expect("Login.");
	h.pipeline.send(RequestDescriptor::get("/bookings/")).await.expect("Request should succeed.");

	assert_eq!(h.server.refresh_calls(), 1);
	assert_eq!(h.server.calls_to(Method::Get, "/bookings/"), 1);
}

fn expiring_config() -> ClientConfig {
	ClientConfig::builder(BASE_URL)
		.retry(RetryPolicy::disabled())
		.preemptive_refresh(Duration::from_secs(60))
		.build()
		.expect("Config should build.")
}

#[tokio::test]
async fn offline_delete_with_expiring_credentials_is_queued_and_session_survives() {
	let h = harness(expiring_config(), FakeServer::new(|_, _| Err(network_down())));
	let expires_at = h.clock.now() + time::Duration::seconds(30);

	h.pipeline
		.tokens()
		.login(Credentials::new("access-0", "refresh-0").with_expires_at(expires_at))
		.await
		.expect("Login.");
	h.network.set_offline();

	let error = h
		.pipeline
		.send(RequestDescriptor::delete("/bookings/5/"))
		.await
		.expect_err("Offline mutations should be deferred.");

	assert_eq!(error.code, ErrorCode::Offline);
	assert!(error.is_queued());
	assert_eq!(h.pipeline.queue().len().await, Ok(1));
	assert_eq!(h.server.refresh_calls(), 0);
	assert_eq!(
		h.pipeline.tokens().credentials().map(|credentials| credentials.access.expose().to_owned()),
		Some("access-0".to_owned())
	);
	assert_eq!(h.pipeline.tokens().session(), SessionState::Active);
}

#[tokio::test]
async fn failed_early_refresh_still_sends_with_the_current_token() {
	let server = FakeServer::new(|request, _| {
		if is_refresh(request) {
			return status(503);
		}
		if bearer_is(request, "access-0") { json(200, json!([])) } else { status(401) }
	});
	let h = harness(expiring_config(), server);
	let expires_at = h.clock.now() + time::Duration::seconds(30);

	h.pipeline
		.tokens()
		.login(Credentials::new("access-0", "refresh-0").with_expires_at(expires_at))
		.await
		.expect("Login.");

	let response = h
		.pipeline
		.send(RequestDescriptor::get("/bookings/"))
		.await
		.expect("The still-valid token should be used after the early refresh fails.");

	assert_eq!(response.status, 200);
	assert_eq!(h.server.refresh_calls(), 1);
	assert_eq!(h.server.calls_to(Method::Get, "/bookings/"), 1);
	assert_eq!(h.pipeline.tokens().session(), SessionState::Active);
}
