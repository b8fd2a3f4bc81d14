#![cfg(feature = "reqwest")]

// std
use std::time::Duration;
// crates.io
use httpmock::prelude::*;
use serde_json::json;
// self
use resilient_api_client::{
	auth::Credentials,
	classify::ErrorCode,
	config::ClientConfig,
	http::{ApiRequest, HttpTransport, Method, ReqwestTransport},
	pipeline::RequestPipeline,
	request::RequestDescriptor,
	retry::RetryPolicy,
	url::Url,
};

fn pipeline(base_url: &str) -> RequestPipeline {
	let config = ClientConfig::builder(base_url)
		.retry(RetryPolicy::disabled())
		.request_timeout(Duration::from_secs(5))
		.build()
		.expect("Config should build.");

	RequestPipeline::builder(config).build().expect("Pipeline should build with reqwest.")
}

#[tokio::test]
async fn transport_returns_every_status_as_a_response() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(PUT).path("/bookings/1/").header("x-trace", "t-1").json_body(json!({ "guests": 2 }));
			then.status(503).header("Retry-After", "3").body("busy");
		})
		.await;
	let url = Url::parse(&server.url("/bookings/1/")).expect("Mock URL should parse.");
	let mut request = ApiRequest::new(Method::Put, url);

	request.set_header("X-Trace", "t-1");
	request.set_json_body(&json!({ "guests": 2 })).expect("Body should serialize.");

	let response = ReqwestTransport::default()
		.send(request)
		.await
		.expect("A 503 is a response, not a transport failure.");

	mock.assert_async().await;

	assert_eq!(response.status, 503);
	assert_eq!(response.header("retry-after"), Some("3"));
	assert_eq!(response.text(), "busy");
}

#[tokio::test]
async fn refresh_round_trip_over_http() {
	let server = MockServer::start_async().await;
	let stale = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/bookings/").header("authorization", "Bearer access-0");
			then.status(401);
		})
		.await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST).path("/api/auth/refresh/").json_body(json!({ "refresh": "refresh-0" }));
			then.status(200).json_body(json!({ "access": "access-1", "refresh": "refresh-1" }));
		})
		.await;
	let fresh = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/bookings/").header("authorization", "Bearer access-1");
			then.status(200).json_body(json!([{ "id": 5 }]));
		})
		.await;
	let pipeline = pipeline(&server.url("/api"));

	pipeline
		.tokens()
		.login(Credentials::new("access-0", "refresh-0"))
		.await
		.expect("Login should persist.");

	let bookings: Vec<serde_json::Value> = pipeline
		.send_json(RequestDescriptor::get("/bookings/"))
		.await
		.expect("Request should recover after refreshing.");

	stale.assert_async().await;
	refresh.assert_async().await;
	fresh.assert_async().await;

	assert_eq!(bookings, [json!({ "id": 5 })]);
	assert_eq!(
		pipeline.tokens().credentials().map(|credentials| credentials.access.expose().to_owned()),
		Some("access-1".to_owned())
	);
}

#[tokio::test]
async fn per_call_timeout_can_exceed_the_configured_default() {
	let server = MockServer::start_async().await;
	let slow = server
		.mock_async(|when, then| {
			when.method(GET).path("/reports/");
			then.status(200).delay(Duration::from_secs(2)).json_body(json!({ "ready": true }));
		})
		.await;
	let config = ClientConfig::builder(server.base_url())
		.retry(RetryPolicy::disabled())
		.request_timeout(Duration::from_secs(1))
		.build()
		.expect("Config should build.");
	let pipeline = RequestPipeline::builder(config).build().expect("Pipeline should build.");
	let report: serde_json::Value = pipeline
		.send_json(RequestDescriptor::get("/reports/").with_timeout(Duration::from_secs(5)))
		.await
		.expect("A slow response inside the per-call deadline should be returned.");

	slow.assert_async().await;

	assert_eq!(report, json!({ "ready": true }));

	let error = pipeline
		.send(RequestDescriptor::get("/reports/"))
		.await
		.expect_err("The configured default still bounds calls without an override.");

	assert_eq!(error.code, ErrorCode::Timeout);
}

#[tokio::test]
async fn unreachable_host_is_a_network_error() {
	let pipeline = pipeline("http://127.0.0.1:9/");
	let error = pipeline
		.send(RequestDescriptor::get("/rooms/"))
		.await
		.expect_err("Nothing listens on the discard port.");

	assert!(matches!(error.code, ErrorCode::Network | ErrorCode::Timeout));
	assert!(error.detail("cause").is_some() || error.code == ErrorCode::Timeout);
}
