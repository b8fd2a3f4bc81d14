//! Demonstrates the request pipeline against a local mock booking API: a 401 recovered by a
//! single refresh, then a cancellation made while offline that is replayed on reconnect.

// std
use std::{
	io,
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
	time::Duration,
};
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use serde_json::json;
// self
use resilient_api_client::{
	auth::Credentials,
	config::ClientConfig,
	connectivity::ConnectivityMonitor,
	error::TransportError,
	http::{ApiRequest, HttpTransport, ReqwestTransport, TransportFuture},
	pipeline::RequestPipeline,
	request::RequestDescriptor,
};

/// Reqwest transport with a switch that simulates pulling the network cable.
struct Unpluggable {
	inner: ReqwestTransport,
	unplugged: Arc<AtomicBool>,
}
impl HttpTransport for Unpluggable {
	fn send(&self, request: ApiRequest) -> TransportFuture<'_> {
		if self.unplugged.load(Ordering::SeqCst) {
			return Box::pin(async {
				Err(TransportError::Io(io::Error::new(io::ErrorKind::NotConnected, "cable unplugged")))
			});
		}

		self.inner.send(request)
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let _expired = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/bookings/").header("authorization", "Bearer demo-access-0");
			then.status(401);
		})
		.await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST).path("/api/auth/refresh/");
			then.status(200).json_body(
				json!({ "access": "demo-access-1", "refresh": "demo-refresh-1", "expires_in": 900 }),
			);
		})
		.await;
	let _bookings = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/bookings/").header("authorization", "Bearer demo-access-1");
			then.status(200).json_body(json!([{ "id": 5, "room": "Atrium" }]));
		})
		.await;
	let cancel = server
		.mock_async(|when, then| {
			when.method(DELETE).path("/api/bookings/5/");
			then.status(204);
		})
		.await;
	let unplugged = Arc::new(AtomicBool::new(false));
	let transport = Unpluggable {
		inner: ReqwestTransport::new()?,
		unplugged: unplugged.clone(),
	};
	let network = ConnectivityMonitor::default();
	let pipeline = RequestPipeline::builder(ClientConfig::new(server.url("/api"))?)
		.transport(Arc::new(transport))
		.connectivity(network.subscribe())
		.build()?;
	let replay = pipeline.spawn_replay();

	pipeline.tokens().login(Credentials::new("demo-access-0", "demo-refresh-0")).await?;

	let bookings: serde_json::Value =
		pipeline.send_json(RequestDescriptor::get("/bookings/")).await?;

	refresh.assert_async().await;
	println!("Bookings after one transparent refresh: {bookings}.");

	unplugged.store(true, Ordering::SeqCst);
	network.set_offline();

	match pipeline.send(RequestDescriptor::delete("/bookings/5/")).await {
		Ok(_) => println!("Cancellation went through while offline?"),
		Err(error) => println!("Cancellation deferred: {error} (queued: {}).", error.is_queued()),
	}

	unplugged.store(false, Ordering::SeqCst);
	network.set_online();

	while !pipeline.queue().is_empty().await? {
		tokio::time::sleep(Duration::from_millis(20)).await;
	}

	cancel.assert_async().await;
	println!("Cancellation replayed after reconnecting.");

	drop(network);
	replay.await?;

	Ok(())
}
