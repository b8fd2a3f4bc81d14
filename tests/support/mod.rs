//! Shared fakes for integration tests: a scripted transport that records every request and
//! a manually advanced clock.

#![allow(dead_code)]

// std
use std::{
	io,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};
// crates.io
use parking_lot::Mutex;
use time::{OffsetDateTime, macros::datetime};
use tokio::time::Instant;
// self
use resilient_api_client::{
	clock::Clock,
	config::ClientConfig,
	connectivity::ConnectivityMonitor,
	error::TransportError,
	http::{ApiRequest, ApiResponse, HttpTransport, Method, TransportFuture},
	pipeline::RequestPipeline,
	retry::RetryPolicy,
	store::{KeyValueStore, MemoryStore},
};

pub const BASE_URL: &str = "https://api.example.com/";
pub const REFRESH_PATH: &str = "/auth/refresh/";

type Responder = dyn Fn(&ApiRequest, usize) -> Result<ApiResponse, TransportError> + Send + Sync;

/// Transport answering through a closure and recording every request it saw.
///
/// The closure receives the request and the number of earlier requests to the same path.
pub struct FakeServer {
	responder: Box<Responder>,
	delay: Mutex<Duration>,
	requests: Mutex<Vec<ApiRequest>>,
	sent_at: Mutex<Vec<Instant>>,
	calls: AtomicUsize,
}
impl FakeServer {
	pub fn new<F>(responder: F) -> Arc<Self>
	where
		F: 'static + Fn(&ApiRequest, usize) -> Result<ApiResponse, TransportError> + Send + Sync,
	{
		Arc::new(Self {
			responder: Box::new(responder),
			delay: Mutex::new(Duration::ZERO),
			requests: Mutex::new(Vec::new()),
			sent_at: Mutex::new(Vec::new()),
			calls: AtomicUsize::new(0),
		})
	}

	/// Every request waits `delay` before its reply is produced.
	pub fn set_delay(&self, delay: Duration) {
		*self.delay.lock() = delay;
	}

	pub fn requests(&self) -> Vec<ApiRequest> {
		self.requests.lock().clone()
	}

	/// Gaps between consecutive requests, measured on the tokio clock.
	pub fn gaps(&self) -> Vec<Duration> {
		self.sent_at.lock().windows(2).map(|pair| pair[1] - pair[0]).collect()
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	pub fn calls_to(&self, method: Method, path: &str) -> usize {
		self.requests
			.lock()
			.iter()
			.filter(|request| request.method == method && request.url.path() == path)
			.count()
	}

	pub fn refresh_calls(&self) -> usize {
		self.calls_to(Method::Post, REFRESH_PATH)
	}
}
impl HttpTransport for FakeServer {
	fn send(&self, request: ApiRequest) -> TransportFuture<'_> {
		Box::pin(async move {
			let seen = {
				let mut requests = self.requests.lock();
				let seen = requests.iter().filter(|r| r.url.path() == request.url.path()).count();

				requests.push(request.clone());
				self.sent_at.lock().push(Instant::now());

				seen
			};

			self.calls.fetch_add(1, Ordering::SeqCst);

			let delay = *self.delay.lock();

			if !delay.is_zero() {
				tokio::time::sleep(delay).await;
			}

			(self.responder)(&request, seen)
		})
	}
}

pub fn network_down() -> TransportError {
	TransportError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"))
}

pub fn json(status: u16, body: serde_json::Value) -> Result<ApiResponse, TransportError> {
	Ok(ApiResponse::json_body(status, &body))
}

pub fn status(status: u16) -> Result<ApiResponse, TransportError> {
	Ok(ApiResponse::new(status))
}

/// Answers the refresh endpoint with `access-<n>`/`refresh-<n>` pairs.
pub fn refresh_reply(seen: usize) -> Result<ApiResponse, TransportError> {
	json(
		200,
		serde_json::json!({ "access": format!("access-{}", seen + 1), "refresh": format!("refresh-{}", seen + 1) }),
	)
}

pub fn is_refresh(request: &ApiRequest) -> bool {
	request.method == Method::Post && request.url.path() == REFRESH_PATH
}

/// Clock that only moves when told to.
pub struct ManualClock(Mutex<OffsetDateTime>);
impl ManualClock {
	pub fn new() -> Arc<Self> {
		Arc::new(Self(Mutex::new(datetime!(2025-11-10 12:00 UTC))))
	}

	pub fn advance(&self, by: Duration) {
		*self.0.lock() += by;
	}
}
impl Clock for ManualClock {
	fn now(&self) -> OffsetDateTime {
		*self.0.lock()
	}
}

pub fn config(retry: RetryPolicy) -> ClientConfig {
	ClientConfig::builder(BASE_URL).retry(retry).build().expect("Test config should build.")
}

pub struct Harness {
	pub pipeline: RequestPipeline,
	pub server: Arc<FakeServer>,
	pub store: MemoryStore,
	pub clock: Arc<ManualClock>,
	pub network: ConnectivityMonitor,
}

pub fn harness(config: ClientConfig, server: Arc<FakeServer>) -> Harness {
	harness_with_store(config, server, MemoryStore::default())
}

pub fn harness_with_store(config: ClientConfig, server: Arc<FakeServer>, store: MemoryStore) -> Harness {
	let clock = ManualClock::new();
	let network = ConnectivityMonitor::default();
	let pipeline = RequestPipeline::builder(config)
		.transport(server.clone())
		.store(Arc::new(store.clone()) as Arc<dyn KeyValueStore>)
		.clock(clock.clone())
		.connectivity(network.subscribe())
		.build()
		.expect("Test pipeline should build.");

	Harness { pipeline, server, store, clock, network }
}
