//! The request pipeline: every outbound call runs through one state machine.
//!
//! ```text
//! Pending -> Sent -> Success
//!                 -> AuthExpired       (first 401: refresh, reattach, resend once)
//!                 -> TransientFailure  (retry policy: sleep, attempt + 1, resend)
//!                 -> PermanentFailure  (offline mutation: queue; otherwise classify)
//! ```
//!
//! The descriptor stays immutable. The attempt counter and the "already refreshed" flag
//! live in the loop, so a persistently rejected token can never cause a refresh loop.

// std
use std::borrow::Cow;
// crates.io
use serde::de::DeserializeOwned;
use tokio::{sync::watch, task::JoinHandle};
// self
use crate::{
	_prelude::*,
	auth::TokenManager,
	classify::{ApiError, ErrorClassifier, Outcome},
	clock::{Clock, SystemClock},
	config::ClientConfig,
	connectivity::Connectivity,
	error::ConfigError,
	http::{ApiResponse, HttpTransport},
	obs::{self, OpKind, OpOutcome, OpSpan},
	queue::{self, DrainReport, OfflineQueue},
	request::RequestDescriptor,
	store::{KeyValueStore, MemoryStore, StoreError},
};

/// Builder for [`RequestPipeline`].
pub struct RequestPipelineBuilder {
	config: ClientConfig,
	transport: Option<Arc<dyn HttpTransport>>,
	store: Option<Arc<dyn KeyValueStore>>,
	clock: Option<Arc<dyn Clock>>,
	connectivity: Option<watch::Receiver<Connectivity>>,
	tokens: Option<TokenManager>,
}
impl RequestPipelineBuilder {
	/// Uses `transport` for every request and for refresh calls.
	pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
		self.transport = Some(transport);

		self
	}

	/// Persists credentials and the offline queue in `store`. Defaults to [`MemoryStore`].
	pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
		self.store = Some(store);

		self
	}

	/// Reads time from `clock`. Defaults to [`SystemClock`].
	pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = Some(clock);

		self
	}

	/// Subscribes to the platform connectivity signal. Without one the pipeline assumes it
	/// is always online and never queues.
	pub fn connectivity(mut self, receiver: watch::Receiver<Connectivity>) -> Self {
		self.connectivity = Some(receiver);

		self
	}

	/// Shares an existing token manager instead of creating one.
	pub fn token_manager(mut self, tokens: TokenManager) -> Self {
		self.tokens = Some(tokens);

		self
	}

	/// Assembles the pipeline.
	pub fn build(self) -> Result<RequestPipeline, ConfigError> {
		let config = self.config.validated()?;
		let transport = match self.transport {
			Some(transport) => transport,
			None => default_transport()?,
		};
		let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::default()));
		let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
		let connectivity =
			self.connectivity.unwrap_or_else(|| watch::channel(Connectivity::Online).1);
		let tokens = match self.tokens {
			Some(tokens) => tokens,
			None => TokenManager::new(&config, transport.clone(), store.clone(), clock.clone())?,
		};
		let queue = OfflineQueue::from_config(&config, store, clock.clone());

		Ok(RequestPipeline {
			inner: Arc::new(PipelineInner {
				classifier: ErrorClassifier::new(clock.clone()),
				config,
				transport,
				tokens,
				queue,
				clock,
				connectivity,
			}),
		})
	}
}
impl Debug for RequestPipelineBuilder {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestPipelineBuilder")
			.field("config", &self.config)
			.field("has_transport", &self.transport.is_some())
			.field("has_store", &self.store.is_some())
			.finish_non_exhaustive()
	}
}

#[cfg(feature = "reqwest")]
fn default_transport() -> Result<Arc<dyn HttpTransport>, ConfigError> {
	// No client-wide timeout: each call's deadline is enforced around the whole send loop.
	Ok(Arc::new(crate::http::ReqwestTransport::new()?))
}

#[cfg(not(feature = "reqwest"))]
fn default_transport() -> Result<Arc<dyn HttpTransport>, ConfigError> {
	Err(ConfigError::MissingTransport)
}

/// Orchestrates credentials, retries, offline queuing, and classification around every call.
///
/// Cheap to clone; clones share the token manager and queue.
#[derive(Clone)]
pub struct RequestPipeline {
	inner: Arc<PipelineInner>,
}
impl RequestPipeline {
	/// Starts a builder.
	pub fn builder(config: ClientConfig) -> RequestPipelineBuilder {
		RequestPipelineBuilder {
			config,
			transport: None,
			store: None,
			clock: None,
			connectivity: None,
			tokens: None,
		}
	}

	/// Sends `descriptor` and returns the successful response or a classified error.
	///
	/// The whole logical call, retries and refresh included, runs under the descriptor's
	/// timeout or the configured default. A timeout never cancels a refresh in flight.
	pub async fn send(&self, descriptor: RequestDescriptor) -> Result<ApiResponse, ApiError> {
		const KIND: OpKind = OpKind::Request;

		let deadline = descriptor.timeout.unwrap_or(self.inner.config.request_timeout);
		let span = OpSpan::new(KIND, "send");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = match tokio::time::timeout(deadline, span.instrument(self.run(&descriptor))).await
		{
			Ok(result) => result,
			Err(_) => Err(self.inner.classifier.classify(&Outcome::DeadlineExceeded { after: deadline })),
		};

		match &result {
			Ok(_) => obs::record_op_outcome(KIND, OpOutcome::Success),
			Err(error) if error.is_queued() => obs::record_op_outcome(KIND, OpOutcome::Queued),
			Err(_) => obs::record_op_outcome(KIND, OpOutcome::Failure),
		}

		result
	}

	/// Sends `descriptor` and decodes the JSON body into `T`.
	///
	/// An empty body decodes as JSON `null`, so `()` and `Option<_>` work for `204`s.
	pub async fn send_json<T>(&self, descriptor: RequestDescriptor) -> Result<T, ApiError>
	where
		T: DeserializeOwned,
	{
		let response = self.send(descriptor).await?;
		let body: &[u8] = if response.body.is_empty() { b"null" } else { &response.body };
		let de = &mut serde_json::Deserializer::from_slice(body);

		serde_path_to_error::deserialize(de).map_err(|e| self.inner.internal(&e))
	}

	/// Replays the offline queue once, in FIFO order.
	pub async fn drain_offline_queue(&self) -> Result<DrainReport, StoreError> {
		self.inner
			.queue
			.drain(|action| {
				let pipeline = self.clone();

				async move { pipeline.send(action.to_descriptor()).await }
			})
			.await
	}

	/// Drains the offline queue every time connectivity comes back.
	///
	/// Changes published since the pipeline was built count too, so a reconnect that raced
	/// the start of this loop still triggers a drain. Resolves when the connectivity sender
	/// is dropped.
	pub async fn replay_on_reconnect(&self) {
		let mut connectivity = self.inner.connectivity.clone();

		while connectivity.changed().await.is_ok() {
			if connectivity.borrow_and_update().is_offline() {
				continue;
			}
			if let Err(e) = self.drain_offline_queue().await {
				obs::storage_failed("offline_queue", &e);
			}
		}
	}

	/// Spawns [`replay_on_reconnect`](Self::replay_on_reconnect) on the current runtime.
	pub fn spawn_replay(&self) -> JoinHandle<()> {
		let pipeline = self.clone();

		tokio::spawn(async move { pipeline.replay_on_reconnect().await })
	}

	/// Token manager shared with this pipeline.
	pub fn tokens(&self) -> &TokenManager {
		&self.inner.tokens
	}

	/// Offline queue used by this pipeline.
	pub fn queue(&self) -> &OfflineQueue {
		&self.inner.queue
	}

	/// Active configuration.
	pub fn config(&self) -> &ClientConfig {
		&self.inner.config
	}

	/// Classifier used to build every returned error.
	pub fn classifier(&self) -> &ErrorClassifier {
		&self.inner.classifier
	}

	async fn run(&self, descriptor: &RequestDescriptor) -> Result<ApiResponse, ApiError> {
		let inner = &self.inner;
		let url = inner.config.resolve(&descriptor.url).map_err(|e| inner.internal(&e))?;
		let descriptor = inner.with_idempotency_key(descriptor);
		let base_request = descriptor.to_request(url.clone()).map_err(|e| inner.internal(&e))?;

		// Still-valid credentials are used as-is when the early refresh is impossible or fails;
		// a real rejection goes through the 401 path below.
		if descriptor.authenticated
			&& !inner.is_offline()
			&& inner.tokens.needs_refresh(inner.config.preemptive_refresh)
		{
			let early = inner.tokens.refresh_preemptive().await;

			if let Err(e) = &early {
				obs::preemptive_refresh_failed(e);
			}
		}

		let mut attempt = 0_u32;
		let mut refreshed = false;

		loop {
			let mut request = base_request.clone();
			let generation =
				if descriptor.authenticated { inner.tokens.attach(&mut request) } else { None };
			let failed = match inner.transport.send(request).await {
				Ok(response) if response.is_success() => return Ok(response),
				Ok(response) if response.status == 401 && descriptor.authenticated && !refreshed => {
					refreshed = true;

					let renewed = match generation {
						Some(generation) => inner.tokens.refresh_stale(generation).await,
						None => inner.tokens.refresh().await,
					};

					if let Err(e) = renewed {
						return Err(inner.classifier.classify(&Outcome::RefreshFailed(&e)));
					}

					continue;
				},
				Err(error) if inner.is_offline() => {
					if descriptor.is_mutating() && descriptor.queue_when_offline {
						return Err(inner.enqueue_offline(&url, &descriptor).await);
					}

					return Err(inner.classifier.classify(&Outcome::Transport(&error)));
				},
				other => other,
			};
			let decision = {
				let outcome = match &failed {
					Ok(response) => Outcome::Response(response),
					Err(error) => Outcome::Transport(error),
				};
				let decision = inner.config.retry.should_retry_at(
					&outcome,
					attempt,
					&descriptor,
					inner.clock.now(),
				);

				if !decision.retry {
					return Err(inner.classifier.classify(&outcome));
				}

				decision
			};

			obs::retry_scheduled(descriptor.method, attempt, decision.delay);
			obs::record_retry_delay(descriptor.method, decision.delay);
			tokio::time::sleep(decision.delay).await;

			attempt += 1;
		}
	}
}
impl Debug for RequestPipeline {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestPipeline")
			.field("base_url", &self.inner.config.base_url.as_str())
			.field("tokens", &self.inner.tokens)
			.field("queue", &self.inner.queue)
			.finish_non_exhaustive()
	}
}

struct PipelineInner {
	config: ClientConfig,
	transport: Arc<dyn HttpTransport>,
	tokens: TokenManager,
	queue: OfflineQueue,
	classifier: ErrorClassifier,
	clock: Arc<dyn Clock>,
	connectivity: watch::Receiver<Connectivity>,
}
impl PipelineInner {
	fn is_offline(&self) -> bool {
		self.connectivity.borrow().is_offline()
	}

	fn internal(&self, error: &(dyn StdError + Send + Sync)) -> ApiError {
		self.classifier.classify(&Outcome::Internal(error))
	}

	// Non-idempotent mutations carry a key from the first send so retries and replays dedupe.
	fn with_idempotency_key<'d>(
		&self,
		descriptor: &'d RequestDescriptor,
	) -> Cow<'d, RequestDescriptor> {
		match &self.config.idempotency_header {
			Some(header)
				if descriptor.is_mutating()
					&& !descriptor.method.is_idempotent()
					&& descriptor.header(header).is_none() =>
				Cow::Owned(descriptor.clone().with_header(header, queue::new_action_id())),
			_ => Cow::Borrowed(descriptor),
		}
	}

	async fn enqueue_offline(&self, url: &Url, descriptor: &RequestDescriptor) -> ApiError {
		let key = self
			.config
			.idempotency_header
			.as_deref()
			.and_then(|header| descriptor.header(header))
			.map(str::to_owned);
		let queued = match key {
			Some(key) => self.queue.enqueue_with_id(key, url, descriptor).await,
			None => self.queue.enqueue(url, descriptor).await,
		};
		let action_id = match &queued {
			Ok(action) => Some(action.id.as_str()),
			Err(e) => {
				obs::storage_failed("offline_queue", e);

				None
			},
		};

		self.classifier.classify(&Outcome::Offline { method: descriptor.method, url, action_id })
	}
}
