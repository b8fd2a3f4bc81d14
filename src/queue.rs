//! Durable FIFO of mutations made while offline.
//!
//! The whole queue lives under a single store key as an ordered JSON list of
//! `{id, url, options: {method, headers, body}, timestamp}` records. Writers go through a
//! read-modify-write guard so an enqueue racing a drain is never lost, and drains are
//! serialized by a second guard that is never held across the write guard's network-free
//! critical sections. Delivery is at-least-once: an action is removed only after its replay
//! succeeded.

// crates.io
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
// self
use crate::{
	_prelude::*,
	classify::ApiError,
	clock::Clock,
	config::ClientConfig,
	http::Method,
	obs::{self, OpKind, OpOutcome, OpSpan},
	request::RequestDescriptor,
	store::{self, KeyValueStore, StoreError},
};

/// Request parts persisted for replay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueuedOptions {
	/// HTTP method.
	pub method: Method,
	/// Caller headers, lower-cased. Credentials are never persisted.
	#[serde(default)]
	pub headers: BTreeMap<String, String>,
	/// JSON body, if any.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub body: Option<serde_json::Value>,
}

/// One persisted mutation awaiting replay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
	/// Unique id; matches the idempotency key unless another queued action already used it.
	pub id: String,
	/// Absolute target URL.
	pub url: String,
	/// Method, headers, and body.
	pub options: QueuedOptions,
	/// Enqueue instant.
	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,
}
impl QueuedAction {
	/// Rebuilds a descriptor for replay. Replays are never queued again.
	pub fn to_descriptor(&self) -> RequestDescriptor {
		let mut descriptor =
			RequestDescriptor::new(self.options.method, self.url.clone()).without_offline_queue();

		descriptor.headers = self.options.headers.clone();
		descriptor.body = self.options.body.clone();

		descriptor
	}

	fn is_expired(&self, now: OffsetDateTime, max_age: Option<Duration>) -> bool {
		max_age.is_some_and(|max_age| now - self.timestamp > max_age)
	}
}

/// What a drain did with each action it looked at.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DrainReport {
	/// Ids replayed successfully and removed.
	pub delivered: Vec<String>,
	/// Ids whose replay failed; they stay queued.
	pub failed: Vec<(String, ApiError)>,
	/// Ids dropped unsent because they outlived the maximum age.
	pub expired: Vec<String>,
}
impl DrainReport {
	/// Returns `true` when nothing failed.
	pub fn is_clean(&self) -> bool {
		self.failed.is_empty()
	}

	/// Number of actions the drain looked at.
	pub fn total(&self) -> usize {
		self.delivered.len() + self.failed.len() + self.expired.len()
	}
}

/// Persistent queue of offline mutations.
///
/// Cheap to clone; clones share the same guards.
#[derive(Clone)]
pub struct OfflineQueue {
	inner: Arc<QueueInner>,
}
impl OfflineQueue {
	/// Creates a queue persisting under `key`.
	pub fn new(
		store: Arc<dyn KeyValueStore>,
		clock: Arc<dyn Clock>,
		key: impl Into<String>,
		max_age: Option<Duration>,
	) -> Self {
		Self {
			inner: Arc::new(QueueInner {
				store,
				clock,
				key: key.into(),
				max_age,
				write: AsyncMutex::new(()),
				drain: AsyncMutex::new(()),
			}),
		}
	}

	/// Creates a queue using the configured key and maximum age.
	pub fn from_config(
		config: &ClientConfig,
		store: Arc<dyn KeyValueStore>,
		clock: Arc<dyn Clock>,
	) -> Self {
		Self::new(store, clock, config.queue_key.clone(), config.queue_max_age)
	}

	/// Persists `descriptor` (resolved to `url`) under a fresh id.
	pub async fn enqueue(
		&self,
		url: &Url,
		descriptor: &RequestDescriptor,
	) -> Result<QueuedAction, StoreError> {
		self.enqueue_with_id(new_action_id(), url, descriptor).await
	}

	/// Persists `descriptor` under `id`, typically its idempotency key.
	///
	/// Ids are unique within the queue: when `id` is already taken the action gets a fresh
	/// one, while its headers (and so its idempotency key) stay as given.
	pub async fn enqueue_with_id(
		&self,
		id: impl Into<String>,
		url: &Url,
		descriptor: &RequestDescriptor,
	) -> Result<QueuedAction, StoreError> {
		let mut headers = descriptor.headers.clone();

		headers.remove("authorization");

		let mut action = QueuedAction {
			id: id.into(),
			url: url.to_string(),
			options: QueuedOptions {
				method: descriptor.method,
				headers,
				body: descriptor.body.clone(),
			},
			timestamp: self.inner.clock.now(),
		};
		let _write = self.inner.write.lock().await;
		let mut actions = self.inner.load().await?;

		if actions.iter().any(|queued| queued.id == action.id) {
			action.id = new_action_id();
		}

		actions.push(action.clone());
		self.inner.save(&actions).await?;
		obs::action_queued(action.options.method, &action.id);

		Ok(action)
	}

	/// Returns every queued action in FIFO order.
	pub async fn list(&self) -> Result<Vec<QueuedAction>, StoreError> {
		let _write = self.inner.write.lock().await;

		self.inner.load().await
	}

	/// Number of queued actions.
	pub async fn len(&self) -> Result<usize, StoreError> {
		Ok(self.list().await?.len())
	}

	/// Returns `true` when nothing is queued.
	pub async fn is_empty(&self) -> Result<bool, StoreError> {
		Ok(self.list().await?.is_empty())
	}

	/// Removes the action with `id`. Returns `false` when it was not queued.
	pub async fn discard(&self, id: &str) -> Result<bool, StoreError> {
		self.inner.remove(id).await
	}

	/// Drops every queued action.
	pub async fn clear(&self) -> Result<(), StoreError> {
		let _write = self.inner.write.lock().await;

		self.inner.save(&[]).await
	}

	/// Replays queued actions in FIFO order through `send`.
	///
	/// Successes are removed, failures stay queued and the drain moves on to the next
	/// action, expired actions are dropped without being sent. Actions enqueued after the
	/// drain started wait for the next drain. Concurrent drains run one after another.
	pub async fn drain<F, Fut, T>(&self, mut send: F) -> Result<DrainReport, StoreError>
	where
		F: FnMut(QueuedAction) -> Fut,
		Fut: Future<Output = Result<T, ApiError>>,
	{
		const KIND: OpKind = OpKind::Replay;

		let _drain = self.inner.drain.lock().await;
		let span = OpSpan::new(KIND, "drain");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async {
				let pending = self.list().await?;
				let mut report = DrainReport::default();

				for action in pending {
					let id = action.id.clone();

					if action.is_expired(self.inner.clock.now(), self.inner.max_age) {
						self.inner.remove(&id).await?;
						obs::action_dropped(&id, "expired");
						report.expired.push(id);

						continue;
					}
					// Discarded while earlier actions were being replayed.
					if !self.inner.contains(&id).await? {
						continue;
					}

					match send(action).await {
						Ok(_) => {
							self.inner.remove(&id).await?;
							report.delivered.push(id);
						},
						Err(error) => report.failed.push((id, error)),
					}
				}

				Ok(report)
			})
			.await;

		match &result {
			Ok(report) if report.is_clean() => obs::record_op_outcome(KIND, OpOutcome::Success),
			_ => obs::record_op_outcome(KIND, OpOutcome::Failure),
		}

		result
	}
}
impl Debug for OfflineQueue {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OfflineQueue")
			.field("key", &self.inner.key)
			.field("max_age", &self.inner.max_age)
			.finish_non_exhaustive()
	}
}

struct QueueInner {
	store: Arc<dyn KeyValueStore>,
	clock: Arc<dyn Clock>,
	key: String,
	max_age: Option<Duration>,
	write: AsyncMutex<()>,
	drain: AsyncMutex<()>,
}
impl QueueInner {
	async fn load(&self) -> Result<Vec<QueuedAction>, StoreError> {
		Ok(store::load_json(self.store.as_ref(), &self.key).await?.unwrap_or_default())
	}

	async fn save(&self, actions: &[QueuedAction]) -> Result<(), StoreError> {
		if actions.is_empty() {
			self.store.remove(&self.key).await?;
		} else {
			store::save_json(self.store.as_ref(), &self.key, actions).await?;
		}

		obs::record_queue_depth(actions.len());

		Ok(())
	}

	async fn contains(&self, id: &str) -> Result<bool, StoreError> {
		let _write = self.write.lock().await;

		Ok(self.load().await?.iter().any(|action| action.id == id))
	}

	async fn remove(&self, id: &str) -> Result<bool, StoreError> {
		let _write = self.write.lock().await;
		let mut actions = self.load().await?;
		let before = actions.len();

		actions.retain(|action| action.id != id);

		if actions.len() == before {
			return Ok(false);
		}

		self.save(&actions).await?;

		Ok(true)
	}
}

/// Generates a 128-bit random id, URL-safe base64 without padding.
pub fn new_action_id() -> String {
	let mut bytes = [0_u8; 16];

	rand::rng().fill_bytes(&mut bytes);

	URL_SAFE_NO_PAD.encode(bytes)
}
