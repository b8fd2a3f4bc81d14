//! Key/value storage contract used for credentials and the offline queue, plus the
//! built-in backends.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// crates.io
use serde::de::DeserializeOwned;
// self
use crate::_prelude::*;

/// Boxed future returned by [`KeyValueStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Durable string key/value storage.
///
/// Each `set` must replace the value for `key` atomically: readers observe either the old
/// or the new value, never a partial write.
pub trait KeyValueStore
where
	Self: Send + Sync,
{
	/// Returns the value stored under `key`, if any.
	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

	/// Stores `value` under `key`, replacing any previous value.
	fn set<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()>;

	/// Deletes `key`. Removing a missing key is not an error.
	fn remove<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()>;
}

/// Error type produced by [`KeyValueStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend or by typed helpers.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Reads `key` and deserializes it from JSON.
pub(crate) async fn load_json<T>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>, StoreError>
where
	T: DeserializeOwned,
{
	let Some(raw) = store.get(key).await? else {
		return Ok(None);
	};

	serde_json::from_str(&raw).map(Some).map_err(|e| StoreError::Serialization {
		message: format!("Failed to parse value stored under `{key}`: {e}"),
	})
}

/// Serializes `value` as JSON and stores it under `key`.
pub(crate) async fn save_json<T>(
	store: &dyn KeyValueStore,
	key: &str,
	value: &T,
) -> Result<(), StoreError>
where
	T: ?Sized + Serialize,
{
	let raw = serde_json::to_string(value).map_err(|e| StoreError::Serialization {
		message: format!("Failed to serialize value for `{key}`: {e}"),
	})?;

	store.set(key, raw).await
}
