//! Client configuration: endpoints, deadlines, retry policy, and storage keys.
//!
//! [`ClientConfig`] can be built in code through [`ClientConfigBuilder`] or loaded from JSON
//! with [`ClientConfig::from_json_str`]. Durations serialize as integer milliseconds.

// self
use crate::{_prelude::*, error::ConfigError, retry::RetryPolicy};

/// Validated client configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
	/// Base URL every relative request path is joined onto. Always ends with `/`.
	pub base_url: Url,
	/// Default deadline for a whole logical call, retries included.
	#[serde(default = "defaults::request_timeout", with = "duration_ms")]
	pub request_timeout: Duration,
	/// Refresh endpoint path relative to the base URL.
	#[serde(default = "defaults::refresh_path")]
	pub refresh_path: String,
	/// Backoff schedule for transient failures.
	#[serde(default)]
	pub retry: RetryPolicy,
	/// Refresh proactively when credentials expire within this window. Zero disables it.
	#[serde(default, with = "duration_ms")]
	pub preemptive_refresh: Duration,
	/// Header carrying idempotency keys on non-idempotent mutations; `None` disables keys.
	#[serde(default = "defaults::idempotency_header")]
	pub idempotency_header: Option<String>,
	/// Queued actions older than this are dropped instead of replayed; `None` keeps them.
	#[serde(default = "defaults::queue_max_age", with = "duration_ms::option")]
	pub queue_max_age: Option<Duration>,
	/// Store key holding the credential pair.
	#[serde(default = "defaults::credentials_key")]
	pub credentials_key: String,
	/// Store key holding the offline queue.
	#[serde(default = "defaults::queue_key")]
	pub queue_key: String,
}
impl ClientConfig {
	/// Starts a builder for `base_url`.
	pub fn builder(base_url: impl Into<String>) -> ClientConfigBuilder {
		ClientConfigBuilder::new(base_url)
	}

	/// Builds a configuration with defaults for everything except the base URL.
	pub fn new(base_url: impl Into<String>) -> Result<Self, ConfigError> {
		Self::builder(base_url).build()
	}

	/// Parses and validates a JSON document.
	pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
		let de = &mut serde_json::Deserializer::from_str(raw);
		let config: Self = serde_path_to_error::deserialize(de)
			.map_err(|e| ConfigError::Parse { message: e.to_string() })?;

		config.validated()
	}

	/// Resolves a request target: absolute URLs pass through, paths join onto the base URL.
	pub fn resolve(&self, target: &str) -> Result<Url, ConfigError> {
		if let Ok(url) = Url::parse(target) {
			return Ok(url);
		}

		self.base_url
			.join(target.trim_start_matches('/'))
			.map_err(|source| ConfigError::InvalidPath { path: target.to_owned(), source })
	}

	/// Absolute refresh endpoint URL.
	pub fn refresh_url(&self) -> Result<Url, ConfigError> {
		self.resolve(&self.refresh_path)
	}

	pub(crate) fn validated(mut self) -> Result<Self, ConfigError> {
		self.base_url = normalize_base(self.base_url)?;
		self.retry.validate()?;
		self.refresh_url()?;

		Ok(self)
	}
}

/// Builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientConfigBuilder {
	base_url: String,
	request_timeout: Duration,
	refresh_path: String,
	retry: RetryPolicy,
	preemptive_refresh: Duration,
	idempotency_header: Option<String>,
	queue_max_age: Option<Duration>,
	credentials_key: String,
	queue_key: String,
}
impl ClientConfigBuilder {
	/// Creates a builder seeded with defaults.
	pub fn new(base_url: impl Into<String>) -> Self {
		Self {
			base_url: base_url.into(),
			request_timeout: defaults::request_timeout(),
			refresh_path: defaults::refresh_path(),
			retry: RetryPolicy::default(),
			preemptive_refresh: Duration::ZERO,
			idempotency_header: defaults::idempotency_header(),
			queue_max_age: defaults::queue_max_age(),
			credentials_key: defaults::credentials_key(),
			queue_key: defaults::queue_key(),
		}
	}

	/// Sets the default deadline for a whole logical call.
	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;

		self
	}

	/// Sets the refresh endpoint path.
	pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
		self.refresh_path = path.into();

		self
	}

	/// Sets the retry policy.
	pub fn retry(mut self, policy: RetryPolicy) -> Self {
		self.retry = policy;

		self
	}

	/// Enables proactive refresh within `window` of expiry.
	pub fn preemptive_refresh(mut self, window: Duration) -> Self {
		self.preemptive_refresh = window;

		self
	}

	/// Sets (or with `None`, disables) the idempotency key header.
	pub fn idempotency_header(mut self, header: Option<impl Into<String>>) -> Self {
		self.idempotency_header = header.map(Into::into);

		self
	}

	/// Sets (or with `None`, disables) queued action expiry.
	pub fn queue_max_age(mut self, max_age: Option<Duration>) -> Self {
		self.queue_max_age = max_age;

		self
	}

	/// Overrides the store key holding credentials.
	pub fn credentials_key(mut self, key: impl Into<String>) -> Self {
		self.credentials_key = key.into();

		self
	}

	/// Overrides the store key holding the offline queue.
	pub fn queue_key(mut self, key: impl Into<String>) -> Self {
		self.queue_key = key.into();

		self
	}

	/// Validates and produces the configuration.
	pub fn build(self) -> Result<ClientConfig, ConfigError> {
		let base_url =
			Url::parse(&self.base_url).map_err(|source| ConfigError::InvalidBaseUrl { source })?;

		ClientConfig {
			base_url,
			request_timeout: self.request_timeout,
			refresh_path: self.refresh_path,
			retry: self.retry,
			preemptive_refresh: self.preemptive_refresh,
			idempotency_header: self.idempotency_header,
			queue_max_age: self.queue_max_age,
			credentials_key: self.credentials_key,
			queue_key: self.queue_key,
		}
		.validated()
	}
}

fn normalize_base(mut url: Url) -> Result<Url, ConfigError> {
	if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
		return Err(ConfigError::UnsupportedBaseUrl { url: url.to_string() });
	}
	if !url.path().ends_with('/') {
		let path = format!("{}/", url.path());

		url.set_path(&path);
	}

	Ok(url)
}

mod defaults {
	// self
	use crate::_prelude::*;

	pub(super) fn request_timeout() -> Duration {
		Duration::from_secs(30)
	}

	pub(super) fn refresh_path() -> String {
		"auth/refresh/".into()
	}

	pub(super) fn idempotency_header() -> Option<String> {
		Some("Idempotency-Key".into())
	}

	pub(super) fn queue_max_age() -> Option<Duration> {
		Some(Duration::from_secs(7 * 24 * 60 * 60))
	}

	pub(super) fn credentials_key() -> String {
		"api_client.credentials".into()
	}

	pub(super) fn queue_key() -> String {
		"api_client.offline_queue".into()
	}
}

/// Serde adapter storing [`Duration`] as integer milliseconds.
pub(crate) mod duration_ms {
	// crates.io
	use serde::{Deserializer, Serializer};
	// self
	use crate::_prelude::*;

	pub(crate) fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
	}

	pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		u64::deserialize(deserializer).map(Duration::from_millis)
	}

	pub(crate) mod option {
		// crates.io
		use serde::{Deserializer, Serializer};
		// self
		use crate::_prelude::*;

		pub(crate) fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
		where
			S: Serializer,
		{
			match value {
				Some(value) => super::serialize(value, serializer),
				None => serializer.serialize_none(),
			}
		}

		pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
		where
			D: Deserializer<'de>,
		{
			Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn base_url_gains_trailing_slash_and_paths_join_under_it() {
		let config = ClientConfig::new("https://api.example.com/v1").expect("Config should build.");

		assert_eq!(config.base_url.as_str(), "https://api.example.com/v1/");
		assert_eq!(
			config.resolve("/bookings/5/").expect("Path should resolve.").as_str(),
			"https://api.example.com/v1/bookings/5/"
		);
		assert_eq!(
			config.refresh_url().expect("Refresh URL should resolve.").as_str(),
			"https://api.example.com/v1/auth/refresh/"
		);
		assert_eq!(
			config.resolve("https://cdn.example.com/a").expect("Absolute URL should pass.").as_str(),
			"https://cdn.example.com/a"
		);
	}

	#[test]
	fn rejects_non_http_bases_and_bad_policies() {
		assert!(matches!(
			ClientConfig::new("ftp://files.example.com/"),
			Err(ConfigError::UnsupportedBaseUrl { .. })
		));
		assert!(matches!(ClientConfig::new("not a url"), Err(ConfigError::InvalidBaseUrl { .. })));
		assert!(matches!(
			ClientConfig::builder("https://api.example.com/")
				.retry(RetryPolicy::default().with_multiplier(0.0))
				.build(),
			Err(ConfigError::InvalidRetryPolicy { .. })
		));
	}

	#[test]
	fn json_config_fills_defaults_and_reports_paths() {
		let config = ClientConfig::from_json_str(
			r#"{ "base_url": "http://localhost:8000/api", "retry": { "max_retries": 5 }, "queue_max_age": null }"#,
		)
		.expect("Config JSON should parse.");

		assert_eq!(config.base_url.as_str(), "http://localhost:8000/api/");
		assert_eq!(config.retry.max_retries, 5);
		assert_eq!(config.retry.base_delay, RetryPolicy::default().base_delay);
		assert_eq!(config.request_timeout, Duration::from_secs(30));
		assert_eq!(config.queue_max_age, None);
		assert_eq!(config.idempotency_header.as_deref(), Some("Idempotency-Key"));

		let err = ClientConfig::from_json_str(
			r#"{ "base_url": "http://localhost/", "retry": { "base_delay": "fast" } }"#,
		)
		.expect_err("Wrong types should be rejected.");

		assert!(err.to_string().contains("retry.base_delay"));
	}
}
