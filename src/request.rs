//! Immutable description of one logical call.
//!
//! A descriptor is never mutated while the pipeline works on it: attempt counters and the
//! "already refreshed" flag live in the pipeline's loop, not on the request.

// self
use crate::{
	_prelude::*,
	http::{ApiRequest, Method},
};

/// What the caller wants sent, plus the policy knobs that apply to it.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestDescriptor {
	/// HTTP method.
	pub method: Method,
	/// Path relative to the configured base URL, or an absolute URL.
	pub url: String,
	/// Caller-supplied headers keyed by lower-case name.
	pub headers: BTreeMap<String, String>,
	/// JSON body, if any.
	pub body: Option<serde_json::Value>,
	/// Whether automatic retries are allowed. Derived from the method unless overridden.
	pub idempotent: bool,
	/// Per-request retry budget overriding the policy default.
	pub max_retries: Option<u32>,
	/// Per-request deadline overriding the configured default.
	pub timeout: Option<Duration>,
	/// Whether credentials are attached and 401s trigger a refresh.
	pub authenticated: bool,
	/// Whether a mutation failing while offline is queued for replay.
	pub queue_when_offline: bool,
}
impl RequestDescriptor {
	/// Creates a descriptor with method-derived defaults.
	pub fn new(method: Method, url: impl Into<String>) -> Self {
		Self {
			method,
			url: url.into(),
			headers: BTreeMap::new(),
			body: None,
			idempotent: method.is_idempotent(),
			max_retries: None,
			timeout: None,
			authenticated: true,
			queue_when_offline: true,
		}
	}

	/// `GET` descriptor.
	pub fn get(url: impl Into<String>) -> Self {
		Self::new(Method::Get, url)
	}

	/// `POST` descriptor.
	pub fn post(url: impl Into<String>) -> Self {
		Self::new(Method::Post, url)
	}

	/// `PUT` descriptor.
	pub fn put(url: impl Into<String>) -> Self {
		Self::new(Method::Put, url)
	}

	/// `PATCH` descriptor.
	pub fn patch(url: impl Into<String>) -> Self {
		Self::new(Method::Patch, url)
	}

	/// `DELETE` descriptor.
	pub fn delete(url: impl Into<String>) -> Self {
		Self::new(Method::Delete, url)
	}

	/// Adds a header. Names are stored lower-cased.
	pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
		self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());

		self
	}

	/// Sets a JSON body.
	pub fn with_body(mut self, body: serde_json::Value) -> Self {
		self.body = Some(body);

		self
	}

	/// Serializes `body` into the JSON body.
	pub fn with_json<T>(self, body: &T) -> Result<Self, serde_json::Error>
	where
		T: ?Sized + Serialize,
	{
		Ok(self.with_body(serde_json::to_value(body)?))
	}

	/// Opts a non-idempotent request into automatic retries.
	///
	/// Only do this when the server deduplicates, e.g. through an idempotency key.
	pub fn retry_safe(mut self) -> Self {
		self.idempotent = true;

		self
	}

	/// Overrides the retry budget.
	pub fn with_max_retries(mut self, max_retries: u32) -> Self {
		self.max_retries = Some(max_retries);

		self
	}

	/// Overrides the deadline for the whole logical call.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);

		self
	}

	/// Sends without credentials; a 401 is surfaced instead of refreshed.
	pub fn anonymous(mut self) -> Self {
		self.authenticated = false;

		self
	}

	/// Surfaces offline failures instead of queuing them.
	pub fn without_offline_queue(mut self) -> Self {
		self.queue_when_offline = false;

		self
	}

	/// Returns `true` when the request changes server state.
	pub fn is_mutating(&self) -> bool {
		self.method.is_mutating()
	}

	/// Looks up a caller-supplied header case-insensitively.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
	}

	/// Builds the wire request for `url` (the resolved form of [`Self::url`]).
	pub fn to_request(&self, url: Url) -> Result<ApiRequest, serde_json::Error> {
		let mut request = ApiRequest::new(self.method, url);

		if let Some(body) = &self.body {
			request.set_json_body(body)?;
		}

		request.headers.extend(self.headers.iter().map(|(k, v)| (k.clone(), v.clone())));

		Ok(request)
	}
}
