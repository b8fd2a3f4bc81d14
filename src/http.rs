//! Transport primitives: the wire-level request/response pair and the pluggable
//! [`HttpTransport`] the pipeline and token manager send through.
//!
//! The transport is the layer's only dependency on an HTTP stack. It must report a
//! failure as [`TransportError`] only when no response was received; every HTTP status,
//! including 4xx and 5xx, comes back as an [`ApiResponse`] so the pipeline can classify it.

// crates.io
use serde::de::DeserializeOwned;
use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, error::TransportError};

/// Boxed future returned by [`HttpTransport::send`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<ApiResponse, TransportError>> + 'a + Send>>;

/// Sends one fully-formed request and returns whatever response the server produced.
///
/// Implementations must be `Send + Sync + 'static` so a single transport can be shared by
/// the pipeline and the token manager's detached refresh task.
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Dispatches `request` exactly once. Implementations must not retry internally.
	fn send(&self, request: ApiRequest) -> TransportFuture<'_>;
}

/// HTTP methods understood by the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
	/// `GET`
	Get,
	/// `HEAD`
	Head,
	/// `OPTIONS`
	Options,
	/// `POST`
	Post,
	/// `PUT`
	Put,
	/// `PATCH`
	Patch,
	/// `DELETE`
	Delete,
}
impl Method {
	/// Returns the canonical upper-case token.
	pub const fn as_str(self) -> &'static str {
		match self {
			Method::Get => "GET",
			Method::Head => "HEAD",
			Method::Options => "OPTIONS",
			Method::Post => "POST",
			Method::Put => "PUT",
			Method::Patch => "PATCH",
			Method::Delete => "DELETE",
		}
	}

	/// Returns `true` when repeating the request cannot change the outcome beyond the first
	/// successful application.
	pub const fn is_idempotent(self) -> bool {
		!matches!(self, Method::Post | Method::Patch)
	}

	/// Returns `true` when the request changes server state.
	pub const fn is_mutating(self) -> bool {
		matches!(self, Method::Post | Method::Put | Method::Patch | Method::Delete)
	}
}
impl Display for Method {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
impl FromStr for Method {
	type Err = UnknownMethod;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let method = match s.to_ascii_uppercase().as_str() {
			"GET" => Method::Get,
			"HEAD" => Method::Head,
			"OPTIONS" => Method::Options,
			"POST" => Method::Post,
			"PUT" => Method::Put,
			"PATCH" => Method::Patch,
			"DELETE" => Method::Delete,
			_ => return Err(UnknownMethod(s.to_owned())),
		};

		Ok(method)
	}
}

/// Error returned when parsing an unsupported HTTP method.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Unsupported HTTP method `{0}`.")]
pub struct UnknownMethod(pub String);

/// Wire-level request handed to an [`HttpTransport`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiRequest {
	/// HTTP method.
	pub method: Method,
	/// Absolute target URL.
	pub url: Url,
	/// Header map keyed by lower-case header name.
	pub headers: BTreeMap<String, String>,
	/// Serialized body, if any.
	pub body: Option<Vec<u8>>,
}
impl ApiRequest {
	/// Creates a request without headers or body.
	pub fn new(method: Method, url: Url) -> Self {
		Self { method, url, headers: BTreeMap::new(), body: None }
	}

	/// Inserts or replaces a header. Names are stored lower-cased.
	pub fn set_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
		self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());
	}

	/// Looks up a header case-insensitively.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
	}

	/// Returns the bearer token carried in `Authorization`, if any.
	pub fn bearer_token(&self) -> Option<&str> {
		self.header("authorization").and_then(|value| value.strip_prefix("Bearer "))
	}

	/// Serializes `body` as JSON and sets the content type.
	pub fn set_json_body(&mut self, body: &serde_json::Value) -> Result<(), serde_json::Error> {
		self.body = Some(serde_json::to_vec(body)?);
		self.set_header("content-type", "application/json");

		Ok(())
	}

	/// Parses the body back into JSON, mostly useful to test transports.
	pub fn json_body(&self) -> Option<serde_json::Value> {
		self.body.as_deref().and_then(|bytes| serde_json::from_slice(bytes).ok())
	}
}

/// Response produced by an [`HttpTransport`], whatever its status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiResponse {
	/// HTTP status code.
	pub status: u16,
	/// Header map keyed by lower-case header name.
	pub headers: BTreeMap<String, String>,
	/// Raw response body.
	pub body: Vec<u8>,
}
impl ApiResponse {
	/// Creates an empty response with the given status.
	pub fn new(status: u16) -> Self {
		Self { status, headers: BTreeMap::new(), body: Vec::new() }
	}

	/// Creates a response carrying a JSON body.
	pub fn json_body(status: u16, body: &serde_json::Value) -> Self {
		Self::new(status)
			.with_header("content-type", "application/json")
			.with_body(body.to_string().into_bytes())
	}

	/// Adds a header. Names are stored lower-cased.
	pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
		self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());

		self
	}

	/// Replaces the body.
	pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
		self.body = body.into();

		self
	}

	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Looks up a header case-insensitively.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
	}

	/// Deserializes the body as JSON.
	pub fn json<T>(&self) -> Result<T, serde_json::Error>
	where
		T: DeserializeOwned,
	{
		serde_json::from_slice(&self.body)
	}

	/// Returns the body as a JSON value when it parses as one.
	pub fn json_value(&self) -> Option<serde_json::Value> {
		if self.body.is_empty() {
			return None;
		}

		serde_json::from_slice(&self.body).ok()
	}

	/// Returns the body decoded as UTF-8, replacing invalid sequences.
	pub fn text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}

	/// Parses `Retry-After` (delta seconds or an RFC 2822 date) relative to `now`.
	pub fn retry_after(&self, now: OffsetDateTime) -> Option<Duration> {
		parse_retry_after(self.header("retry-after")?, now)
	}
}

/// Thin wrapper around [`ReqwestClient`] implementing [`HttpTransport`].
///
/// Configure any custom client without automatic retries; the pipeline owns retry policy.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Builds a default client without a client-wide timeout.
	pub fn new() -> Result<Self, crate::error::ConfigError> {
		Ok(Self(ReqwestClient::builder().build()?))
	}

	/// Builds a client whose individual sends give up after `timeout`.
	///
	/// The cap applies to every send regardless of the per-call deadline, so keep it at or
	/// above the longest timeout callers ask for.
	pub fn with_timeout(timeout: Duration) -> Result<Self, crate::error::ConfigError> {
		Ok(Self(ReqwestClient::builder().timeout(timeout).build()?))
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestTransport {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestTransport {
	fn send(&self, request: ApiRequest) -> TransportFuture<'_> {
		Box::pin(execute_reqwest(self.0.clone(), request))
	}
}

#[cfg(feature = "reqwest")]
async fn execute_reqwest(
	client: ReqwestClient,
	request: ApiRequest,
) -> Result<ApiResponse, TransportError> {
	let method = match request.method {
		Method::Get => reqwest::Method::GET,
		Method::Head => reqwest::Method::HEAD,
		Method::Options => reqwest::Method::OPTIONS,
		Method::Post => reqwest::Method::POST,
		Method::Put => reqwest::Method::PUT,
		Method::Patch => reqwest::Method::PATCH,
		Method::Delete => reqwest::Method::DELETE,
	};
	let mut builder = client.request(method, request.url);

	for (name, value) in &request.headers {
		builder = builder.header(name.as_str(), value.as_str());
	}
	if let Some(body) = request.body {
		builder = builder.body(body);
	}

	let response = builder.send().await?;
	let status = response.status().as_u16();
	let headers = response
		.headers()
		.iter()
		.filter_map(|(name, value)| {
			value.to_str().ok().map(|value| (name.as_str().to_owned(), value.to_owned()))
		})
		.collect();
	let body = response.bytes().await?.to_vec();

	Ok(ApiResponse { status, headers, body })
}

fn parse_retry_after(raw: &str, now: OffsetDateTime) -> Option<Duration> {
	let raw = raw.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(Duration::from_secs(secs));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - now;

		if delta.is_positive() {
			return Duration::try_from(delta).ok();
		}
	}

	None
}
