//! Maps raw outcomes (transport failures, non-success responses, refresh failures, offline
//! detection) into the closed [`ErrorCode`] taxonomy.
//!
//! Classification is total: every [`Outcome`] yields exactly one [`ApiError`], and the same
//! outcome always yields the same code. Response bodies are inspected in this order:
//!
//! 1. A structured `{"error": {"message", "code", "details", "timestamp"}}` envelope is passed
//!    through.
//! 2. `401` becomes `AUTH_ERROR` (the pipeline only classifies a 401 once refresh is spent).
//! 3. `400`/`422` carrying `validationErrors` or `errors` becomes `VALIDATION_ERROR`.
//! 4. `403`, `404`, `409`, `429`, and `5xx` become `HTTP_<status>`.
//! 5. Everything else becomes `UNKNOWN_ERROR`.

mod api_error;

pub use api_error::*;

// crates.io
use serde_json::{Map, Value, json};
use time::format_description::well_known::Rfc3339;
// self
use crate::{
	_prelude::*,
	clock::{Clock, SystemClock},
	error::{AuthError, TransportError},
	http::{ApiResponse, Method},
};

const NETWORK_MESSAGE: &str = "Unable to reach the server. Check your connection.";
const TIMEOUT_MESSAGE: &str = "The request timed out.";
const OFFLINE_QUEUED_MESSAGE: &str =
	"You are offline. The request was saved and will be sent when the connection returns.";
const OFFLINE_UNQUEUED_MESSAGE: &str = "You are offline and the request could not be saved.";
const AUTH_MESSAGE: &str = "Your session has expired. Please sign in again.";
const VALIDATION_MESSAGE: &str = "Some fields are invalid.";
const UNKNOWN_MESSAGE: &str = "An unexpected error occurred.";

/// Raw outcome of a pipeline step that did not end in success.
#[derive(Debug)]
pub enum Outcome<'a> {
	/// The transport failed before any response arrived.
	Transport(&'a TransportError),
	/// The server answered with a non-success status.
	Response(&'a ApiResponse),
	/// A 401 could not be recovered because refresh failed or was impossible.
	RefreshFailed(&'a AuthError),
	/// The caller-level deadline for the whole logical call elapsed.
	DeadlineExceeded {
		/// Configured deadline.
		after: Duration,
	},
	/// A mutating request failed while connectivity was confirmed absent.
	Offline {
		/// Method of the original request.
		method: Method,
		/// Target URL of the original request.
		url: &'a Url,
		/// Queue id when the request was persisted; `None` when persisting failed.
		action_id: Option<&'a str>,
	},
	/// A local failure (configuration, storage, decoding) with no better code.
	Internal(&'a (dyn StdError + Send + Sync)),
}

/// Stateless classifier stamping errors with an injected clock.
#[derive(Clone)]
pub struct ErrorClassifier {
	clock: Arc<dyn Clock>,
}
impl ErrorClassifier {
	/// Creates a classifier reading timestamps from `clock`.
	pub fn new(clock: Arc<dyn Clock>) -> Self {
		Self { clock }
	}

	/// Classifies `outcome` into the caller-facing error shape.
	pub fn classify(&self, outcome: &Outcome<'_>) -> ApiError {
		let now = self.clock.now();

		match outcome {
			Outcome::Transport(TransportError::Timeout) =>
				ApiError::new(ErrorCode::Timeout, TIMEOUT_MESSAGE, now),
			Outcome::Transport(err) => ApiError::new(ErrorCode::Network, NETWORK_MESSAGE, now)
				.with_details(json!({ "cause": render_chain(*err) })),
			Outcome::DeadlineExceeded { after } => {
				let timeout_ms = u64::try_from(after.as_millis()).unwrap_or(u64::MAX);

				ApiError::new(ErrorCode::Timeout, TIMEOUT_MESSAGE, now)
					.with_details(json!({ "timeoutMs": timeout_ms }))
			},
			Outcome::RefreshFailed(err) => ApiError::new(ErrorCode::Auth, AUTH_MESSAGE, now)
				.with_details(json!({ "cause": err.to_string() })),
			Outcome::Offline { method, url, action_id } => {
				let message = if action_id.is_some() {
					OFFLINE_QUEUED_MESSAGE
				} else {
					OFFLINE_UNQUEUED_MESSAGE
				};
				let mut details = json!({
					"queued": action_id.is_some(),
					"method": method.as_str(),
					"url": url.as_str(),
				});

				if let Some(id) = action_id {
					details["actionId"] = Value::from(*id);
				}

				ApiError::new(ErrorCode::Offline, message, now).with_details(details)
			},
			Outcome::Internal(err) => ApiError::new(ErrorCode::Unknown, UNKNOWN_MESSAGE, now)
				.with_details(json!({ "cause": render_chain(*err) })),
			Outcome::Response(response) => self.classify_response(response, now),
		}
	}

	fn classify_response(&self, response: &ApiResponse, now: OffsetDateTime) -> ApiError {
		let status = response.status;
		let body = response.json_value();

		if let Some(error) = body.as_ref().and_then(|body| passthrough(body, status, now)) {
			return error;
		}
		if status == 401 {
			return ApiError::new(ErrorCode::Auth, AUTH_MESSAGE, now)
				.with_details(json!({ "status": status }));
		}
		if matches!(status, 400 | 422) {
			if let Some(entries) = body.as_ref().and_then(validation_entries) {
				let fields: Map<String, Value> = entries
					.iter()
					.filter_map(|entry| {
						let field = entry.get("field")?.as_str()?;

						Some((field.to_owned(), entry.get("message")?.clone()))
					})
					.collect();

				return ApiError::new(ErrorCode::Validation, VALIDATION_MESSAGE, now).with_details(
					json!({ "status": status, "validationErrors": entries, "fields": fields }),
				);
			}
		}
		if let Some(message) = status_message(status) {
			return ApiError::new(ErrorCode::Http(status), message, now)
				.with_details(json!({ "status": status }));
		}

		ApiError::new(ErrorCode::Unknown, UNKNOWN_MESSAGE, now)
			.with_details(json!({ "status": status }))
	}
}
impl Default for ErrorClassifier {
	fn default() -> Self {
		Self::new(Arc::new(SystemClock))
	}
}
impl Debug for ErrorClassifier {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("ErrorClassifier(..)")
	}
}

/// Stable default message for statuses with a dedicated `HTTP_<status>` code.
pub fn status_message(status: u16) -> Option<&'static str> {
	let message = match status {
		403 => "You do not have permission to perform this action.",
		404 => "The requested resource was not found.",
		409 => "The request conflicts with the current state of the resource.",
		429 => "Too many requests. Please wait a moment and try again.",
		500 => "The server encountered an internal error.",
		502 => "The server received an invalid response from an upstream service.",
		503 => "The service is temporarily unavailable.",
		504 => "The server timed out waiting for an upstream service.",
		500..=599 => "The server failed to process the request.",
		_ => return None,
	};

	Some(message)
}

fn passthrough(body: &Value, status: u16, now: OffsetDateTime) -> Option<ApiError> {
	let envelope = body.get("error")?.as_object()?;
	let message = envelope.get("message")?.as_str()?;
	let code = envelope
		.get("code")
		.and_then(Value::as_str)
		.and_then(|code| code.parse().ok())
		.unwrap_or_else(|| fallback_code(status));
	let timestamp = envelope
		.get("timestamp")
		.and_then(Value::as_str)
		.and_then(|raw| OffsetDateTime::parse(raw, &Rfc3339).ok())
		.unwrap_or(now);
	let mut error = ApiError::new(code, message, timestamp);

	error.details = envelope.get("details").cloned();

	Some(error)
}

fn fallback_code(status: u16) -> ErrorCode {
	match status {
		401 => ErrorCode::Auth,
		400 | 422 => ErrorCode::Validation,
		status if status_message(status).is_some() => ErrorCode::Http(status),
		_ => ErrorCode::Unknown,
	}
}

/// Normalizes `validationErrors`/`errors` bodies into `[{field, message}]`.
fn validation_entries(body: &Value) -> Option<Vec<Value>> {
	let raw = body.get("validationErrors").or_else(|| body.get("errors"))?;
	let entries: Vec<Value> = match raw {
		Value::Array(items) => items
			.iter()
			.filter_map(|item| {
				let field = item.get("field")?.as_str()?;
				let message = item.get("message").map(message_text).unwrap_or_default();

				Some(json!({ "field": field, "message": message }))
			})
			.collect(),
		Value::Object(map) => map
			.iter()
			.map(|(field, message)| json!({ "field": field, "message": message_text(message) }))
			.collect(),
		_ => return None,
	};

	if entries.is_empty() { None } else { Some(entries) }
}

fn message_text(value: &Value) -> String {
	match value {
		Value::String(text) => text.clone(),
		Value::Array(items) => items
			.iter()
			.map(message_text)
			.filter(|text| !text.is_empty())
			.collect::<Vec<_>>()
			.join(" "),
		Value::Null => String::new(),
		other => other.to_string(),
	}
}

pub(crate) fn render_chain(err: &dyn StdError) -> String {
	let mut rendered = err.to_string();
	let mut source = err.source();

	while let Some(cause) = source {
		rendered.push_str(": ");
		rendered.push_str(&cause.to_string());

		source = cause.source();
	}

	rendered
}
