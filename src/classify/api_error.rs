//! The single caller-facing error shape and its closed code taxonomy.

// std
use std::borrow::Cow;
// crates.io
use serde::{Deserializer, Serializer, de};
// self
use crate::_prelude::*;

/// Closed taxonomy of failure codes returned to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
	/// No response was received (DNS, connect, reset).
	Network,
	/// The request or the transport timed out.
	Timeout,
	/// The device is offline; mutating requests were queued for replay.
	Offline,
	/// Credentials are missing or could not be refreshed.
	Auth,
	/// The server rejected field values.
	Validation,
	/// A non-success status with a dedicated code (`HTTP_403`, `HTTP_503`, ...).
	Http(u16),
	/// Anything the taxonomy has no better code for.
	Unknown,
}
impl ErrorCode {
	/// Returns the stable wire label (`NETWORK_ERROR`, `HTTP_404`, ...).
	pub fn as_str(&self) -> Cow<'static, str> {
		match self {
			ErrorCode::Network => Cow::Borrowed("NETWORK_ERROR"),
			ErrorCode::Timeout => Cow::Borrowed("TIMEOUT_ERROR"),
			ErrorCode::Offline => Cow::Borrowed("OFFLINE_ERROR"),
			ErrorCode::Auth => Cow::Borrowed("AUTH_ERROR"),
			ErrorCode::Validation => Cow::Borrowed("VALIDATION_ERROR"),
			ErrorCode::Http(status) => Cow::Owned(format!("HTTP_{status}")),
			ErrorCode::Unknown => Cow::Borrowed("UNKNOWN_ERROR"),
		}
	}

	/// Returns the HTTP status for [`ErrorCode::Http`] codes.
	pub fn http_status(&self) -> Option<u16> {
		match self {
			ErrorCode::Http(status) => Some(*status),
			_ => None,
		}
	}
}
impl Display for ErrorCode {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.as_str())
	}
}
impl FromStr for ErrorCode {
	type Err = UnknownErrorCode;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let code = match s {
			"NETWORK_ERROR" => ErrorCode::Network,
			"TIMEOUT_ERROR" => ErrorCode::Timeout,
			"OFFLINE_ERROR" => ErrorCode::Offline,
			"AUTH_ERROR" => ErrorCode::Auth,
			"VALIDATION_ERROR" => ErrorCode::Validation,
			"UNKNOWN_ERROR" => ErrorCode::Unknown,
			other => other
				.strip_prefix("HTTP_")
				.filter(|digits| digits.len() == 3)
				.and_then(|digits| digits.parse::<u16>().ok())
				.filter(|status| (100..600).contains(status))
				.map(ErrorCode::Http)
				.ok_or_else(|| UnknownErrorCode(s.to_owned()))?,
		};

		Ok(code)
	}
}
impl Serialize for ErrorCode {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.as_str())
	}
}
impl<'de> Deserialize<'de> for ErrorCode {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw = String::deserialize(deserializer)?;

		raw.parse().map_err(de::Error::custom)
	}
}

/// Error returned when a string does not name a taxonomy code.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("`{0}` is not a known error code.")]
pub struct UnknownErrorCode(pub String);

/// The error every pipeline caller receives, whatever the failure origin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ThisError)]
#[error("{code}: {message}")]
pub struct ApiError {
	/// Taxonomy code callers branch on.
	pub code: ErrorCode,
	/// Human-readable message, stable per code unless the server supplied one.
	pub message: String,
	/// Structured context (validation errors, queue state, status, ...).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
	/// Instant the error was produced (or the server's timestamp when passed through).
	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,
}
impl ApiError {
	/// Creates an error without details.
	pub fn new(code: ErrorCode, message: impl Into<String>, timestamp: OffsetDateTime) -> Self {
		Self { code, message: message.into(), details: None, timestamp }
	}

	/// Attaches structured details.
	pub fn with_details(mut self, details: serde_json::Value) -> Self {
		self.details = Some(details);

		self
	}

	/// Returns a detail field by name.
	pub fn detail(&self, field: &str) -> Option<&serde_json::Value> {
		self.details.as_ref()?.get(field)
	}

	/// Returns `true` for offline errors whose request was persisted for replay.
	pub fn is_queued(&self) -> bool {
		self.code == ErrorCode::Offline
			&& self.detail("queued").and_then(serde_json::Value::as_bool).unwrap_or(false)
	}

	/// Returns `(field, message)` pairs for validation errors.
	pub fn validation_errors(&self) -> Vec<(String, String)> {
		self.detail("validationErrors")
			.and_then(serde_json::Value::as_array)
			.map(|entries| {
				entries
					.iter()
					.filter_map(|entry| {
						let field = entry.get("field")?.as_str()?;
						let message = entry.get("message")?.as_str()?;

						Some((field.to_owned(), message.to_owned()))
					})
					.collect()
			})
			.unwrap_or_default()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros::datetime;
	// self
	use super::*;

	#[test]
	fn codes_render_and_parse_symmetrically() {
		for code in [
			ErrorCode::Network,
			ErrorCode::Timeout,
			ErrorCode::Offline,
			ErrorCode::Auth,
			ErrorCode::Validation,
			ErrorCode::Http(404),
			ErrorCode::Http(503),
			ErrorCode::Unknown,
		] {
			assert_eq!(code.to_string().parse::<ErrorCode>(), Ok(code));
		}

		assert!("HTTP_42".parse::<ErrorCode>().is_err());
		assert!("HTTP_999".parse::<ErrorCode>().is_err());
		assert!("BOOKING_FULL".parse::<ErrorCode>().is_err());
	}

	#[test]
	fn api_error_serializes_with_wire_code() {
		let error = ApiError::new(
			ErrorCode::Http(409),
			"The request conflicts with the current state of the resource.",
			datetime!(2025-11-10 12:00 UTC),
		);
		let value = serde_json::to_value(&error).expect("ApiError should serialize.");

		assert_eq!(value["code"], "HTTP_409");
		assert_eq!(value["timestamp"], "2025-11-10T12:00:00Z");
		assert!(value.get("details").is_none());
		assert_eq!(error.to_string(), format!("HTTP_409: {}", error.message));
	}
}
