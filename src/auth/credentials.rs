//! Credential pair and the redacting secret wrapper.

// self
use crate::_prelude::*;

/// Redacted token secret wrapper keeping sensitive material out of logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}
impl AsRef<str> for TokenSecret {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("TokenSecret(<redacted>)")
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// Access/refresh pair owned by the [`TokenManager`](crate::auth::TokenManager).
///
/// Persisted as `{"access": .., "refresh": .., "expires_at": ..}` under the configured
/// credentials key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
	/// Bearer token attached to every authenticated request.
	pub access: TokenSecret,
	/// Token exchanged at the refresh endpoint for a new pair.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refresh: Option<TokenSecret>,
	/// Access token expiry, when the server reported one.
	#[serde(default, skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
	pub expires_at: Option<OffsetDateTime>,
}
impl Credentials {
	/// Creates a pair without a known expiry.
	pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
		Self {
			access: TokenSecret::new(access),
			refresh: Some(TokenSecret::new(refresh)),
			expires_at: None,
		}
	}

	/// Creates an access-only credential that cannot be refreshed.
	pub fn access_only(access: impl Into<String>) -> Self {
		Self { access: TokenSecret::new(access), refresh: None, expires_at: None }
	}

	/// Sets the access token expiry.
	pub fn with_expires_at(mut self, expires_at: OffsetDateTime) -> Self {
		self.expires_at = Some(expires_at);

		self
	}

	/// Returns `true` when the access token expires within `window` of `now`.
	///
	/// Credentials without an expiry never report as expiring.
	pub fn expires_within(&self, now: OffsetDateTime, window: Duration) -> bool {
		self.expires_at.is_some_and(|expires_at| expires_at - now <= window)
	}

	/// `Authorization` header value.
	pub(crate) fn bearer(&self) -> String {
		format!("Bearer {}", self.access.expose())
	}
}

/// Body returned by the refresh endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct RefreshResponse {
	pub(crate) access: String,
	#[serde(default)]
	pub(crate) refresh: Option<String>,
	#[serde(default)]
	pub(crate) expires_in: Option<u64>,
}
impl RefreshResponse {
	/// Builds the next pair, keeping the old refresh token when the server did not rotate it.
	pub(crate) fn into_credentials(
		self,
		previous_refresh: &TokenSecret,
		now: OffsetDateTime,
	) -> Credentials {
		Credentials {
			access: TokenSecret::new(self.access),
			refresh: Some(self.refresh.map(TokenSecret::new).unwrap_or_else(|| previous_refresh.clone())),
			expires_at: self
				.expires_in
				.and_then(|secs| i64::try_from(secs).ok())
				.map(|secs| now + time::Duration::seconds(secs)),
		}
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros::datetime;
	// self
	use super::*;

	#[test]
	fn secret_formatters_redact() {
		let credentials = Credentials::new("access-1", "refresh-1");
		let rendered = format!("{credentials:?}");

		assert!(!rendered.contains("access-1"));
		assert!(!rendered.contains("refresh-1"));
		assert_eq!(format!("{}", credentials.access), "<redacted>");
		assert_eq!(credentials.bearer(), "Bearer access-1");
	}

	#[test]
	fn persisted_shape_is_flat() {
		let credentials =
			Credentials::new("a", "r").with_expires_at(datetime!(2025-11-10 12:00 UTC));
		let value = serde_json::to_value(&credentials).expect("Credentials should serialize.");

		assert_eq!(
			value,
			serde_json::json!({ "access": "a", "refresh": "r", "expires_at": "2025-11-10T12:00:00Z" })
		);

		let restored: Credentials =
			serde_json::from_value(serde_json::json!({ "access": "a" })).expect("Should parse.");

		assert_eq!(restored, Credentials::access_only("a"));
	}

	#[test]
	fn expiry_window_and_rotation() {
		let now = datetime!(2025-11-10 12:00 UTC);
		let credentials = Credentials::new("a", "r").with_expires_at(now + time::Duration::seconds(30));

		assert!(credentials.expires_within(now, Duration::from_secs(60)));
		assert!(!credentials.expires_within(now, Duration::from_secs(10)));
		assert!(!Credentials::new("a", "r").expires_within(now, Duration::from_secs(3_600)));

		let kept = RefreshResponse { access: "a2".into(), refresh: None, expires_in: Some(300) }
			.into_credentials(&TokenSecret::new("r"), now);

		assert_eq!(kept.refresh, Some(TokenSecret::new("r")));
		assert_eq!(kept.expires_at, Some(now + time::Duration::minutes(5)));
	}
}
