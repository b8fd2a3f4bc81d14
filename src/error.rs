//! Crate-level error types shared by the token manager, queue, stores, and transports.
//!
//! These are internal failure values. Callers of [`RequestPipeline`](crate::pipeline::RequestPipeline)
//! never see them directly; the pipeline classifies every failure into an
//! [`ApiError`](crate::classify::ApiError).

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical internal error.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Key/value storage failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS, timeout).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Credential or refresh failure.
	#[error(transparent)]
	Auth(#[from] AuthError),
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Base URL cannot be parsed.
	#[error("Base URL is invalid.")]
	InvalidBaseUrl {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Base URL uses a scheme other than HTTP(S) or cannot act as a base.
	#[error("Base URL must be an absolute http(s) URL: {url}.")]
	UnsupportedBaseUrl {
		/// Offending URL.
		url: String,
	},
	/// A request path cannot be joined onto the base URL.
	#[error("Path `{path}` cannot be resolved against the base URL.")]
	InvalidPath {
		/// Offending path.
		path: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Retry policy values are inconsistent.
	#[error("Retry policy is invalid: {reason}.")]
	InvalidRetryPolicy {
		/// What failed validation.
		reason: &'static str,
	},
	/// Configuration document could not be parsed.
	#[error("Configuration could not be parsed: {message}.")]
	Parse {
		/// Parser message including the failing path.
		message: String,
	},
	/// No transport was supplied and the bundled one is compiled out.
	#[error("No HTTP transport was configured.")]
	MissingTransport,
	/// Request body could not be serialized.
	#[error("Request body could not be serialized.")]
	BodySerialization(#[from] serde_json::Error),
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO, timeouts). No HTTP response was received.
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while sending the request.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// The transport gave up waiting for a response.
	#[error("Request timed out before a response was received.")]
	Timeout,
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while sending the request.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}

	/// Returns `true` when the failure was a timeout.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Self::Timeout)
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		if e.is_timeout() { Self::Timeout } else { Self::network(e) }
	}
}

/// Credential failures surfaced by the token manager.
///
/// The type is `Clone` because a single refresh result is handed to every caller awaiting
/// the same in-flight refresh.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum AuthError {
	/// No refresh token is stored, so the session cannot be renewed.
	#[error("No refresh token is available.")]
	MissingRefreshToken,
	/// The refresh endpoint answered with a non-2xx status.
	#[error("Refresh endpoint rejected the refresh token with status {status}.")]
	Rejected {
		/// HTTP status returned by the refresh endpoint.
		status: u16,
	},
	/// The refresh call never produced a response.
	#[error("Refresh call failed: {message}.")]
	Transport {
		/// Rendered transport failure.
		message: String,
	},
	/// The refresh endpoint answered 2xx with a body that is not a credential pair.
	#[error("Refresh endpoint returned a malformed body: {message}.")]
	MalformedResponse {
		/// Parser message including the failing path.
		message: String,
	},
	/// The refresh task stopped before publishing a result.
	#[error("Refresh task was aborted.")]
	Aborted,
}

#[cfg(test)]
mod tests {
	// std
	use std::error::Error as StdError;
	// self
	use super::*;
	use crate::store::StoreError;

	#[test]
	fn store_error_converts_with_source() {
		let store_error = StoreError::Backend { message: "disk full".into() };
		let error: Error = store_error.clone().into();

		assert!(matches!(error, Error::Storage(_)));
		assert!(error.to_string().contains("disk full"));

		let source = StdError::source(&error).expect("Storage error should expose its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}

	#[test]
	fn auth_error_messages_are_sentences() {
		assert_eq!(
			AuthError::Rejected { status: 400 }.to_string(),
			"Refresh endpoint rejected the refresh token with status 400."
		);
		assert!(TransportError::Timeout.is_timeout());
	}
}
