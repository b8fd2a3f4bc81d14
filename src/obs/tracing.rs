// self
use crate::{_prelude::*, auth::EndReason, error::AuthError, http::Method, obs::OpKind};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedOp<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedOp<F> = F;

/// A span builder used by pipeline operations.
#[derive(Clone, Debug)]
pub struct OpSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl OpSpan {
	/// Creates a new span tagged with the provided operation kind + stage.
	pub fn new(kind: OpKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("api_client.op", op = kind.as_str(), stage);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedOp<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

pub(crate) fn retry_scheduled(method: Method, attempt: u32, delay: Duration) {
	#[cfg(feature = "tracing")]
	tracing::debug!(
		%method,
		attempt,
		delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
		"retrying transient failure"
	);
	#[cfg(not(feature = "tracing"))]
	let _ = (method, attempt, delay);
}

pub(crate) fn action_queued(method: Method, id: &str) {
	#[cfg(feature = "tracing")]
	tracing::info!(%method, id, "mutation queued while offline");
	#[cfg(not(feature = "tracing"))]
	let _ = (method, id);
}

pub(crate) fn action_dropped(id: &str, reason: &'static str) {
	#[cfg(feature = "tracing")]
	tracing::warn!(id, reason, "queued action dropped");
	#[cfg(not(feature = "tracing"))]
	let _ = (id, reason);
}

pub(crate) fn session_ended(reason: EndReason) {
	#[cfg(feature = "tracing")]
	tracing::warn!(reason = reason.as_str(), "session ended");
	#[cfg(not(feature = "tracing"))]
	let _ = reason;
}

pub(crate) fn preemptive_refresh_failed(error: &AuthError) {
	#[cfg(feature = "tracing")]
	tracing::warn!(%error, "early refresh failed; sending with the current credentials");
	#[cfg(not(feature = "tracing"))]
	let _ = error;
}

pub(crate) fn storage_failed(what: &'static str, error: &dyn StdError) {
	#[cfg(feature = "tracing")]
	tracing::warn!(what, %error, "storage write failed");
	#[cfg(not(feature = "tracing"))]
	let _ = (what, error);
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn helpers_are_callable_without_subscriber() {
		let _span = OpSpan::new(OpKind::Request, "test");

		retry_scheduled(Method::Get, 0, Duration::from_millis(300));
		action_dropped("id-1", "expired");
		session_ended(EndReason::Logout);
	}

	#[cfg(feature = "tracing")]
	#[tokio::test]
	async fn instrument_wraps_future() {
		let span = OpSpan::new(OpKind::Refresh, "instrument_wraps_future");
		let value = span.instrument(async { 42 }).await;

		assert_eq!(value, 42);
	}
}
