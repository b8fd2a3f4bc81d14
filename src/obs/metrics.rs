// self
use crate::{
	_prelude::*,
	http::Method,
	obs::{OpKind, OpOutcome},
};

/// Increments `api_client_op_total` for one operation outcome (when enabled).
pub fn record_op_outcome(kind: OpKind, outcome: OpOutcome) {
	#[cfg(feature = "metrics")]
	metrics::counter!("api_client_op_total", "op" => kind.as_str(), "outcome" => outcome.as_str())
		.increment(1);
	#[cfg(not(feature = "metrics"))]
	let _ = (kind, outcome);
}

/// Records a scheduled backoff in the `api_client_retry_delay_seconds` histogram.
pub fn record_retry_delay(method: Method, delay: Duration) {
	#[cfg(feature = "metrics")]
	metrics::histogram!("api_client_retry_delay_seconds", "method" => method.as_str())
		.record(delay.as_secs_f64());
	#[cfg(not(feature = "metrics"))]
	let _ = (method, delay);
}

/// Publishes the number of persisted offline actions as `api_client_offline_queue_depth`.
pub fn record_queue_depth(depth: usize) {
	#[cfg(feature = "metrics")]
	metrics::gauge!("api_client_offline_queue_depth").set(depth as f64);
	#[cfg(not(feature = "metrics"))]
	let _ = depth;
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn recorders_are_noops_without_an_installed_recorder() {
		record_op_outcome(OpKind::Replay, OpOutcome::Queued);
		record_retry_delay(Method::Get, Duration::from_millis(300));
		record_queue_depth(0);
	}
}
