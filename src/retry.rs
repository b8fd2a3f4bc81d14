//! Retry/backoff policy.
//!
//! Only transport failures, `5xx`, and `429` are retried, and only for requests that are
//! idempotent or were explicitly opted in, so a naive retry can never duplicate a booking.
//! Delays grow as `min(max_delay, base_delay * multiplier^attempt)`.

// crates.io
use rand::Rng;
// self
use crate::{
	_prelude::*,
	classify::Outcome,
	config::duration_ms,
	error::ConfigError,
	request::RequestDescriptor,
};

/// Verdict returned by [`RetryPolicy::should_retry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryDecision {
	/// Whether another attempt should be made.
	pub retry: bool,
	/// How long to wait before the next attempt. Zero when `retry` is false.
	pub delay: Duration,
}
impl RetryDecision {
	/// Decision that ends the retry loop.
	pub const STOP: Self = Self { retry: false, delay: Duration::ZERO };

	/// Decision that retries after `delay`.
	pub const fn after(delay: Duration) -> Self {
		Self { retry: true, delay }
	}
}

/// Exponential backoff configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
	/// Retries allowed after the first attempt.
	pub max_retries: u32,
	/// Delay before the first retry.
	#[serde(with = "duration_ms")]
	pub base_delay: Duration,
	/// Growth factor applied per attempt.
	pub multiplier: f64,
	/// Upper bound for any single delay, including jitter and `Retry-After` hints.
	#[serde(with = "duration_ms")]
	pub max_delay: Duration,
	/// Random extra delay as a fraction of the computed delay, in `[0, 1]`.
	pub jitter: f64,
}
impl RetryPolicy {
	/// Default retry budget.
	pub const DEFAULT_MAX_RETRIES: u32 = 3;

	/// Policy that never retries.
	pub fn disabled() -> Self {
		Self { max_retries: 0, ..Self::default() }
	}

	/// Overrides the retry budget.
	pub fn with_max_retries(mut self, max_retries: u32) -> Self {
		self.max_retries = max_retries;

		self
	}

	/// Overrides the base delay.
	pub fn with_base_delay(mut self, delay: Duration) -> Self {
		self.base_delay = delay;

		self
	}

	/// Overrides the multiplier.
	pub fn with_multiplier(mut self, multiplier: f64) -> Self {
		self.multiplier = multiplier;

		self
	}

	/// Overrides the delay cap.
	pub fn with_max_delay(mut self, delay: Duration) -> Self {
		self.max_delay = delay;

		self
	}

	/// Overrides the jitter fraction.
	pub fn with_jitter(mut self, jitter: f64) -> Self {
		self.jitter = jitter;

		self
	}

	/// Checks that the values describe a non-decreasing, capped schedule.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if !self.multiplier.is_finite() || self.multiplier < 1.0 {
			return Err(ConfigError::InvalidRetryPolicy { reason: "multiplier must be >= 1" });
		}
		if self.base_delay > self.max_delay {
			return Err(ConfigError::InvalidRetryPolicy {
				reason: "base_delay must not exceed max_delay",
			});
		}
		if !(0.0..=1.0).contains(&self.jitter) {
			return Err(ConfigError::InvalidRetryPolicy { reason: "jitter must be within [0, 1]" });
		}

		Ok(())
	}

	/// Deterministic delay for the retry following `attempt` (zero-based), before jitter.
	pub fn backoff(&self, attempt: u32) -> Duration {
		if self.base_delay.is_zero() {
			return Duration::ZERO;
		}

		let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
		let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);

		Duration::try_from_secs_f64(secs).map_or(self.max_delay, |delay| delay.min(self.max_delay))
	}

	/// Returns `true` for outcomes that may succeed when repeated.
	pub fn is_transient(outcome: &Outcome<'_>) -> bool {
		match outcome {
			Outcome::Transport(_) => true,
			Outcome::Response(response) => response.status == 429 || response.status >= 500,
			_ => false,
		}
	}

	/// Decides whether `descriptor` should be attempted again after `outcome`.
	///
	/// `attempt` counts the retries already made; the first failure is attempt `0`.
	pub fn should_retry(
		&self,
		outcome: &Outcome<'_>,
		attempt: u32,
		descriptor: &RequestDescriptor,
	) -> RetryDecision {
		self.should_retry_at(outcome, attempt, descriptor, OffsetDateTime::now_utc())
	}

	/// Same as [`should_retry`](Self::should_retry) with an explicit clock reading for
	/// date-form `Retry-After` hints.
	pub fn should_retry_at(
		&self,
		outcome: &Outcome<'_>,
		attempt: u32,
		descriptor: &RequestDescriptor,
		now: OffsetDateTime,
	) -> RetryDecision {
		let max_retries = descriptor.max_retries.unwrap_or(self.max_retries);

		if attempt >= max_retries || !descriptor.idempotent || !Self::is_transient(outcome) {
			return RetryDecision::STOP;
		}

		let mut delay = self.jittered(self.backoff(attempt));

		if let Outcome::Response(response) = outcome {
			if let Some(hint) = response.retry_after(now) {
				delay = delay.max(hint);
			}
		}

		RetryDecision::after(delay.min(self.max_delay))
	}

	fn jittered(&self, delay: Duration) -> Duration {
		if self.jitter <= 0.0 || delay.is_zero() {
			return delay;
		}

		let spread = delay.as_secs_f64() * self.jitter;
		let extra = rand::rng().random_range(0.0..=spread);

		delay.saturating_add(Duration::from_secs_f64(extra)).min(self.max_delay)
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_retries: Self::DEFAULT_MAX_RETRIES,
			base_delay: Duration::from_millis(300),
			multiplier: 2.0,
			max_delay: Duration::from_secs(10),
			jitter: 0.0,
		}
	}
}
