//! Retry policy and backoff budgeting for network attempts.

// std
use std::{cell::RefCell, collections::BTreeSet};
// crates.io
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Default timeout applied to each individual network attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default floor applied to every computed backoff delay.
pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_millis(100);
/// Ceiling applied to exponential backoff growth.
const BACKOFF_CEILING: Duration = Duration::from_secs(60 * 60);

/// Retry configuration for fetch attempts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
	/// Total attempt budget, including the initial attempt.
	pub max_attempts: u32,
	/// Delay before the first retry.
	pub initial_delay: Duration,
	/// Exponential growth factor applied per retry.
	pub multiplier: f64,
	/// Symmetric jitter amplitude as a fraction of the computed delay.
	pub jitter_fraction: f64,
	/// HTTP status codes that permit another attempt.
	pub retryable_statuses: BTreeSet<u16>,
}
impl RetryPolicy {
	/// Validate invariants for retry configuration.
	pub fn validate(&self) -> Result<()> {
		if self.max_attempts == 0 {
			return Err(Error::Validation {
				field: "retry_policy.max_attempts",
				reason: "Must be at least 1.".into(),
			});
		}
		if self.initial_delay.is_zero() {
			return Err(Error::Validation {
				field: "retry_policy.initial_delay",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.multiplier.is_nan() || self.multiplier < 1.0 {
			return Err(Error::Validation {
				field: "retry_policy.multiplier",
				reason: "Must be at least 1.".into(),
			});
		}
		if !(0.0..1.0).contains(&self.jitter_fraction) {
			return Err(Error::Validation {
				field: "retry_policy.jitter_fraction",
				reason: "Must be within [0, 1).".into(),
			});
		}

		Ok(())
	}

	/// Whether `error` permits another attempt under this policy.
	///
	/// Transport failures and per-attempt timeouts always do; HTTP statuses
	/// only when listed; decode, cancellation, and validation failures never.
	pub fn is_retryable(&self, error: &Error) -> bool {
		match error {
			Error::Transport { .. } | Error::Timeout { .. } => true,
			Error::HttpStatus { status, .. } => self.retryable_statuses.contains(&status.as_u16()),
			Error::Decode { .. } | Error::Cancelled | Error::Validation { .. } => false,
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			initial_delay: Duration::from_secs(1),
			multiplier: 2.0,
			jitter_fraction: 0.25,
			retryable_statuses: [408, 429, 500, 502, 503, 504].into(),
		}
	}
}

/// Tracks the attempt budget and computes backoff delays for one fetch
/// sequence.
#[derive(Debug)]
pub struct RetryExecutor<'a> {
	policy: &'a RetryPolicy,
	min_backoff: Duration,
	attempt: u32,
}
impl<'a> RetryExecutor<'a> {
	/// Create an executor positioned at the first attempt.
	pub fn new(policy: &'a RetryPolicy, min_backoff: Duration) -> Self {
		Self { policy, min_backoff, attempt: 1 }
	}

	/// 1-based number of the current attempt.
	pub fn attempt(&self) -> u32 {
		self.attempt
	}

	/// Whether the budget permits another attempt.
	pub fn can_retry(&self) -> bool {
		self.attempt < self.policy.max_attempts
	}

	/// Advance to the next attempt and compute the delay preceding it.
	///
	/// The base grows as `initial_delay × multiplier^(n−1)`; symmetric jitter
	/// within `±jitter_fraction` is applied, and the result never drops below
	/// the configured floor. Returns `None` once the budget is exhausted.
	pub fn next_backoff(&mut self) -> Option<Duration> {
		if !self.can_retry() {
			tracing::debug!(attempt = self.attempt, "attempt budget exhausted");

			return None;
		}

		let base = exponential_base(self.policy, self.attempt);

		self.attempt += 1;

		let delay = apply_jitter(base, self.policy.jitter_fraction).max(self.min_backoff);

		tracing::debug!(attempt = self.attempt, ?delay, "retry backoff computed");

		Some(delay)
	}
}

fn exponential_base(policy: &RetryPolicy, attempt: u32) -> Duration {
	let exponent = attempt.saturating_sub(1).min(32);
	let seconds = policy.initial_delay.as_secs_f64() * policy.multiplier.powi(exponent as i32);

	Duration::try_from_secs_f64(seconds.min(BACKOFF_CEILING.as_secs_f64()))
		.unwrap_or(BACKOFF_CEILING)
}

fn apply_jitter(base: Duration, fraction: f64) -> Duration {
	if fraction <= 0.0 || base.is_zero() {
		return base;
	}

	let factor = SMALL_RNG.with(|cell| cell.borrow_mut().random_range(-fraction..=fraction));

	base.mul_f64(1.0 + factor)
}
