// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Exponential backoff with jitter for retrying failed submissions.
//!
//! Unlike a fire-and-retry helper, the caller owns the retry loop: it asks a
//! [`Backoff`] for the next delay after each failure and decides itself when
//! to sleep. Delays handed out by one [`Backoff`] never decrease, even with
//! jitter, and stop once the attempt budget is used up.

use reqwest::StatusCode;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
	/// Total submissions allowed for one unit of work, the first included.
	pub max_attempts: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub backoff_factor: f64,
	/// Fraction of the exponential delay added at random, in `0.0..=1.0`.
	pub jitter: f64,
}

impl Default for BackoffPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 8,
			base_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(300),
			backoff_factor: 2.0,
			jitter: 0.25,
		}
	}
}

pub trait RetryableError {
	fn is_retryable(&self) -> bool;
}

/// Status codes worth retrying: throttling, timeouts and server-side failures.
pub fn is_retryable_status(status: StatusCode) -> bool {
	matches!(
		status,
		StatusCode::TOO_MANY_REQUESTS
			| StatusCode::REQUEST_TIMEOUT
			| StatusCode::INTERNAL_SERVER_ERROR
			| StatusCode::BAD_GATEWAY
			| StatusCode::SERVICE_UNAVAILABLE
			| StatusCode::GATEWAY_TIMEOUT
	)
}

impl RetryableError for reqwest::Error {
	fn is_retryable(&self) -> bool {
		if self.is_timeout() || self.is_connect() || self.is_request() {
			return true;
		}

		if let Some(status) = self.status() {
			return is_retryable_status(status);
		}

		false
	}
}

/// Delay before retry number `retry` (0-based) with the given random sample in
/// `0.0..1.0`, capped at `max_delay`.
pub fn calculate_delay(policy: &BackoffPolicy, retry: u32, sample: f64) -> Duration {
	let exponential = policy.base_delay.as_secs_f64()
		* policy
			.backoff_factor
			.powi(retry.min(i32::MAX as u32) as i32);
	let jittered = exponential * (1.0 + policy.jitter.clamp(0.0, 1.0) * sample.clamp(0.0, 1.0));
	let capped = jittered.min(policy.max_delay.as_secs_f64());

	if capped.is_finite() && capped > 0.0 {
		Duration::from_secs_f64(capped)
	} else if capped.is_finite() {
		Duration::ZERO
	} else {
		policy.max_delay
	}
}

/// Retry state for one unit of work.
#[derive(Debug, Clone)]
pub struct Backoff {
	policy: BackoffPolicy,
	failures: u32,
	last_delay: Duration,
}

impl Backoff {
	pub fn new(policy: BackoffPolicy) -> Self {
		Self {
			policy,
			failures: 0,
			last_delay: Duration::ZERO,
		}
	}

	/// Resumes tracking for work that has already failed `failures` times.
	pub fn resume(policy: BackoffPolicy, failures: u32) -> Self {
		Self {
			policy,
			failures,
			last_delay: Duration::ZERO,
		}
	}

	/// Records one failure and returns how long to wait before the next
	/// attempt, or `None` once the attempt budget is exhausted.
	///
	/// `at_least` raises the delay, e.g. for a server-provided `Retry-After`.
	pub fn next_delay(&mut self, at_least: Option<Duration>) -> Option<Duration> {
		self.failures = self.failures.saturating_add(1);
		if self.failures >= self.policy.max_attempts {
			return None;
		}

		let mut delay = calculate_delay(&self.policy, self.failures - 1, fastrand::f64());
		if let Some(floor) = at_least {
			delay = delay.max(floor);
		}
		delay = delay.max(self.last_delay);
		self.last_delay = delay;
		Some(delay)
	}

	pub fn failures(&self) -> u32 {
		self.failures
	}

	pub fn is_exhausted(&self) -> bool {
		self.failures >= self.policy.max_attempts
	}

	pub fn policy(&self) -> &BackoffPolicy {
		&self.policy
	}
}
