// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Monotonic timer reference used to compute event durations.
//!
//! Readings are milliseconds since the clock was created and are unaffected by
//! wall-clock changes (NTP, timezone, manual edits). Durations computed from
//! them are never negative: a start reading that lies in the future is clamped
//! to zero and counted as an anomaly.
//!
//! ```
//! use beacon_core::TimerReferenceClock;
//!
//! let clock = TimerReferenceClock::new();
//! let timer = clock.start_timer();
//! // ... timed work ...
//! let seconds = clock.finish(timer);
//! assert!(seconds >= 0.0);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::diag_warn;
use crate::throttle::LogThrottle;

/// A monotonic clock reading with millisecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
	millis: u64,
}

impl Timestamp {
	pub fn from_millis(millis: u64) -> Self {
		Self { millis }
	}

	/// Converts a raw timer reference (seconds) back into a reading.
	///
	/// Returns `None` for negative or non-finite references.
	pub fn from_secs_f64(seconds: f64) -> Option<Self> {
		if !seconds.is_finite() || seconds < 0.0 {
			return None;
		}
		Some(Self {
			millis: (seconds * 1000.0).round() as u64,
		})
	}

	pub fn as_millis(&self) -> u64 {
		self.millis
	}

	pub fn as_secs_f64(&self) -> f64 {
		self.millis as f64 / 1000.0
	}
}

impl fmt::Display for Timestamp {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:.3}s", self.as_secs_f64())
	}
}

/// A started timer. Consumed by [`TimerReferenceClock::finish`] or by the
/// client's timed-record call; it cannot be cloned, so it is used at most once.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a timer handle does nothing unless it is finished"]
pub struct TimerHandle {
	reading: Timestamp,
}

impl TimerHandle {
	pub fn reading(&self) -> Timestamp {
		self.reading
	}
}

/// Monotonic reference clock shared by everything that measures durations.
#[derive(Debug)]
pub struct TimerReferenceClock {
	origin: Instant,
	anomalies: AtomicU64,
	throttle: Arc<LogThrottle>,
}

impl TimerReferenceClock {
	pub fn new() -> Self {
		Self::with_throttle(Arc::new(LogThrottle::default()))
	}

	pub fn with_throttle(throttle: Arc<LogThrottle>) -> Self {
		Self {
			origin: Instant::now(),
			anomalies: AtomicU64::new(0),
			throttle,
		}
	}

	pub fn now(&self) -> Timestamp {
		Timestamp {
			millis: self.origin.elapsed().as_millis() as u64,
		}
	}

	/// Seconds elapsed since `start`, never negative.
	pub fn elapsed(&self, start: Timestamp) -> f64 {
		let now = self.now();
		if start > now {
			self.anomalies.fetch_add(1, Ordering::Relaxed);
			diag_warn!(
				self.throttle,
				start = %start,
				now = %now,
				"timer reading is ahead of the clock, clamping duration to zero"
			);
			return 0.0;
		}
		(now.millis - start.millis) as f64 / 1000.0
	}

	/// Current reading expressed as seconds with millisecond precision.
	pub fn timer_reference(&self) -> f64 {
		self.now().as_secs_f64()
	}

	pub fn start_timer(&self) -> TimerHandle {
		TimerHandle {
			reading: self.now(),
		}
	}

	/// Consumes `handle` and returns the seconds elapsed since it was started.
	pub fn finish(&self, handle: TimerHandle) -> f64 {
		self.elapsed(handle.reading)
	}

	/// Number of clamped (would-be negative) durations observed so far.
	pub fn anomaly_count(&self) -> u64 {
		self.anomalies.load(Ordering::Relaxed)
	}
}

impl Default for TimerReferenceClock {
	fn default() -> Self {
		Self::new()
	}
}
