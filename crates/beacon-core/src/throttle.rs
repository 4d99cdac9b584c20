// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Verbosity gate for SDK diagnostics.
//!
//! A [`LogThrottle`] holds the current [`LogLevel`] and is consulted before any
//! diagnostic is handed to `tracing`. The host still controls which `tracing`
//! events are recorded through its own subscriber; the throttle decides what
//! the SDK produces in the first place.
//!
//! ```
//! use beacon_core::{LogLevel, LogThrottle, Severity};
//!
//! let throttle = LogThrottle::default();
//! assert!(!throttle.should_emit(Severity::Error));
//!
//! throttle.set_level(LogLevel::All);
//! assert!(throttle.should_emit(Severity::Error));
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// How much diagnostic output the SDK produces.
///
/// Levels are cumulative: each one includes everything the previous one emits.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LogLevel {
	/// Essential notices only.
	#[default]
	Minimal = 0,
	/// Minimal plus warnings.
	Warnings = 1,
	/// Minimal plus warnings plus errors.
	Errors = 2,
	/// Everything, including verbose pipeline tracing.
	All = 3,
}

impl LogLevel {
	fn from_u8(value: u8) -> Self {
		match value {
			0 => LogLevel::Minimal,
			1 => LogLevel::Warnings,
			2 => LogLevel::Errors,
			_ => LogLevel::All,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			LogLevel::Minimal => "minimal",
			LogLevel::Warnings => "warnings",
			LogLevel::Errors => "errors",
			LogLevel::All => "all",
		}
	}
}

impl fmt::Display for LogLevel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for LogLevel {
	type Err = CoreError;

	/// Accepts level names and the numeric levels `0..=3`.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"minimal" | "0" => Ok(LogLevel::Minimal),
			"warnings" | "warning" | "1" => Ok(LogLevel::Warnings),
			"errors" | "error" | "2" => Ok(LogLevel::Errors),
			"all" | "3" => Ok(LogLevel::All),
			_ => Err(CoreError::InvalidLogLevel(s.to_string())),
		}
	}
}

/// Severity of a single diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
	Essential,
	Warning,
	Error,
	Verbose,
}

impl Severity {
	/// The lowest level at which this severity is emitted.
	pub fn required_level(&self) -> LogLevel {
		match self {
			Severity::Essential => LogLevel::Minimal,
			Severity::Warning => LogLevel::Warnings,
			Severity::Error => LogLevel::Errors,
			Severity::Verbose => LogLevel::All,
		}
	}
}

/// Shared, lock-free holder of the current [`LogLevel`].
#[derive(Debug)]
pub struct LogThrottle {
	level: AtomicU8,
}

impl LogThrottle {
	pub fn new(level: LogLevel) -> Self {
		Self {
			level: AtomicU8::new(level as u8),
		}
	}

	/// Changes the level; subsequent [`should_emit`](Self::should_emit) calls see it.
	pub fn set_level(&self, level: LogLevel) {
		self.level.store(level as u8, Ordering::Release);
	}

	pub fn level(&self) -> LogLevel {
		LogLevel::from_u8(self.level.load(Ordering::Acquire))
	}

	pub fn should_emit(&self, severity: Severity) -> bool {
		self.level() >= severity.required_level()
	}
}

impl Default for LogThrottle {
	fn default() -> Self {
		Self::new(LogLevel::default())
	}
}

/// Emits an `info` event if the throttle allows essential notices.
#[macro_export]
macro_rules! diag_info {
	($throttle:expr, $($arg:tt)+) => {
		if $throttle.should_emit($crate::Severity::Essential) {
			$crate::__tracing::info!($($arg)+);
		}
	};
}

/// Emits a `warn` event if the throttle allows warnings.
#[macro_export]
macro_rules! diag_warn {
	($throttle:expr, $($arg:tt)+) => {
		if $throttle.should_emit($crate::Severity::Warning) {
			$crate::__tracing::warn!($($arg)+);
		}
	};
}

/// Emits an `error` event if the throttle allows errors.
#[macro_export]
macro_rules! diag_error {
	($throttle:expr, $($arg:tt)+) => {
		if $throttle.should_emit($crate::Severity::Error) {
			$crate::__tracing::error!($($arg)+);
		}
	};
}

/// Emits a `debug` event if the throttle allows verbose output.
#[macro_export]
macro_rules! diag_debug {
	($throttle:expr, $($arg:tt)+) => {
		if $throttle.should_emit($crate::Severity::Verbose) {
			$crate::__tracing::debug!($($arg)+);
		}
	};
}
