// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Event types for recording host application activity.
//!
//! Each event has a name, scalar attributes, the wall-clock time it was
//! created, an optional duration and a per-process sequence number that orders
//! events and keys delivery deduplication.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of an event name in characters.
pub const MAX_EVENT_NAME_LENGTH: usize = 200;

/// Maximum number of attributes attached to a single event.
pub const MAX_ATTRIBUTES: usize = 64;

/// A scalar attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
	Bool(bool),
	Integer(i64),
	Float(f64),
	String(String),
}

impl AttributeValue {
	/// False for floats JSON has no representation for (NaN and infinities).
	pub fn is_encodable(&self) -> bool {
		match self {
			AttributeValue::Float(value) => value.is_finite(),
			_ => true,
		}
	}
}

impl From<&str> for AttributeValue {
	fn from(value: &str) -> Self {
		AttributeValue::String(value.to_string())
	}
}

impl From<String> for AttributeValue {
	fn from(value: String) -> Self {
		AttributeValue::String(value)
	}
}

impl From<bool> for AttributeValue {
	fn from(value: bool) -> Self {
		AttributeValue::Bool(value)
	}
}

impl From<i64> for AttributeValue {
	fn from(value: i64) -> Self {
		AttributeValue::Integer(value)
	}
}

impl From<i32> for AttributeValue {
	fn from(value: i32) -> Self {
		AttributeValue::Integer(value.into())
	}
}

impl From<u32> for AttributeValue {
	fn from(value: u32) -> Self {
		AttributeValue::Integer(value.into())
	}
}

impl From<f64> for AttributeValue {
	fn from(value: f64) -> Self {
		AttributeValue::Float(value)
	}
}

impl fmt::Display for AttributeValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			AttributeValue::Bool(v) => write!(f, "{v}"),
			AttributeValue::Integer(v) => write!(f, "{v}"),
			AttributeValue::Float(v) => write!(f, "{v}"),
			AttributeValue::String(v) => f.write_str(v),
		}
	}
}

/// Attribute map as carried by an [`Event`]. Ordered for stable encoding.
pub type AttributeMap = BTreeMap<String, AttributeValue>;

/// Position of an event within one process run.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SequenceNumber(pub u64);

impl fmt::Display for SequenceNumber {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Hands out strictly increasing sequence numbers.
#[derive(Debug)]
pub struct SequenceGenerator {
	next: AtomicU64,
}

impl SequenceGenerator {
	pub fn new() -> Self {
		Self::starting_at(1)
	}

	pub fn starting_at(first: u64) -> Self {
		Self {
			next: AtomicU64::new(first),
		}
	}

	/// Makes sure future numbers are greater than `seen`.
	pub fn advance_past(&self, seen: SequenceNumber) {
		self.next.fetch_max(seen.0.saturating_add(1), Ordering::AcqRel);
	}

	pub fn next(&self) -> SequenceNumber {
		SequenceNumber(self.next.fetch_add(1, Ordering::AcqRel))
	}
}

impl Default for SequenceGenerator {
	fn default() -> Self {
		Self::new()
	}
}

/// A recorded occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
	pub name: String,
	#[serde(default)]
	pub attributes: AttributeMap,
	pub created_at: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub duration_seconds: Option<f64>,
	pub sequence_number: SequenceNumber,
}

impl Event {
	/// Creates an event stamped with the current wall-clock time.
	pub fn new(name: impl Into<String>, sequence_number: SequenceNumber) -> Self {
		Self {
			name: name.into(),
			attributes: AttributeMap::new(),
			created_at: Utc::now(),
			duration_seconds: None,
			sequence_number,
		}
	}

	/// Sets the event attributes (builder pattern).
	pub fn with_attributes(mut self, attributes: AttributeMap) -> Self {
		self.attributes = attributes;
		self
	}

	/// Sets the event duration in seconds (builder pattern).
	pub fn with_duration(mut self, seconds: f64) -> Self {
		self.duration_seconds = Some(seconds);
		self
	}

	/// Overrides the creation timestamp (builder pattern).
	pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
		self.created_at = created_at;
		self
	}
}

/// Validates an event name.
///
/// Names must be 1 to [`MAX_EVENT_NAME_LENGTH`] characters, must not be only
/// whitespace and must not contain control characters.
pub fn validate_event_name(name: &str) -> bool {
	let len = name.chars().count();
	len > 0
		&& len <= MAX_EVENT_NAME_LENGTH
		&& !name.trim().is_empty()
		&& !name.chars().any(char::is_control)
}

/// Validates a duration in seconds: finite and non-negative.
pub fn validate_duration(seconds: f64) -> bool {
	seconds.is_finite() && seconds >= 0.0
}
