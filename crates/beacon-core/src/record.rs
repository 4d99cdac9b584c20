// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persisted representation of an event and its delivery lifecycle.
//!
//! ```text
//! pending ──(batched)──▶ in-flight ──(acknowledged)──▶ delivered (removed)
//!    ▲                      │
//!    └──────(failed)────────┘
//! ```
//!
//! Records that exceed the retention age or belong to an abandoned batch are
//! dropped instead, and counted.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::batch::BatchId;
use crate::event::{Event, SequenceNumber};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
	Pending,
	InFlight,
	Delivered,
}

impl fmt::Display for DeliveryStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			DeliveryStatus::Pending => "pending",
			DeliveryStatus::InFlight => "in_flight",
			DeliveryStatus::Delivered => "delivered",
		};
		f.write_str(s)
	}
}

/// Why records were removed without being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
	/// Older than the retention window.
	Expired,
	/// The batch ran out of delivery attempts.
	RetriesExhausted,
	/// The backend refused the batch with a non-retryable error.
	Rejected,
}

impl fmt::Display for DropReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			DropReason::Expired => "expired",
			DropReason::RetriesExhausted => "retries_exhausted",
			DropReason::Rejected => "rejected",
		};
		f.write_str(s)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
	pub event: Event,
	pub status: DeliveryStatus,
	/// Batch the record was last assigned to, kept across failures so a retry
	/// reuses the same identifier.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub batch_id: Option<BatchId>,
	/// Attempt number of the last submission that included this record.
	#[serde(default)]
	pub attempt: u32,
	pub stored_at: DateTime<Utc>,
}

impl PersistedRecord {
	pub fn pending(event: Event) -> Self {
		Self {
			event,
			status: DeliveryStatus::Pending,
			batch_id: None,
			attempt: 0,
			stored_at: Utc::now(),
		}
	}

	pub fn sequence_number(&self) -> SequenceNumber {
		self.event.sequence_number
	}

	/// True once the record has been stored for longer than `max_age`.
	pub fn is_expired(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
		now.signed_duration_since(self.stored_at) > max_age
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_pending_record_defaults() {
		let record = PersistedRecord::pending(Event::new("a", SequenceNumber(3)));
		assert_eq!(record.status, DeliveryStatus::Pending);
		assert_eq!(record.batch_id, None);
		assert_eq!(record.attempt, 0);
		assert_eq!(record.sequence_number(), SequenceNumber(3));
	}

	#[test]
	fn test_expiry() {
		let mut record = PersistedRecord::pending(Event::new("a", SequenceNumber(1)));
		let now = Utc::now();
		record.stored_at = now - chrono::Duration::days(8);
		assert!(record.is_expired(now, chrono::Duration::days(7)));
		record.stored_at = now - chrono::Duration::days(6);
		assert!(!record.is_expired(now, chrono::Duration::days(7)));
	}

	#[test]
	fn test_status_serde() {
		assert_eq!(
			serde_json::to_string(&DeliveryStatus::InFlight).unwrap(),
			"\"in_flight\""
		);
		assert_eq!(
			serde_json::to_string(&DropReason::RetriesExhausted).unwrap(),
			"\"retries_exhausted\""
		);
	}
}
