// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Batches of events submitted to the backend together.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::{Event, SequenceNumber};

/// Unique identifier for a batch, used by the backend to acknowledge and
/// deduplicate submissions.
///
/// Uses UUIDv7 so identifiers sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub Uuid);

impl BatchId {
	pub fn new() -> Self {
		let uuid7_val = uuid7::uuid7();
		Self(Uuid::from_bytes(*uuid7_val.as_bytes()))
	}
}

impl Default for BatchId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for BatchId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl std::str::FromStr for BatchId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

/// An ordered, immutable group of events.
///
/// A failed submission is retried with [`Batch::next_attempt`], which keeps the
/// identifier and the events and only bumps the attempt counter.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
	batch_id: BatchId,
	events: Vec<Event>,
	attempt: u32,
}

impl Batch {
	/// Forms a fresh batch. Events are ordered by sequence number.
	pub fn new(events: Vec<Event>) -> Self {
		Self::resume(BatchId::new(), 0, events)
	}

	/// Re-forms a batch that already has an identity, e.g. after a restart.
	pub fn resume(batch_id: BatchId, attempt: u32, mut events: Vec<Event>) -> Self {
		events.sort_by_key(|e| e.sequence_number);
		Self {
			batch_id,
			events,
			attempt,
		}
	}

	pub fn batch_id(&self) -> BatchId {
		self.batch_id
	}

	pub fn events(&self) -> &[Event] {
		&self.events
	}

	pub fn attempt(&self) -> u32 {
		self.attempt
	}

	pub fn len(&self) -> usize {
		self.events.len()
	}

	pub fn is_empty(&self) -> bool {
		self.events.is_empty()
	}

	pub fn sequences(&self) -> Vec<SequenceNumber> {
		self.events.iter().map(|e| e.sequence_number).collect()
	}

	/// The same batch, one attempt later.
	pub fn next_attempt(self) -> Self {
		Self {
			attempt: self.attempt.saturating_add(1),
			..self
		}
	}
}
