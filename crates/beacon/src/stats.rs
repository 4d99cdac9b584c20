// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Counters describing what happened to recorded events.
//!
//! These exist for diagnostics only; nothing in the pipeline reads them to
//! make decisions.

use std::sync::atomic::{AtomicU64, Ordering};

use beacon_core::DropReason;
use serde::Serialize;

#[derive(Debug, Default)]
pub struct DeliveryStats {
	recorded: AtomicU64,
	rejected_calls: AtomicU64,
	queue_overflow: AtomicU64,
	persisted: AtomicU64,
	delivered: AtomicU64,
	batches_delivered: AtomicU64,
	batches_failed: AtomicU64,
	dropped_expired: AtomicU64,
	dropped_exhausted: AtomicU64,
	dropped_rejected: AtomicU64,
	storage_errors: AtomicU64,
	pending: AtomicU64,
}

/// Point-in-time copy of [`DeliveryStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
	/// Events accepted by `record`.
	pub recorded: u64,
	/// `record` calls refused as caller misuse.
	pub rejected_calls: u64,
	/// Events discarded by the in-memory queue's drop-oldest policy.
	pub queue_overflow: u64,
	pub persisted: u64,
	pub delivered: u64,
	pub batches_delivered: u64,
	pub batches_failed: u64,
	pub dropped_expired: u64,
	pub dropped_exhausted: u64,
	pub dropped_rejected: u64,
	pub storage_errors: u64,
	/// Records waiting in the durable store at the last worker pass.
	pub pending: u64,
}

impl StatsSnapshot {
	/// Everything that left the pipeline without being delivered.
	pub fn total_dropped(&self) -> u64 {
		self.queue_overflow + self.dropped_expired + self.dropped_exhausted + self.dropped_rejected
	}
}

impl DeliveryStats {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn record_accepted(&self) {
		self.recorded.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_rejected(&self) {
		self.rejected_calls.fetch_add(1, Ordering::Relaxed);
	}

	pub fn queue_overflowed(&self, count: u64) {
		self.queue_overflow.fetch_add(count, Ordering::Relaxed);
	}

	pub fn persisted(&self, count: u64) {
		self.persisted.fetch_add(count, Ordering::Relaxed);
	}

	pub fn batch_delivered(&self, events: u64) {
		self.batches_delivered.fetch_add(1, Ordering::Relaxed);
		self.delivered.fetch_add(events, Ordering::Relaxed);
	}

	pub fn batch_failed(&self) {
		self.batches_failed.fetch_add(1, Ordering::Relaxed);
	}

	pub fn dropped(&self, reason: DropReason, count: u64) {
		let counter = match reason {
			DropReason::Expired => &self.dropped_expired,
			DropReason::RetriesExhausted => &self.dropped_exhausted,
			DropReason::Rejected => &self.dropped_rejected,
		};
		counter.fetch_add(count, Ordering::Relaxed);
	}

	pub fn storage_error(&self) {
		self.storage_errors.fetch_add(1, Ordering::Relaxed);
	}

	pub fn set_pending(&self, count: u64) {
		self.pending.store(count, Ordering::Relaxed);
	}

	pub fn snapshot(&self) -> StatsSnapshot {
		StatsSnapshot {
			recorded: self.recorded.load(Ordering::Relaxed),
			rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
			queue_overflow: self.queue_overflow.load(Ordering::Relaxed),
			persisted: self.persisted.load(Ordering::Relaxed),
			delivered: self.delivered.load(Ordering::Relaxed),
			batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
			batches_failed: self.batches_failed.load(Ordering::Relaxed),
			dropped_expired: self.dropped_expired.load(Ordering::Relaxed),
			dropped_exhausted: self.dropped_exhausted.load(Ordering::Relaxed),
			dropped_rejected: self.dropped_rejected.load(Ordering::Relaxed),
			storage_errors: self.storage_errors.load(Ordering::Relaxed),
			pending: self.pending.load(Ordering::Relaxed),
		}
	}
}
