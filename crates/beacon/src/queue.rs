// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded in-memory holding area for events awaiting persistence.
//!
//! `enqueue` is called on host threads and must stay cheap: it takes a short
//! mutex, appends, and evicts the oldest event when full. It never waits on
//! I/O and never reports failure.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use beacon_core::Event;

/// Result of a single [`EventQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnqueueOutcome {
	/// The oldest event was discarded to make room.
	pub evicted: bool,
	/// The queue is at or above its high-watermark and should be drained soon.
	pub high_watermark: bool,
}

pub struct EventQueue {
	events: Mutex<VecDeque<Event>>,
	capacity: usize,
	high_watermark: usize,
	dropped: AtomicU64,
}

impl EventQueue {
	/// Creates a queue holding at most `capacity` events (minimum 1).
	///
	/// `high_watermark` is clamped to `1..=capacity`.
	pub fn new(capacity: usize, high_watermark: usize) -> Self {
		let capacity = capacity.max(1);
		Self {
			events: Mutex::new(VecDeque::with_capacity(capacity)),
			capacity,
			high_watermark: high_watermark.clamp(1, capacity),
			dropped: AtomicU64::new(0),
		}
	}

	pub fn enqueue(&self, event: Event) -> EnqueueOutcome {
		let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());

		let mut evicted = false;
		while events.len() >= self.capacity {
			events.pop_front();
			evicted = true;
			self.dropped.fetch_add(1, Ordering::Relaxed);
		}

		events.push_back(event);

		EnqueueOutcome {
			evicted,
			high_watermark: events.len() >= self.high_watermark,
		}
	}

	/// Removes and returns up to `max_count` of the oldest events, in order.
	pub fn drain(&self, max_count: usize) -> Vec<Event> {
		let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
		let count = max_count.min(events.len());
		events.drain(..count).collect()
	}

	/// Puts events back at the front, e.g. after a failed persist, keeping
	/// their order. Anything beyond capacity is dropped from the oldest end.
	pub fn requeue_front(&self, returned: Vec<Event>) -> usize {
		let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
		for event in returned.into_iter().rev() {
			events.push_front(event);
		}

		let mut dropped = 0;
		while events.len() > self.capacity {
			events.pop_front();
			dropped += 1;
		}
		self.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
		dropped
	}

	pub fn len(&self) -> usize {
		self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	/// Total events discarded by the drop-oldest policy.
	pub fn dropped_count(&self) -> u64 {
		self.dropped.load(Ordering::Relaxed)
	}
}
