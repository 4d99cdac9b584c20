// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background worker that persists queued events and delivers batches.
//!
//! One [`BatchDispatcher`] runs per client on a tokio task and is the only
//! owner of the [`DurableStore`]. Host threads talk to it through [`Shared`]:
//! they push into the queue and poke one of two [`Notify`]s. Notifications
//! coalesce, so a burst of triggers while a batch is in flight results in a
//! single follow-up pass.
//!
//! At most one batch is in flight. A failed batch is retried with the same id
//! and events after a backoff delay, and nothing newer is sent until it is
//! delivered or abandoned.

use std::sync::Arc;
use std::time::Duration;

use beacon_common_http::{Backoff, BackoffPolicy, RetryableError};
use beacon_core::{
	diag_debug, diag_error, diag_info, diag_warn, Batch, BatchId, DropReason, Event, LogThrottle,
};
use chrono::Utc;
use tokio::sync::{watch, Notify};
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::BeaconError;
use crate::queue::EventQueue;
use crate::stats::DeliveryStats;
use crate::store::DurableStore;
use crate::transport::BatchTransport;

/// Events moved from the queue to the store per write.
const PERSIST_CHUNK: usize = 256;

/// State shared between host threads and the worker.
pub struct Shared {
	pub queue: EventQueue,
	pub stats: DeliveryStats,
	pub throttle: Arc<LogThrottle>,
	/// Persist queued events soon; dispatch only if the store is filling up.
	pub persist: Notify,
	/// Persist and dispatch now.
	pub dispatch: Notify,
}

impl Shared {
	pub fn new(queue: EventQueue, throttle: Arc<LogThrottle>) -> Self {
		Self {
			queue,
			stats: DeliveryStats::new(),
			throttle,
			persist: Notify::new(),
			dispatch: Notify::new(),
		}
	}
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
	pub max_batch_size: usize,
	pub flush_interval: Duration,
	pub store_high_watermark: usize,
	pub backoff: BackoffPolicy,
	pub shutdown_timeout: Duration,
}

impl Default for DispatcherConfig {
	fn default() -> Self {
		Self {
			max_batch_size: 50,
			flush_interval: Duration::from_secs(30),
			store_high_watermark: 500,
			backoff: BackoffPolicy::default(),
			shutdown_timeout: Duration::from_secs(5),
		}
	}
}

/// What a single dispatch step did.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
	/// Nothing was due.
	Idle,
	Delivered {
		batch_id: BatchId,
		count: usize,
	},
	/// Submission failed; the same batch goes out again after `delay` as
	/// attempt number `attempt`.
	RetryScheduled {
		batch_id: BatchId,
		attempt: u32,
		delay: Duration,
	},
	Abandoned {
		batch_id: BatchId,
		count: usize,
		reason: DropReason,
	},
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
	Tick,
	Persist,
	Dispatch,
	RetryDue,
	Shutdown,
}

struct ScheduledRetry {
	batch: Batch,
	backoff: Backoff,
	due: Instant,
}

pub struct BatchDispatcher {
	store: DurableStore,
	transport: Arc<dyn BatchTransport>,
	shared: Arc<Shared>,
	config: DispatcherConfig,
	retry: Option<ScheduledRetry>,
}

impl BatchDispatcher {
	pub fn new(
		store: DurableStore,
		transport: Arc<dyn BatchTransport>,
		shared: Arc<Shared>,
		config: DispatcherConfig,
	) -> Self {
		Self {
			store,
			transport,
			shared,
			config,
			retry: None,
		}
	}

	/// Runs until `shutdown` flips to true or its sender is dropped, then
	/// performs one bounded best-effort flush.
	pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
		let shared = self.shared.clone();
		diag_debug!(
			shared.throttle,
			flush_interval_secs = self.config.flush_interval.as_secs(),
			max_batch_size = self.config.max_batch_size,
			"Starting batch dispatcher"
		);

		let mut ticker = tokio::time::interval(self.config.flush_interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			let retry_due = self.retry.as_ref().map(|r| r.due);
			let wake = tokio::select! {
				biased;
				changed = shutdown.changed() => {
					if changed.is_err() || *shutdown.borrow() {
						Wake::Shutdown
					} else {
						continue;
					}
				}
				_ = shared.dispatch.notified() => Wake::Dispatch,
				_ = sleep_until(retry_due) => Wake::RetryDue,
				_ = ticker.tick() => Wake::Tick,
				_ = shared.persist.notified() => Wake::Persist,
			};

			if wake == Wake::Shutdown {
				break;
			}

			self.persist_queued();
			if wake == Wake::Tick {
				self.purge_expired();
			}

			let store_full = self.store.pending_count() >= self.config.store_high_watermark;
			if wake != Wake::Persist || store_full {
				// A send cut short here leaves its batch in flight on disk;
				// the shutdown flush or the next launch resends it.
				let interrupted = tokio::select! {
					biased;
					_ = shutdown_signalled(&mut shutdown) => true,
					_ = self.drain() => false,
				};
				if interrupted {
					break;
				}
			}
			shared.stats.set_pending(self.store.pending_count() as u64);
		}

		self.shutdown_flush().await;
		diag_debug!(shared.throttle, "Batch dispatcher stopped");
	}

	/// Moves everything in the queue into the store.
	///
	/// A write failure puts the events back at the front of the queue, where
	/// the next pass retries them.
	pub fn persist_queued(&mut self) {
		loop {
			let events = self.shared.queue.drain(PERSIST_CHUNK);
			if events.is_empty() {
				return;
			}

			match self.store.append(&events) {
				Ok(count) => self.shared.stats.persisted(count as u64),
				Err(e) => {
					self.shared.stats.storage_error();
					diag_error!(self.shared.throttle, error = %e, count = events.len(), "Failed to persist events, keeping them in memory");
					let lost = self.shared.queue.requeue_front(events);
					if lost > 0 {
						self.shared.stats.queue_overflowed(lost as u64);
					}
					return;
				}
			}
		}
	}

	fn purge_expired(&mut self) {
		match self.store.purge_expired(Utc::now()) {
			Ok(0) => {}
			Ok(count) => self.shared.stats.dropped(DropReason::Expired, count as u64),
			Err(e) => {
				self.shared.stats.storage_error();
				diag_error!(self.shared.throttle, error = %e, "Failed to purge expired events");
			}
		}
	}

	/// Sends batches until nothing is due or a submission fails.
	async fn drain(&mut self) {
		loop {
			self.persist_queued();
			match self.dispatch_once().await {
				DispatchOutcome::Delivered { .. } if self.has_pending() => continue,
				_ => return,
			}
		}
	}

	fn has_pending(&self) -> bool {
		!self.store.load_pending(1).is_empty()
	}

	/// Sends the next due batch, if any, and settles its outcome.
	pub async fn dispatch_once(&mut self) -> DispatchOutcome {
		self.dispatch(false).await
	}

	async fn dispatch(&mut self, ignore_backoff: bool) -> DispatchOutcome {
		let Some((batch, mut backoff)) = self.take_due_batch(ignore_backoff) else {
			return DispatchOutcome::Idle;
		};

		if backoff.is_exhausted() {
			return self.abandon(&batch, DropReason::RetriesExhausted);
		}

		if let Err(e) = self.store.mark_in_flight(&batch) {
			self.shared.stats.storage_error();
			diag_error!(self.shared.throttle, error = %e, batch_id = %batch.batch_id(), "Failed to mark batch in flight");
			let due = Instant::now() + self.config.backoff.base_delay;
			self.retry = Some(ScheduledRetry {
				batch,
				backoff,
				due,
			});
			return DispatchOutcome::Idle;
		}

		let batch_id = batch.batch_id();
		match self.transport.send(&batch).await {
			Ok(()) => {
				let count = batch.len();
				if let Err(e) = self.store.mark_delivered(batch_id) {
					self.shared.stats.storage_error();
					diag_error!(self.shared.throttle, error = %e, batch_id = %batch_id, "Failed to record delivery");
				}
				self.shared.stats.batch_delivered(count as u64);
				diag_debug!(self.shared.throttle, batch_id = %batch_id, count, attempt = batch.attempt(), "Batch delivered");
				DispatchOutcome::Delivered { batch_id, count }
			}
			Err(e) => {
				self.shared.stats.batch_failed();
				if !e.is_retryable() {
					diag_error!(self.shared.throttle, error = %e, batch_id = %batch_id, "Batch rejected");
					return self.abandon(&batch, DropReason::Rejected);
				}

				let Some(delay) = backoff.next_delay(retry_after(&e)) else {
					diag_warn!(self.shared.throttle, error = %e, batch_id = %batch_id, attempts = backoff.failures(), "Batch retries exhausted");
					return self.abandon(&batch, DropReason::RetriesExhausted);
				};

				if let Err(store_err) = self.store.mark_failed(batch_id) {
					self.shared.stats.storage_error();
					diag_error!(self.shared.throttle, error = %store_err, batch_id = %batch_id, "Failed to record batch failure");
				}

				let batch = batch.next_attempt();
				let attempt = batch.attempt();
				diag_warn!(
					self.shared.throttle,
					error = %e,
					batch_id = %batch_id,
					attempt,
					delay_ms = delay.as_millis() as u64,
					"Batch submission failed, retrying"
				);
				self.retry = Some(ScheduledRetry {
					batch,
					backoff,
					due: Instant::now() + delay,
				});
				DispatchOutcome::RetryScheduled {
					batch_id,
					attempt,
					delay,
				}
			}
		}
	}

	/// The scheduled retry if it is due, otherwise the next batch from the
	/// store. A scheduled retry that is not yet due blocks newer batches.
	fn take_due_batch(&mut self, ignore_backoff: bool) -> Option<(Batch, Backoff)> {
		if let Some(retry) = &self.retry {
			if !ignore_backoff && Instant::now() < retry.due {
				return None;
			}
			let retry = self.retry.take()?;
			return Some((retry.batch, retry.backoff));
		}
		self.batch_from_store()
	}

	fn batch_from_store(&mut self) -> Option<(Batch, Backoff)> {
		let pending = self.store.load_pending(self.config.max_batch_size);
		let first = pending.first()?;

		// A batch interrupted by a previous run goes out again under its own id.
		if let Some(batch_id) = first.batch_id {
			let records = self.store.batch_records(batch_id);
			let attempt = records
				.iter()
				.map(|r| r.attempt)
				.max()
				.unwrap_or(0)
				.saturating_add(1);
			let events: Vec<Event> = records.into_iter().map(|r| r.event).collect();
			diag_info!(self.shared.throttle, batch_id = %batch_id, attempt, count = events.len(), "Resuming interrupted batch");
			return Some((
				Batch::resume(batch_id, attempt, events),
				Backoff::resume(self.config.backoff.clone(), attempt),
			));
		}

		let events: Vec<Event> = pending
			.into_iter()
			.filter(|r| r.batch_id.is_none())
			.map(|r| r.event)
			.collect();
		Some((Batch::new(events), Backoff::new(self.config.backoff.clone())))
	}

	/// Drops the batch's stored records. Only records actually removed from
	/// the store are counted; if the store cannot record the drop the batch
	/// still counts as dropped for this session.
	fn abandon(&mut self, batch: &Batch, reason: DropReason) -> DispatchOutcome {
		let batch_id = batch.batch_id();
		let count = match self.store.drop_batch(batch_id, reason) {
			Ok(removed) => removed,
			Err(e) => {
				self.shared.stats.storage_error();
				diag_error!(self.shared.throttle, error = %e, batch_id = %batch_id, "Failed to drop abandoned batch");
				batch.len()
			}
		};
		self.shared.stats.dropped(reason, count as u64);
		diag_warn!(self.shared.throttle, batch_id = %batch_id, count, reason = %reason, "Abandoned batch");
		DispatchOutcome::Abandoned {
			batch_id,
			count,
			reason,
		}
	}

	/// Persists the queue, then sends whatever it can in one attempt per
	/// batch without sleeping, bounded by the shutdown timeout. Anything left
	/// stays in the store for the next launch.
	async fn shutdown_flush(&mut self) {
		self.persist_queued();

		let throttle = self.shared.throttle.clone();
		let timeout = self.config.shutdown_timeout;
		let flushed = tokio::time::timeout(timeout, async {
			loop {
				match self.dispatch(true).await {
					DispatchOutcome::Delivered { .. } if self.has_pending() => continue,
					_ => return,
				}
			}
		})
		.await;

		if flushed.is_err() {
			diag_warn!(
				throttle,
				timeout_ms = timeout.as_millis() as u64,
				"Shutdown flush timed out, remaining events stay on disk"
			);
		}
		self.shared.stats.set_pending(self.store.pending_count() as u64);
	}
}

fn retry_after(err: &BeaconError) -> Option<Duration> {
	match err {
		BeaconError::RateLimited {
			retry_after_secs: Some(secs),
		} => Some(Duration::from_secs(*secs)),
		_ => None,
	}
}

/// Resolves once shutdown is requested or the sender is gone.
async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
	while !*shutdown.borrow_and_update() {
		if shutdown.changed().await.is_err() {
			return;
		}
	}
}

async fn sleep_until(deadline: Option<Instant>) {
	match deadline {
		Some(deadline) => tokio::time::sleep_until(deadline).await,
		None => std::future::pending().await,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::Result;
	use crate::store::StoreConfig;
	use async_trait::async_trait;
	use beacon_core::{LogLevel, SequenceNumber};
	use std::collections::VecDeque;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Mutex;
	use tempfile::TempDir;

	#[derive(Debug, Clone, PartialEq)]
	struct Submission {
		batch_id: BatchId,
		attempt: u32,
		sequences: Vec<SequenceNumber>,
		at: Instant,
	}

	/// Fails with the scripted errors in order, then succeeds.
	#[derive(Default)]
	struct ScriptedTransport {
		errors: Mutex<VecDeque<BeaconError>>,
		sent: Mutex<Vec<Submission>>,
	}

	impl ScriptedTransport {
		fn failing_with(errors: Vec<BeaconError>) -> Arc<Self> {
			Arc::new(Self {
				errors: Mutex::new(errors.into()),
				sent: Mutex::new(Vec::new()),
			})
		}

		fn sent(&self) -> Vec<Submission> {
			self.sent.lock().unwrap().clone()
		}
	}

	#[async_trait]
	impl BatchTransport for ScriptedTransport {
		async fn send(&self, batch: &Batch) -> Result<()> {
			self.sent.lock().unwrap().push(Submission {
				batch_id: batch.batch_id(),
				attempt: batch.attempt(),
				sequences: batch.sequences(),
				at: Instant::now(),
			});
			match self.errors.lock().unwrap().pop_front() {
				Some(err) => Err(err),
				None => Ok(()),
			}
		}
	}

	fn unavailable() -> BeaconError {
		BeaconError::ServerError {
			status: 503,
			message: "unavailable".to_string(),
		}
	}

	struct Harness {
		_dir: TempDir,
		shared: Arc<Shared>,
		dispatcher: BatchDispatcher,
	}

	fn harness(transport: Arc<dyn BatchTransport>, config: DispatcherConfig) -> Harness {
		harness_with_retention(transport, config, crate::store::DEFAULT_RETENTION)
	}

	fn harness_with_retention(
		transport: Arc<dyn BatchTransport>,
		config: DispatcherConfig,
		retention: Duration,
	) -> Harness {
		let dir = TempDir::new().unwrap();
		let throttle = Arc::new(LogThrottle::new(LogLevel::All));
		let store = DurableStore::open(
			StoreConfig {
				retention,
				..StoreConfig::new(dir.path().join("events.log"))
			},
			throttle.clone(),
		)
		.unwrap();
		let shared = Arc::new(Shared::new(EventQueue::new(100, 80), throttle));
		let dispatcher = BatchDispatcher::new(store, transport, shared.clone(), config);
		Harness {
			_dir: dir,
			shared,
			dispatcher,
		}
	}

	fn policy(max_attempts: u32) -> BackoffPolicy {
		BackoffPolicy {
			max_attempts,
			base_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(60),
			backoff_factor: 2.0,
			jitter: 0.25,
		}
	}

	fn enqueue(shared: &Shared, names: &[&str], first_seq: u64) {
		for (i, name) in names.iter().enumerate() {
			shared
				.queue
				.enqueue(Event::new(*name, SequenceNumber(first_seq + i as u64)));
		}
	}

	#[tokio::test]
	async fn test_idle_when_nothing_pending() {
		let transport = ScriptedTransport::failing_with(vec![]);
		let mut h = harness(transport.clone(), DispatcherConfig::default());
		assert_eq!(h.dispatcher.dispatch_once().await, DispatchOutcome::Idle);
		assert!(transport.sent().is_empty());
	}

	#[tokio::test]
	async fn test_delivers_in_enqueue_order_and_respects_batch_size() {
		let transport = ScriptedTransport::failing_with(vec![]);
		let mut h = harness(
			transport.clone(),
			DispatcherConfig {
				max_batch_size: 2,
				..Default::default()
			},
		);
		enqueue(&h.shared, &["A", "B", "C"], 1);
		h.dispatcher.persist_queued();

		let first = h.dispatcher.dispatch_once().await;
		assert!(matches!(first, DispatchOutcome::Delivered { count: 2, .. }));
		let second = h.dispatcher.dispatch_once().await;
		assert!(matches!(second, DispatchOutcome::Delivered { count: 1, .. }));

		let sent = transport.sent();
		assert_eq!(sent[0].sequences, vec![SequenceNumber(1), SequenceNumber(2)]);
		assert_eq!(sent[1].sequences, vec![SequenceNumber(3)]);
		assert_eq!(h.shared.stats.snapshot().delivered, 3);
		assert_eq!(h.dispatcher.store.pending_count(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_failures_retry_same_batch_with_non_decreasing_delays() {
		let failures = 4;
		let transport =
			ScriptedTransport::failing_with((0..failures).map(|_| unavailable()).collect());
		let mut h = harness(
			transport.clone(),
			DispatcherConfig {
				backoff: policy(8),
				..Default::default()
			},
		);
		enqueue(&h.shared, &["A", "B", "C"], 1);
		h.dispatcher.persist_queued();

		let mut delays = Vec::new();
		loop {
			match h.dispatcher.dispatch_once().await {
				DispatchOutcome::RetryScheduled { delay, .. } => {
					assert_eq!(h.dispatcher.dispatch_once().await, DispatchOutcome::Idle);
					delays.push(delay);
					tokio::time::advance(delay).await;
				}
				DispatchOutcome::Delivered { count, .. } => {
					assert_eq!(count, 3);
					break;
				}
				other => panic!("unexpected outcome {other:?}"),
			}
		}

		assert_eq!(delays.len(), failures);
		assert!(delays.windows(2).all(|w| w[0] <= w[1]), "{delays:?}");

		let sent = transport.sent();
		assert_eq!(sent.len(), failures + 1);
		let attempts: Vec<u32> = sent.iter().map(|s| s.attempt).collect();
		assert_eq!(attempts, (0..=failures as u32).collect::<Vec<_>>());
		assert!(sent.iter().all(|s| s.batch_id == sent[0].batch_id));
		assert!(sent.iter().all(|s| s.sequences == sent[0].sequences));
		assert_eq!(h.dispatcher.store.pending_count(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_exhausted_retries_drop_the_batch() {
		let transport =
			ScriptedTransport::failing_with((0..10).map(|_| unavailable()).collect());
		let mut h = harness(
			transport.clone(),
			DispatcherConfig {
				backoff: policy(3),
				..Default::default()
			},
		);
		enqueue(&h.shared, &["A", "B"], 1);
		h.dispatcher.persist_queued();

		let outcome = loop {
			match h.dispatcher.dispatch_once().await {
				DispatchOutcome::RetryScheduled { delay, .. } => tokio::time::advance(delay).await,
				other => break other,
			}
		};

		assert!(matches!(
			outcome,
			DispatchOutcome::Abandoned {
				count: 2,
				reason: DropReason::RetriesExhausted,
				..
			}
		));
		assert_eq!(transport.sent().len(), 3);
		assert_eq!(h.shared.stats.snapshot().dropped_exhausted, 2);
		assert_eq!(h.dispatcher.store.pending_count(), 0);

		tokio::time::advance(Duration::from_secs(600)).await;
		assert_eq!(h.dispatcher.dispatch_once().await, DispatchOutcome::Idle);
		assert_eq!(transport.sent().len(), 3);
	}

	#[tokio::test]
	async fn test_non_retryable_error_abandons_immediately() {
		let transport = ScriptedTransport::failing_with(vec![BeaconError::ServerError {
			status: 400,
			message: "malformed".to_string(),
		}]);
		let mut h = harness(transport.clone(), DispatcherConfig::default());
		enqueue(&h.shared, &["A"], 1);
		h.dispatcher.persist_queued();

		let outcome = h.dispatcher.dispatch_once().await;
		assert!(matches!(
			outcome,
			DispatchOutcome::Abandoned {
				reason: DropReason::Rejected,
				..
			}
		));
		assert_eq!(h.shared.stats.snapshot().dropped_rejected, 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_retry_after_raises_delay() {
		let transport = ScriptedTransport::failing_with(vec![BeaconError::RateLimited {
			retry_after_secs: Some(45),
		}]);
		let mut h = harness(
			transport,
			DispatcherConfig {
				backoff: policy(8),
				..Default::default()
			},
		);
		enqueue(&h.shared, &["A"], 1);
		h.dispatcher.persist_queued();

		match h.dispatcher.dispatch_once().await {
			DispatchOutcome::RetryScheduled { delay, attempt, .. } => {
				assert!(delay >= Duration::from_secs(45));
				assert_eq!(attempt, 1);
			}
			other => panic!("unexpected outcome {other:?}"),
		}
	}

	#[tokio::test(start_paused = true)]
	async fn test_pending_retry_blocks_newer_batches() {
		let transport = ScriptedTransport::failing_with(vec![unavailable()]);
		let mut h = harness(
			transport.clone(),
			DispatcherConfig {
				max_batch_size: 1,
				backoff: policy(8),
				..Default::default()
			},
		);
		enqueue(&h.shared, &["A", "B"], 1);
		h.dispatcher.persist_queued();

		let DispatchOutcome::RetryScheduled { delay, .. } = h.dispatcher.dispatch_once().await else {
			panic!("first send should fail");
		};
		assert_eq!(h.dispatcher.dispatch_once().await, DispatchOutcome::Idle);

		tokio::time::advance(delay).await;
		h.dispatcher.dispatch_once().await;
		h.dispatcher.dispatch_once().await;

		let order: Vec<Vec<SequenceNumber>> =
			transport.sent().into_iter().map(|s| s.sequences).collect();
		assert_eq!(
			order,
			vec![
				vec![SequenceNumber(1)],
				vec![SequenceNumber(1)],
				vec![SequenceNumber(2)]
			]
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_run_loop_delivers_on_flush_and_stops_on_shutdown() {
		let transport = ScriptedTransport::failing_with(vec![]);
		let h = harness(
			transport.clone(),
			DispatcherConfig {
				flush_interval: Duration::from_secs(3600),
				..Default::default()
			},
		);
		let shared = h.shared.clone();
		let (tx, rx) = watch::channel(false);
		let worker = tokio::spawn(h.dispatcher.run(rx));

		// Let the immediate first tick pass with an empty store.
		tokio::time::sleep(Duration::from_millis(10)).await;

		enqueue(&shared, &["A", "B"], 1);
		shared.dispatch.notify_one();
		tokio::time::sleep(Duration::from_millis(10)).await;
		assert_eq!(shared.stats.snapshot().delivered, 2);

		enqueue(&shared, &["C"], 3);
		tx.send(true).unwrap();
		worker.await.unwrap();

		assert_eq!(shared.stats.snapshot().delivered, 3);
		assert_eq!(transport.sent().len(), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn test_persist_wake_does_not_dispatch_below_watermark() {
		let transport = ScriptedTransport::failing_with(vec![]);
		let h = harness(
			transport.clone(),
			DispatcherConfig {
				flush_interval: Duration::from_secs(3600),
				store_high_watermark: 3,
				..Default::default()
			},
		);
		let shared = h.shared.clone();
		let (tx, rx) = watch::channel(false);
		let worker = tokio::spawn(h.dispatcher.run(rx));
		tokio::time::sleep(Duration::from_millis(10)).await;

		enqueue(&shared, &["A", "B"], 1);
		shared.persist.notify_one();
		tokio::time::sleep(Duration::from_millis(10)).await;
		let snap = shared.stats.snapshot();
		assert_eq!(snap.persisted, 2);
		assert_eq!(snap.delivered, 0);

		enqueue(&shared, &["C"], 3);
		shared.persist.notify_one();
		tokio::time::sleep(Duration::from_millis(10)).await;
		assert_eq!(shared.stats.snapshot().delivered, 3);

		drop(tx);
		worker.await.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn test_expiry_spares_batch_awaiting_retry() {
		let transport = ScriptedTransport::failing_with(vec![unavailable()]);
		let mut h = harness_with_retention(
			transport.clone(),
			DispatcherConfig {
				backoff: policy(8),
				..Default::default()
			},
			Duration::ZERO,
		);
		enqueue(&h.shared, &["A"], 1);
		h.dispatcher.persist_queued();
		let DispatchOutcome::RetryScheduled { delay, .. } = h.dispatcher.dispatch_once().await else {
			panic!("expected a scheduled retry");
		};

		enqueue(&h.shared, &["B"], 2);
		h.dispatcher.persist_queued();
		std::thread::sleep(Duration::from_millis(5));
		h.dispatcher.purge_expired();
		assert_eq!(h.shared.stats.snapshot().dropped_expired, 1);

		tokio::time::advance(delay).await;
		assert!(matches!(
			h.dispatcher.dispatch_once().await,
			DispatchOutcome::Delivered { count: 1, .. }
		));
		assert_eq!(transport.sent()[1].sequences, vec![SequenceNumber(1)]);

		let snap = h.shared.stats.snapshot();
		assert_eq!(snap.delivered, 1);
		assert_eq!(snap.total_dropped(), 1);
		assert_eq!(h.dispatcher.store.pending_count(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_abandon_counts_only_records_still_stored() {
		let transport =
			ScriptedTransport::failing_with((0..2).map(|_| unavailable()).collect());
		let mut h = harness(
			transport.clone(),
			DispatcherConfig {
				backoff: policy(2),
				..Default::default()
			},
		);
		enqueue(&h.shared, &["A", "B"], 1);
		h.dispatcher.persist_queued();
		let DispatchOutcome::RetryScheduled { batch_id, delay, .. } =
			h.dispatcher.dispatch_once().await
		else {
			panic!("expected a scheduled retry");
		};

		// The records leave the store before the retry settles.
		assert_eq!(
			h.dispatcher.store.drop_batch(batch_id, DropReason::Expired).unwrap(),
			2
		);

		tokio::time::advance(delay).await;
		let outcome = h.dispatcher.dispatch_once().await;
		assert_eq!(
			outcome,
			DispatchOutcome::Abandoned {
				batch_id,
				count: 0,
				reason: DropReason::RetriesExhausted,
			}
		);
		assert_eq!(h.shared.stats.snapshot().dropped_exhausted, 0);
	}

	/// Takes `delay` per send and counts completed sends.
	struct SlowTransport {
		delay: Duration,
		completed: AtomicUsize,
	}

	#[async_trait]
	impl BatchTransport for SlowTransport {
		async fn send(&self, _batch: &Batch) -> Result<()> {
			tokio::time::sleep(self.delay).await;
			self.completed.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}
	}

	#[tokio::test(start_paused = true)]
	async fn test_shutdown_interrupts_backlog_drain() {
		let transport = Arc::new(SlowTransport {
			delay: Duration::from_secs(60),
			completed: AtomicUsize::new(0),
		});
		let shutdown_timeout = Duration::from_secs(2);
		let h = harness(
			transport.clone(),
			DispatcherConfig {
				max_batch_size: 1,
				flush_interval: Duration::from_secs(3600),
				shutdown_timeout,
				..Default::default()
			},
		);
		let shared = h.shared.clone();
		let names: Vec<String> = (0..50).map(|i| format!("e{i}")).collect();
		let names: Vec<&str> = names.iter().map(String::as_str).collect();
		enqueue(&shared, &names, 1);

		let (tx, rx) = watch::channel(false);
		let worker = tokio::spawn(h.dispatcher.run(rx));
		shared.dispatch.notify_one();
		tokio::time::sleep(Duration::from_millis(10)).await;

		let started = Instant::now();
		tx.send(true).unwrap();
		tokio::time::timeout(Duration::from_secs(30), worker)
			.await
			.expect("worker did not stop within the bound")
			.unwrap();

		assert!(started.elapsed() <= shutdown_timeout + Duration::from_millis(10));
		assert_eq!(transport.completed.load(Ordering::SeqCst), 0);
		assert_eq!(shared.stats.snapshot().delivered, 0);
		assert_eq!(shared.stats.snapshot().pending, 50);
	}
}
