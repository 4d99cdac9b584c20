// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Crash-safe, append-only event log.
//!
//! Every state change is written as a checksummed frame and `fsync`ed before
//! the in-memory view is updated, so the view always matches what a reopen
//! would replay. A crash mid-write leaves at most one torn frame at the tail,
//! which is truncated on the next open.
//!
//! The store is owned by a single task; none of its methods take `&self`
//! concurrently with a mutation.

mod frame;

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use beacon_core::{
	diag_debug, diag_error, diag_warn, Batch, BatchId, DeliveryStatus, DropReason, Event,
	LogThrottle, PersistedRecord, SequenceNumber,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BeaconError, Result};

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_COMPACTION_THRESHOLD: usize = 1000;

#[derive(Debug, Clone)]
pub struct StoreConfig {
	pub path: PathBuf,
	/// Records older than this are purged even if undelivered.
	pub retention: Duration,
	/// Superseded frames tolerated before the log is rewritten.
	pub compaction_threshold: usize,
}

impl StoreConfig {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			retention: DEFAULT_RETENTION,
			compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogEntry {
	Append {
		record: PersistedRecord,
	},
	InFlight {
		batch_id: BatchId,
		attempt: u32,
		sequences: Vec<SequenceNumber>,
	},
	Delivered {
		batch_id: BatchId,
	},
	Failed {
		batch_id: BatchId,
	},
	Dropped {
		sequences: Vec<SequenceNumber>,
		reason: DropReason,
	},
}

/// Live records rebuilt from the log.
#[derive(Debug, Default)]
struct Ledger {
	records: BTreeMap<SequenceNumber, PersistedRecord>,
	dropped: u64,
}

impl Ledger {
	/// Applies one entry and returns how many records it touched.
	fn apply(&mut self, entry: LogEntry) -> usize {
		match entry {
			LogEntry::Append { record } => {
				self.records.insert(record.sequence_number(), record);
				1
			}
			LogEntry::InFlight {
				batch_id,
				attempt,
				sequences,
			} => {
				let mut touched = 0;
				for seq in sequences {
					if let Some(record) = self.records.get_mut(&seq) {
						record.status = DeliveryStatus::InFlight;
						record.batch_id = Some(batch_id);
						record.attempt = attempt;
						touched += 1;
					}
				}
				touched
			}
			LogEntry::Delivered { batch_id } => {
				let before = self.records.len();
				self.records.retain(|_, r| r.batch_id != Some(batch_id));
				before - self.records.len()
			}
			LogEntry::Failed { batch_id } => {
				let mut touched = 0;
				for record in self.records.values_mut() {
					if record.batch_id == Some(batch_id) && record.status == DeliveryStatus::InFlight {
						record.status = DeliveryStatus::Pending;
						touched += 1;
					}
				}
				touched
			}
			LogEntry::Dropped { sequences, .. } => {
				let removed = sequences
					.iter()
					.filter(|seq| self.records.remove(*seq).is_some())
					.count();
				self.dropped += removed as u64;
				removed
			}
		}
	}

	fn sequences_of(&self, batch_id: BatchId) -> Vec<SequenceNumber> {
		self.records
			.values()
			.filter(|r| r.batch_id == Some(batch_id))
			.map(|r| r.sequence_number())
			.collect()
	}
}

pub struct DurableStore {
	config: StoreConfig,
	file: File,
	ledger: Ledger,
	/// Frames currently in the file, live or superseded.
	frames: usize,
	/// Length of the file's valid prefix.
	valid_len: u64,
	throttle: Arc<LogThrottle>,
}

impl DurableStore {
	/// Opens (or creates) the log at `config.path` and replays it.
	///
	/// A torn or corrupt tail is truncated. Records left in flight by a
	/// previous run revert to pending and keep their batch id.
	pub fn open(config: StoreConfig, throttle: Arc<LogThrottle>) -> Result<Self> {
		let path = config.path.clone();
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| BeaconError::storage(parent, e))?;
		}

		let bytes = match fs::read(&path) {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
			Err(e) => return Err(BeaconError::storage(&path, e)),
		};

		let mut ledger = Ledger::default();
		let mut frames = 0;
		let mut valid_len = 0;
		let mut reader = frame::FrameReader::new(&bytes);
		// The reader stops at the first torn or corrupt frame. A frame that
		// passes its checksum but does not decode is skipped on its own.
		while let Some(payload) = reader.next() {
			match serde_json::from_slice::<LogEntry>(payload) {
				Ok(entry) => {
					ledger.apply(entry);
				}
				Err(e) => {
					diag_error!(throttle, error = %e, offset = valid_len, "Skipping undecodable log entry");
				}
			}
			frames += 1;
			valid_len = reader.valid_len();
		}

		let file = open_append(&path)?;
		if valid_len < bytes.len() {
			let discarded = bytes.len() - valid_len;
			diag_warn!(throttle, path = %path.display(), discarded, "Truncating torn tail of event log");
			file
				.set_len(valid_len as u64)
				.and_then(|_| file.sync_all())
				.map_err(|e| BeaconError::storage(&path, e))?;
		}

		for record in ledger.records.values_mut() {
			if record.status == DeliveryStatus::InFlight {
				record.status = DeliveryStatus::Pending;
			}
		}

		diag_debug!(
			throttle,
			path = %path.display(),
			records = ledger.records.len(),
			frames,
			"Opened event log"
		);

		Ok(Self {
			config,
			file,
			ledger,
			frames,
			valid_len: valid_len as u64,
			throttle,
		})
	}

	pub fn path(&self) -> &Path {
		&self.config.path
	}

	/// Persists `events` as pending records.
	///
	/// On failure nothing is recorded and the file is cut back to its last
	/// valid length; the caller still owns the events.
	pub fn append(&mut self, events: &[Event]) -> Result<usize> {
		if events.is_empty() {
			return Ok(0);
		}
		let entries: Vec<LogEntry> = events
			.iter()
			.cloned()
			.map(|event| LogEntry::Append {
				record: PersistedRecord::pending(event),
			})
			.collect();
		self.commit(entries)
	}

	/// Up to `max_count` pending records, oldest first.
	pub fn load_pending(&self, max_count: usize) -> Vec<PersistedRecord> {
		self
			.ledger
			.records
			.values()
			.filter(|r| r.status == DeliveryStatus::Pending)
			.take(max_count)
			.cloned()
			.collect()
	}

	/// Records assigned to `batch_id`, oldest first.
	pub fn batch_records(&self, batch_id: BatchId) -> Vec<PersistedRecord> {
		self
			.ledger
			.records
			.values()
			.filter(|r| r.batch_id == Some(batch_id))
			.cloned()
			.collect()
	}

	pub fn mark_in_flight(&mut self, batch: &Batch) -> Result<()> {
		self.commit(vec![LogEntry::InFlight {
			batch_id: batch.batch_id(),
			attempt: batch.attempt(),
			sequences: batch.sequences(),
		}])?;
		Ok(())
	}

	/// Removes the records of an acknowledged batch.
	pub fn mark_delivered(&mut self, batch_id: BatchId) -> Result<usize> {
		let removed = self.commit(vec![LogEntry::Delivered { batch_id }])?;
		self.compact_if_needed();
		Ok(removed)
	}

	/// Reverts an unacknowledged batch to pending, keeping its identity.
	pub fn mark_failed(&mut self, batch_id: BatchId) -> Result<()> {
		self.commit(vec![LogEntry::Failed { batch_id }])?;
		Ok(())
	}

	/// Abandons a batch, removing its records and counting them as dropped.
	pub fn drop_batch(&mut self, batch_id: BatchId, reason: DropReason) -> Result<usize> {
		let sequences = self.ledger.sequences_of(batch_id);
		if sequences.is_empty() {
			return Ok(0);
		}
		let removed = self.commit(vec![LogEntry::Dropped { sequences, reason }])?;
		self.compact_if_needed();
		Ok(removed)
	}

	/// Drops records stored longer ago than the retention window. Records
	/// already assigned to a batch are left for that batch's outcome to
	/// settle, so a batch is never split by expiry.
	pub fn purge_expired(&mut self, now: DateTime<Utc>) -> Result<usize> {
		let max_age = chrono::Duration::from_std(self.config.retention)
			.unwrap_or_else(|_| chrono::Duration::days(365 * 100));
		let sequences: Vec<SequenceNumber> = self
			.ledger
			.records
			.values()
			.filter(|r| r.batch_id.is_none() && r.is_expired(now, max_age))
			.map(|r| r.sequence_number())
			.collect();
		if sequences.is_empty() {
			return Ok(0);
		}

		let removed = self.commit(vec![LogEntry::Dropped {
			sequences,
			reason: DropReason::Expired,
		}])?;
		diag_warn!(self.throttle, count = removed, "Purged expired events");
		self.compact_if_needed();
		Ok(removed)
	}

	/// Records not yet delivered, in any status.
	pub fn pending_count(&self) -> usize {
		self.ledger.records.len()
	}

	/// Records dropped since this store was opened, plus any drop entries
	/// replayed from the log. Compaction rewrites the log without drop
	/// entries, so the count restarts after a compacted log is reopened.
	pub fn dropped_count(&self) -> u64 {
		self.ledger.dropped
	}

	pub fn max_sequence(&self) -> Option<SequenceNumber> {
		self.ledger.records.keys().next_back().copied()
	}

	fn commit(&mut self, entries: Vec<LogEntry>) -> Result<usize> {
		let mut buf = Vec::new();
		for entry in &entries {
			frame::encode(&serde_json::to_vec(entry)?, &mut buf);
		}

		if let Err(e) = self
			.file
			.write_all(&buf)
			.and_then(|_| self.file.sync_data())
		{
			if let Err(truncate_err) = self.file.set_len(self.valid_len) {
				diag_error!(self.throttle, error = %truncate_err, "Failed to roll back partial log write");
			}
			return Err(BeaconError::storage(&self.config.path, e));
		}

		self.valid_len += buf.len() as u64;
		self.frames += entries.len();
		Ok(entries.into_iter().map(|e| self.ledger.apply(e)).sum())
	}

	fn compact_if_needed(&mut self) {
		let superseded = self.frames.saturating_sub(self.ledger.records.len());
		if superseded <= self.config.compaction_threshold {
			return;
		}
		if let Err(e) = self.compact() {
			diag_error!(self.throttle, error = %e, "Event log compaction failed");
		}
	}

	/// Rewrites the log with one frame per live record.
	pub fn compact(&mut self) -> Result<()> {
		let path = self.config.path.clone();
		let tmp_path = compaction_path(&path);

		let mut buf = Vec::new();
		for record in self.ledger.records.values() {
			let entry = LogEntry::Append {
				record: record.clone(),
			};
			frame::encode(&serde_json::to_vec(&entry)?, &mut buf);
		}

		let write_tmp = || -> io::Result<()> {
			let mut tmp = File::create(&tmp_path)?;
			tmp.write_all(&buf)?;
			tmp.sync_all()?;
			fs::rename(&tmp_path, &path)
		};
		if let Err(e) = write_tmp() {
			let _ = fs::remove_file(&tmp_path);
			return Err(BeaconError::storage(&tmp_path, e));
		}
		sync_parent_dir(&path);

		self.file = open_append(&path)?;
		let before = self.frames;
		self.frames = self.ledger.records.len();
		self.valid_len = buf.len() as u64;

		diag_debug!(
			self.throttle,
			frames_before = before,
			frames_after = self.frames,
			"Compacted event log"
		);
		Ok(())
	}
}

fn open_append(path: &Path) -> Result<File> {
	OpenOptions::new()
		.create(true)
		.append(true)
		.open(path)
		.map_err(|e| BeaconError::storage(path, e))
}

fn compaction_path(path: &Path) -> PathBuf {
	let mut name = path
		.file_name()
		.map(|n| n.to_os_string())
		.unwrap_or_default();
	name.push(".compact");
	path.with_file_name(name)
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
	if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
		if let Ok(dir) = File::open(parent) {
			let _ = dir.sync_all();
		}
	}
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}
