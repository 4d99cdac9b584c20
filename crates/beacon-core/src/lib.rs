// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Beacon event instrumentation SDK.
//!
//! This crate holds the pieces of the SDK that do no I/O: the event and batch
//! data model, the persisted record lifecycle, the monotonic timer clock, the
//! hashing helper used to scrub sensitive values and the diagnostic verbosity
//! gate. The `beacon` crate builds the queue, durable store and dispatcher on
//! top of them.
//!
//! # Example
//!
//! ```
//! use beacon_core::{hash, Event, SequenceGenerator, TimerReferenceClock};
//!
//! let sequences = SequenceGenerator::new();
//! let clock = TimerReferenceClock::new();
//!
//! let timer = clock.start_timer();
//! let mut attributes = beacon_core::AttributeMap::new();
//! attributes.insert("email".to_string(), hash("jane@example.com").into());
//!
//! let event = Event::new("File Uploaded", sequences.next())
//!     .with_attributes(attributes)
//!     .with_duration(clock.finish(timer));
//! assert!(event.duration_seconds.unwrap() >= 0.0);
//! ```

pub mod app_key;
pub mod batch;
pub mod clock;
pub mod error;
pub mod event;
pub mod hash;
pub mod record;
pub mod throttle;

pub use app_key::{AppKey, MAX_APP_KEY_LENGTH, REDACTED};
pub use batch::{Batch, BatchId};
pub use clock::{TimerHandle, TimerReferenceClock, Timestamp};
pub use error::{CoreError, Result};
pub use event::{
	validate_duration, validate_event_name, AttributeMap, AttributeValue, Event, SequenceGenerator,
	SequenceNumber, MAX_ATTRIBUTES, MAX_EVENT_NAME_LENGTH,
};
pub use hash::{hash, is_hashed, HASHED_LEN, HASH_MARKER};
pub use record::{DeliveryStatus, DropReason, PersistedRecord};
pub use throttle::{LogLevel, LogThrottle, Severity};

#[doc(hidden)]
pub use tracing as __tracing;
