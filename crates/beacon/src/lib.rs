// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Beacon event instrumentation SDK for Rust.
//!
//! This crate records named events with attributes and optional durations,
//! keeps them in a crash-safe local log, and delivers them to the Beacon
//! backend in acknowledged batches from a background tokio task.
//!
//! # Features
//!
//! - **Non-blocking recording**: `record` never waits on disk or network I/O
//! - **Durable delivery**: events survive restarts until acknowledged or expired
//! - **Exactly-once batches**: retries reuse the batch id as an idempotency key
//! - **Scrubbing**: [`hash`] turns sensitive values into stable opaque tokens
//! - **Layered configuration**: defaults, TOML, `BEACON_*` env vars, builder
//!
//! # Example
//!
//! ```ignore
//! use beacon::{Attributes, BeaconClient, LogLevel};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = BeaconClient::builder()
//!         .app_key("a1b2c3d4e5f6")
//!         .base_url("https://events.example.com")
//!         .log_level(LogLevel::Warnings)
//!         .build()?;
//!
//!     client.record(
//!         "Screen Viewed",
//!         Attributes::new().insert("screen", "checkout"),
//!         None,
//!     );
//!
//!     let timer = client.start_timer();
//!     // ... upload ...
//!     client.record_timed(
//!         "File Uploaded",
//!         Attributes::new().insert_hashed("email", "jane@example.com"),
//!         timer,
//!     );
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

mod attributes;
mod client;
pub mod config;
mod dispatcher;
mod error;
mod queue;
mod stats;
pub mod store;
mod transport;

pub use attributes::Attributes;
pub use client::{BeaconClient, BeaconClientBuilder};
pub use config::{BeaconConfig, BeaconConfigLayer, ConfigError};
pub use dispatcher::DispatchOutcome;
pub use error::{BeaconError, Result};
pub use stats::StatsSnapshot;
pub use transport::{BatchTransport, HttpTransport, SDK_NAME, SDK_VERSION};

// Re-export core types for convenience
pub use beacon_common_http::BackoffPolicy;
pub use beacon_core::{
	hash, is_hashed, AppKey, AttributeValue, Batch, BatchId, DropReason, Event, LogLevel,
	SequenceNumber, TimerHandle,
};
