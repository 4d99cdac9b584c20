// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Records a handful of events and shuts down.
//!
//! ```sh
//! BEACON_APP_KEY=a1b2c3d4e5f6 BEACON_BASE_URL=http://localhost:8080 \
//!     RUST_LOG=beacon=debug cargo run -p beacon --example record
//! ```

use std::time::Duration;

use beacon::{Attributes, BeaconClient, LogLevel};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	tracing_subscriber::registry()
		.with(fmt::layer())
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("beacon=info")))
		.init();

	let client = BeaconClient::builder().log_level(LogLevel::All).build()?;

	client.record(
		"Screen Viewed",
		Attributes::new().insert("screen", "home"),
		None,
	);

	let timer = client.start_timer();
	tokio::time::sleep(Duration::from_millis(250)).await;
	client.record_timed(
		"File Uploaded",
		Attributes::new()
			.insert("bytes", 48_213)
			.insert_hashed("email", "jane@example.com"),
		timer,
	);

	client.flush();
	client.shutdown().await;

	let stats = client.stats();
	println!(
		"recorded={} delivered={} pending={} dropped={}",
		stats.recorded,
		stats.delivered,
		stats.pending,
		stats.total_dropped()
	);
	Ok(())
}
