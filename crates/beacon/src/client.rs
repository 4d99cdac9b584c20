// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Host-facing client.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use beacon_common_http::BackoffPolicy;
use beacon_core::{
	diag_debug, diag_error, diag_warn, validate_duration, validate_event_name, AppKey,
	AttributeValue, Event, LogLevel, LogThrottle, SequenceGenerator, TimerHandle,
	TimerReferenceClock, Timestamp, MAX_ATTRIBUTES,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::attributes::Attributes;
use crate::config::{
	BeaconConfig, BeaconConfigLayer, ConfigRegistry, DefaultsSource, EnvSource, OverridesSource,
	TomlSource,
};
use crate::dispatcher::{BatchDispatcher, DispatcherConfig, Shared};
use crate::error::{BeaconError, Result};
use crate::queue::EventQueue;
use crate::stats::StatsSnapshot;
use crate::store::DurableStore;
use crate::transport::{BatchTransport, HttpTransport};

/// Builder for constructing a [`BeaconClient`].
///
/// Values set here override the config file and environment.
pub struct BeaconClientBuilder {
	overrides: BeaconConfigLayer,
	invalid_app_key: bool,
	config_file: Option<PathBuf>,
	load_ambient: bool,
	transport: Option<Arc<dyn BatchTransport>>,
}

impl BeaconClientBuilder {
	/// Creates a new builder with default settings.
	pub fn new() -> Self {
		Self {
			overrides: BeaconConfigLayer::default(),
			invalid_app_key: false,
			config_file: None,
			load_ambient: true,
			transport: None,
		}
	}

	/// Sets the application key identifying the host app.
	pub fn app_key(mut self, key: impl Into<String>) -> Self {
		match AppKey::parse(key) {
			Ok(key) => {
				self.overrides.app_key = Some(key);
				self.invalid_app_key = false;
			}
			Err(_) => self.invalid_app_key = true,
		}
		self
	}

	/// Sets the backend base URL.
	///
	/// Example: `https://events.example.com`
	pub fn base_url(mut self, url: impl Into<String>) -> Self {
		self.overrides.base_url = Some(url.into());
		self
	}

	pub fn log_level(mut self, level: LogLevel) -> Self {
		self.overrides.log_level = Some(level);
		self
	}

	/// Sets the location of the durable event log.
	pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
		self.overrides.store_path = Some(path.into());
		self
	}

	pub fn queue_capacity(mut self, capacity: usize) -> Self {
		self.overrides.queue_capacity = Some(capacity);
		self
	}

	pub fn queue_high_watermark(mut self, watermark: usize) -> Self {
		self.overrides.queue_high_watermark = Some(watermark);
		self
	}

	pub fn max_batch_size(mut self, size: usize) -> Self {
		self.overrides.max_batch_size = Some(size);
		self
	}

	/// Sets the periodic flush interval (whole seconds, at least one).
	pub fn flush_interval(mut self, interval: Duration) -> Self {
		self.overrides.flush_interval_secs = Some(interval.as_secs().max(1));
		self
	}

	pub fn store_high_watermark(mut self, watermark: usize) -> Self {
		self.overrides.store_high_watermark = Some(watermark);
		self
	}

	/// Sets how long undelivered events are kept (whole seconds).
	pub fn retention(mut self, retention: Duration) -> Self {
		self.overrides.retention_secs = Some(retention.as_secs());
		self
	}

	/// Sets the retry policy for failed batches.
	pub fn backoff(mut self, policy: BackoffPolicy) -> Self {
		self.overrides.max_attempts = Some(policy.max_attempts);
		self.overrides.base_delay_ms = Some(policy.base_delay.as_millis() as u64);
		self.overrides.max_delay_secs = Some(policy.max_delay.as_secs().max(1));
		self.overrides.backoff_factor = Some(policy.backoff_factor);
		self.overrides.jitter = Some(policy.jitter);
		self
	}

	/// Sets the HTTP request timeout (whole seconds, at least one).
	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.overrides.request_timeout_secs = Some(timeout.as_secs().max(1));
		self
	}

	/// Bounds the best-effort flush performed by [`BeaconClient::shutdown`].
	pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
		self.overrides.shutdown_timeout_secs = Some(timeout.as_secs());
		self
	}

	/// Reads this TOML file instead of the per-user config file.
	pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
		self.config_file = Some(path.into());
		self
	}

	/// Ignores the per-user config file and `BEACON_*` environment variables.
	pub fn isolated(mut self) -> Self {
		self.load_ambient = false;
		self
	}

	/// Delivers batches through `transport` instead of HTTP.
	pub fn transport(mut self, transport: Arc<dyn BatchTransport>) -> Self {
		self.transport = Some(transport);
		self
	}

	/// Resolves configuration, opens the event store and starts the
	/// background worker on the current tokio runtime.
	pub fn build(self) -> Result<BeaconClient> {
		if self.invalid_app_key {
			return Err(BeaconError::InvalidAppKey);
		}

		let mut registry = ConfigRegistry::new();
		registry.register(Box::new(DefaultsSource));
		match self.config_file {
			Some(path) => registry.register(Box::new(TomlSource::new(path))),
			None if self.load_ambient => {
				if let Some(source) = TomlSource::user() {
					registry.register(Box::new(source));
				}
			}
			None => {}
		}
		if self.load_ambient {
			registry.register(Box::new(EnvSource::new()));
		}
		registry.register(Box::new(OverridesSource::new(self.overrides)));
		let config = registry.load()?;

		let app_key = config.app_key.clone().ok_or(BeaconError::InvalidAppKey)?;
		let throttle = Arc::new(LogThrottle::new(config.log_level));
		let transport: Arc<dyn BatchTransport> = match self.transport {
			Some(transport) => transport,
			None => {
				let base_url = validate_base_url(config.base_url.as_deref())?;
				Arc::new(
					HttpTransport::new(base_url, app_key, config.request_timeout)?
						.with_throttle(throttle.clone()),
				)
			}
		};

		BeaconClient::start(config, transport, throttle)
	}
}

impl Default for BeaconClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

fn validate_base_url(base_url: Option<&str>) -> Result<&str> {
	let raw = base_url.ok_or_else(|| BeaconError::InvalidBaseUrl("base URL is not set".into()))?;
	let url = reqwest::Url::parse(raw).map_err(|e| BeaconError::InvalidBaseUrl(e.to_string()))?;
	if !matches!(url.scheme(), "http" | "https") {
		return Err(BeaconError::InvalidBaseUrl(format!(
			"unsupported scheme '{}'",
			url.scheme()
		)));
	}
	Ok(raw)
}

struct ClientInner {
	shared: Arc<Shared>,
	clock: TimerReferenceClock,
	sequences: SequenceGenerator,
	closed: AtomicBool,
	shutdown_tx: watch::Sender<bool>,
	worker: Mutex<Option<JoinHandle<()>>>,
	join_timeout: Duration,
}

/// Records events and delivers them in the background.
///
/// Every method except [`shutdown`](Self::shutdown) is synchronous, cheap and
/// callable from any thread. None of them report failures: invalid calls are
/// counted in [`stats`](Self::stats) and logged subject to the log level.
#[derive(Clone)]
pub struct BeaconClient {
	inner: Arc<ClientInner>,
}

impl BeaconClient {
	/// Creates a new builder for constructing a BeaconClient.
	pub fn builder() -> BeaconClientBuilder {
		BeaconClientBuilder::new()
	}

	/// Starts a client with `app_key` and `log_level`; everything else comes
	/// from the config file, the environment and defaults.
	pub fn configure(app_key: &str, log_level: LogLevel) -> Result<Self> {
		Self::builder().app_key(app_key).log_level(log_level).build()
	}

	fn start(
		config: BeaconConfig,
		transport: Arc<dyn BatchTransport>,
		throttle: Arc<LogThrottle>,
	) -> Result<Self> {
		let runtime = tokio::runtime::Handle::try_current().map_err(|_| BeaconError::NoRuntime)?;

		let store = DurableStore::open(config.store_config(), throttle.clone())?;

		let sequences = SequenceGenerator::new();
		if let Some(max) = store.max_sequence() {
			sequences.advance_past(max);
		}

		let shared = Arc::new(Shared::new(
			EventQueue::new(config.queue_capacity, config.queue_high_watermark),
			throttle.clone(),
		));
		shared.stats.set_pending(store.pending_count() as u64);

		let dispatcher = BatchDispatcher::new(
			store,
			transport,
			shared.clone(),
			DispatcherConfig {
				max_batch_size: config.max_batch_size,
				flush_interval: config.flush_interval,
				store_high_watermark: config.store_high_watermark,
				backoff: config.backoff.clone(),
				shutdown_timeout: config.shutdown_timeout,
			},
		);
		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		let worker = runtime.spawn(dispatcher.run(shutdown_rx));

		diag_debug!(
			throttle,
			store = %config.store_path.display(),
			log_level = %config.log_level,
			"Beacon client started"
		);

		Ok(Self {
			inner: Arc::new(ClientInner {
				shared,
				clock: TimerReferenceClock::with_throttle(throttle),
				sequences,
				closed: AtomicBool::new(false),
				shutdown_tx,
				worker: Mutex::new(Some(worker)),
				// The worker abandons any in-progress send on shutdown; the
				// final flush is bounded by shutdown_timeout and each request
				// by request_timeout.
				join_timeout: config.shutdown_timeout + config.request_timeout,
			}),
		})
	}

	/// Records an event with an optional duration in seconds.
	pub fn record(&self, name: &str, attributes: Attributes, duration_seconds: Option<f64>) {
		if let Some(seconds) = duration_seconds {
			if !validate_duration(seconds) {
				self.reject(name, "duration must be finite and non-negative");
				return;
			}
		}
		self.enqueue(name, attributes, duration_seconds);
	}

	/// Records an event whose duration runs from `timer` until now.
	pub fn record_timed(&self, name: &str, attributes: Attributes, timer: TimerHandle) {
		let seconds = self.inner.clock.finish(timer);
		self.enqueue(name, attributes, Some(seconds));
	}

	/// Records an event whose duration runs from a raw
	/// [`timer_reference`](Self::timer_reference) until now.
	pub fn record_with_timer_reference(&self, name: &str, attributes: Attributes, reference: f64) {
		let Some(start) = Timestamp::from_secs_f64(reference) else {
			self.reject(name, "timer reference must be finite and non-negative");
			return;
		};
		if start > self.inner.clock.now() {
			self.reject(name, "timer reference is in the future");
			return;
		}
		let seconds = self.inner.clock.elapsed(start);
		self.enqueue(name, attributes, Some(seconds));
	}

	pub fn start_timer(&self) -> TimerHandle {
		self.inner.clock.start_timer()
	}

	/// The current timer reading in seconds, for hosts that keep raw
	/// references instead of [`TimerHandle`]s.
	pub fn timer_reference(&self) -> f64 {
		self.inner.clock.timer_reference()
	}

	pub fn set_log_level(&self, level: LogLevel) {
		self.inner.shared.throttle.set_level(level);
	}

	pub fn log_level(&self) -> LogLevel {
		self.inner.shared.throttle.level()
	}

	/// One-way hash for scrubbing sensitive values; see [`beacon_core::hash`].
	pub fn hash(&self, value: &str) -> String {
		beacon_core::hash(value)
	}

	/// Asks the worker to persist and deliver what it has now, e.g. when the
	/// host is moving to the background. Returns immediately.
	pub fn flush(&self) {
		if self.is_closed() {
			diag_warn!(self.inner.shared.throttle, "Ignoring flush after shutdown");
			return;
		}
		self.inner.shared.dispatch.notify_one();
	}

	pub fn stats(&self) -> StatsSnapshot {
		self.inner.shared.stats.snapshot()
	}

	/// Returns true if the client has been shut down.
	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst)
	}

	/// Stops accepting events, persists everything queued and makes one
	/// bounded attempt to deliver it. Undelivered events stay on disk for the
	/// next launch. Calling it again is a no-op.
	pub async fn shutdown(&self) {
		if self.inner.closed.swap(true, Ordering::SeqCst) {
			return;
		}

		let _ = self.inner.shutdown_tx.send(true);
		let worker = self
			.inner
			.worker
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.take();
		if let Some(mut worker) = worker {
			match tokio::time::timeout(self.inner.join_timeout, &mut worker).await {
				Ok(Ok(())) => {}
				Ok(Err(e)) => {
					diag_error!(self.inner.shared.throttle, error = %e, "Beacon worker ended abnormally");
				}
				Err(_) => {
					worker.abort();
					diag_warn!(
						self.inner.shared.throttle,
						timeout_secs = self.inner.join_timeout.as_secs(),
						"Beacon worker did not stop in time, abandoning it"
					);
				}
			}
		}
		diag_debug!(self.inner.shared.throttle, "Beacon client shut down");
	}

	fn enqueue(&self, name: &str, attributes: Attributes, duration_seconds: Option<f64>) {
		if self.is_closed() {
			self.reject(name, "client is shut down");
			return;
		}
		if !validate_event_name(name) {
			self.reject(name, "event name must be 1-200 characters without control characters");
			return;
		}
		if attributes.len() > MAX_ATTRIBUTES {
			self.reject(name, "too many attributes");
			return;
		}
		if !attributes.values().all(AttributeValue::is_encodable) {
			self.reject(name, "attribute values must be finite numbers");
			return;
		}

		let mut event = Event::new(name, self.inner.sequences.next()).with_attributes(attributes.into_map());
		if let Some(seconds) = duration_seconds {
			event = event.with_duration(seconds);
		}

		let shared = &self.inner.shared;
		let outcome = shared.queue.enqueue(event);
		shared.stats.record_accepted();
		if outcome.evicted {
			shared.stats.queue_overflowed(1);
			diag_warn!(shared.throttle, capacity = shared.queue.capacity(), "Event queue full, dropped oldest event");
		}
		if outcome.high_watermark {
			shared.dispatch.notify_one();
		} else {
			shared.persist.notify_one();
		}
	}

	fn reject(&self, name: &str, reason: &'static str) {
		let shared = &self.inner.shared;
		shared.stats.record_rejected();
		diag_warn!(shared.throttle, event_name = %name, reason, "Ignoring invalid record call");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::Result as BeaconResult;
	use async_trait::async_trait;
	use beacon_core::{Batch, SequenceNumber};
	use std::sync::atomic::AtomicUsize;
	use tempfile::TempDir;

	#[derive(Default)]
	struct CountingTransport {
		events: AtomicUsize,
	}

	#[async_trait]
	impl BatchTransport for CountingTransport {
		async fn send(&self, batch: &Batch) -> BeaconResult<()> {
			self.events.fetch_add(batch.len(), Ordering::SeqCst);
			Ok(())
		}
	}

	fn builder(dir: &TempDir) -> BeaconClientBuilder {
		BeaconClient::builder()
			.isolated()
			.app_key("test-app-key")
			.store_path(dir.path().join("events.log"))
			.transport(Arc::new(CountingTransport::default()))
	}

	#[test]
	fn test_build_requires_runtime() {
		let dir = TempDir::new().unwrap();
		assert!(matches!(builder(&dir).build(), Err(BeaconError::NoRuntime)));
	}

	#[tokio::test]
	async fn test_build_rejects_bad_app_key() {
		let dir = TempDir::new().unwrap();
		let result = builder(&dir).app_key("not a key").build();
		assert!(matches!(result, Err(BeaconError::InvalidAppKey)));
	}

	#[tokio::test]
	async fn test_build_requires_app_key() {
		let dir = TempDir::new().unwrap();
		let result = BeaconClient::builder()
			.isolated()
			.store_path(dir.path().join("events.log"))
			.transport(Arc::new(CountingTransport::default()))
			.build();
		assert!(matches!(result, Err(BeaconError::InvalidAppKey)));
	}

	#[tokio::test]
	async fn test_build_validates_base_url() {
		let dir = TempDir::new().unwrap();
		let base = || {
			BeaconClient::builder()
				.isolated()
				.app_key("test-app-key")
				.store_path(dir.path().join("events.log"))
		};

		assert!(matches!(base().build(), Err(BeaconError::InvalidBaseUrl(_))));
		assert!(matches!(
			base().base_url("ftp://events.example.com").build(),
			Err(BeaconError::InvalidBaseUrl(_))
		));
		assert!(matches!(
			base().base_url("not a url").build(),
			Err(BeaconError::InvalidBaseUrl(_))
		));
	}

	#[tokio::test]
	async fn test_build_surfaces_config_errors() {
		let dir = TempDir::new().unwrap();
		let result = builder(&dir).max_batch_size(0).build();
		assert!(matches!(result, Err(BeaconError::Config(_))));
	}

	#[tokio::test]
	async fn test_invalid_calls_are_counted_not_raised() {
		let dir = TempDir::new().unwrap();
		let client = builder(&dir).build().unwrap();

		client.record("", Attributes::new(), None);
		client.record("bad\nname", Attributes::new(), None);
		client.record("Negative", Attributes::new(), Some(-1.0));
		client.record("NaN", Attributes::new(), Some(f64::NAN));
		client.record_with_timer_reference("Future", Attributes::new(), client.timer_reference() + 60.0);
		client.record_with_timer_reference("Garbage", Attributes::new(), f64::INFINITY);
		client.record("Valid", Attributes::new(), Some(1.0));

		let stats = client.stats();
		assert_eq!(stats.rejected_calls, 6);
		assert_eq!(stats.recorded, 1);
		client.shutdown().await;
	}

	#[tokio::test]
	async fn test_non_finite_attribute_is_rejected() {
		let dir = TempDir::new().unwrap();
		let transport = Arc::new(CountingTransport::default());
		let client = builder(&dir).transport(transport.clone()).build().unwrap();

		client.record("Ratio", Attributes::new().insert("ratio", f64::NAN), None);
		client.record("Limit", Attributes::new().insert("limit", f64::INFINITY), None);
		client.record("Kept", Attributes::new().insert("ratio", 0.5), None);
		client.flush();
		client.shutdown().await;

		let stats = client.stats();
		assert_eq!(stats.rejected_calls, 2);
		assert_eq!(stats.recorded, 1);
		assert_eq!(transport.events.load(Ordering::SeqCst), 1);

		let client = builder(&dir).build().unwrap();
		assert_eq!(client.stats().pending, 0);
		client.shutdown().await;
	}

	#[tokio::test]
	async fn test_record_after_shutdown_is_rejected() {
		let dir = TempDir::new().unwrap();
		let client = builder(&dir).build().unwrap();
		client.shutdown().await;
		client.shutdown().await;
		assert!(client.is_closed());

		client.record("Late", Attributes::new(), None);
		client.flush();
		assert_eq!(client.stats().rejected_calls, 1);
		assert_eq!(client.stats().recorded, 0);
	}

	#[tokio::test]
	async fn test_log_level_changes_take_effect() {
		let dir = TempDir::new().unwrap();
		let client = builder(&dir).log_level(LogLevel::Warnings).build().unwrap();
		assert_eq!(client.log_level(), LogLevel::Warnings);
		client.set_log_level(LogLevel::All);
		assert_eq!(client.log_level(), LogLevel::All);
		client.shutdown().await;
	}

	#[tokio::test]
	async fn test_timers_produce_non_negative_durations() {
		let dir = TempDir::new().unwrap();
		let client = builder(&dir).build().unwrap();

		let timer = client.start_timer();
		client.record_timed("Timed", Attributes::new(), timer);
		let reference = client.timer_reference();
		client.record_with_timer_reference("Referenced", Attributes::new(), reference);

		assert_eq!(client.stats().recorded, 2);
		assert_eq!(client.stats().rejected_calls, 0);
		client.shutdown().await;
	}

	#[tokio::test]
	async fn test_hash_matches_core() {
		let dir = TempDir::new().unwrap();
		let client = builder(&dir).build().unwrap();
		assert_eq!(client.hash(""), beacon_core::hash(""));
		assert!(client.hash("jane@example.com").ends_with("##"));
		client.shutdown().await;
	}

	struct UnavailableTransport;

	#[async_trait]
	impl BatchTransport for UnavailableTransport {
		async fn send(&self, _batch: &Batch) -> BeaconResult<()> {
			Err(BeaconError::ServerError {
				status: 503,
				message: "maintenance".into(),
			})
		}
	}

	#[tokio::test]
	async fn test_sequence_numbers_resume_after_restart() {
		let dir = TempDir::new().unwrap();
		let client = builder(&dir)
			.transport(Arc::new(UnavailableTransport))
			.shutdown_timeout(Duration::ZERO)
			.build()
			.unwrap();
		client.record("First", Attributes::new(), None);
		client.record("Second", Attributes::new(), None);
		client.shutdown().await;

		let client = builder(&dir)
			.transport(Arc::new(UnavailableTransport))
			.build()
			.unwrap();
		assert_eq!(client.stats().pending, 2);
		assert!(client.inner.sequences.next() > SequenceNumber(2));
		client.shutdown().await;
	}

	/// Never answers.
	struct HungTransport;

	#[async_trait]
	impl BatchTransport for HungTransport {
		async fn send(&self, _batch: &Batch) -> BeaconResult<()> {
			std::future::pending().await
		}
	}

	#[tokio::test(start_paused = true)]
	async fn test_shutdown_is_bounded_when_transport_hangs() {
		let dir = TempDir::new().unwrap();
		let client = builder(&dir)
			.transport(Arc::new(HungTransport))
			.max_batch_size(1)
			.flush_interval(Duration::from_secs(3600))
			.shutdown_timeout(Duration::from_secs(1))
			.request_timeout(Duration::from_secs(5))
			.build()
			.unwrap();
		for name in ["A", "B", "C"] {
			client.record(name, Attributes::new(), None);
		}
		client.flush();
		tokio::time::sleep(Duration::from_millis(10)).await;

		let started = tokio::time::Instant::now();
		tokio::time::timeout(Duration::from_secs(60), client.shutdown())
			.await
			.expect("shutdown did not return");
		assert!(started.elapsed() <= Duration::from_secs(6));
		assert!(client.is_closed());
		assert_eq!(client.stats().delivered, 0);

		let client = builder(&dir).build().unwrap();
		assert_eq!(client.stats().pending, 3);
		client.shutdown().await;
	}
}
