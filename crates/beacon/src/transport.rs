// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Submission of batches to the analytics backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::{diag_debug, diag_error, AppKey, Batch, BatchId, Event, LogThrottle};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{BeaconError, Result};

/// SDK version for identification.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
/// SDK name for identification.
pub const SDK_NAME: &str = "beacon-rust";

/// Delivers one batch and waits for the backend to acknowledge it.
///
/// `Ok(())` means the backend acknowledged exactly this batch id. Every other
/// outcome is an error whose [`is_retryable`](beacon_common_http::RetryableError::is_retryable)
/// decides between another attempt and abandonment.
#[async_trait]
pub trait BatchTransport: Send + Sync {
	async fn send(&self, batch: &Batch) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct SdkInfo {
	name: &'static str,
	version: &'static str,
}

#[derive(Debug, Serialize)]
struct SubmitBatchRequest<'a> {
	batch_id: BatchId,
	attempt: u32,
	sent_at: DateTime<Utc>,
	sdk: SdkInfo,
	events: &'a [Event],
}

#[derive(Debug, Deserialize)]
struct BatchAck {
	batch_id: String,
}

/// HTTP transport posting batches to `{base_url}/v1/batches`.
pub struct HttpTransport {
	client: Client,
	endpoint: String,
	app_key: AppKey,
	throttle: Arc<LogThrottle>,
}

impl HttpTransport {
	pub fn new(base_url: &str, app_key: AppKey, request_timeout: Duration) -> Result<Self> {
		let client = beacon_common_http::new_client_with_timeout(request_timeout)?;
		Ok(Self::with_client(client, base_url, app_key))
	}

	pub fn with_client(client: Client, base_url: &str, app_key: AppKey) -> Self {
		Self {
			client,
			endpoint: format!("{}/v1/batches", base_url.trim_end_matches('/')),
			app_key,
			throttle: Arc::new(LogThrottle::default()),
		}
	}

	/// Gates this transport's diagnostics on `throttle`, normally the
	/// owning client's.
	pub fn with_throttle(mut self, throttle: Arc<LogThrottle>) -> Self {
		self.throttle = throttle;
		self
	}

	pub fn endpoint(&self) -> &str {
		&self.endpoint
	}
}

#[async_trait]
impl BatchTransport for HttpTransport {
	async fn send(&self, batch: &Batch) -> Result<()> {
		let request = SubmitBatchRequest {
			batch_id: batch.batch_id(),
			attempt: batch.attempt(),
			sent_at: Utc::now(),
			sdk: SdkInfo {
				name: SDK_NAME,
				version: SDK_VERSION,
			},
			events: batch.events(),
		};

		diag_debug!(
			self.throttle,
			url = %self.endpoint,
			batch_id = %batch.batch_id(),
			attempt = batch.attempt(),
			count = batch.len(),
			"Submitting batch"
		);

		let response = self
			.client
			.post(&self.endpoint)
			.header("Authorization", format!("Bearer {}", self.app_key.expose()))
			.header("Idempotency-Key", batch.batch_id().to_string())
			.json(&request)
			.send()
			.await?;

		if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
			let retry_after = response
				.headers()
				.get("Retry-After")
				.and_then(|v| v.to_str().ok())
				.and_then(|s| s.trim().parse().ok());
			return Err(BeaconError::RateLimited {
				retry_after_secs: retry_after,
			});
		}

		if !response.status().is_success() {
			let status = response.status().as_u16();
			let message = response.text().await.unwrap_or_default();
			diag_error!(self.throttle, status, message = %message, "Batch submission failed");
			return Err(BeaconError::ServerError { status, message });
		}

		let ack: BatchAck = response.json().await?;
		if ack.batch_id != batch.batch_id().to_string() {
			return Err(BeaconError::AckMismatch {
				sent: batch.batch_id(),
				acknowledged: ack.batch_id,
			});
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use beacon_common_http::RetryableError;
	use beacon_core::{LogLevel, SequenceNumber};
	use serde_json::json;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use tracing::Subscriber;
	use tracing_subscriber::layer::{Context, SubscriberExt};
	use tracing_subscriber::Layer;
	use wiremock::matchers::{body_partial_json, header, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn batch() -> Batch {
		Batch::new(vec![
			Event::new("Screen Viewed", SequenceNumber(1)),
			Event::new("File Uploaded", SequenceNumber(2)).with_duration(1.5),
		])
	}

	fn transport(server: &MockServer) -> HttpTransport {
		HttpTransport::new(
			&server.uri(),
			AppKey::parse("app-key-123456").unwrap(),
			Duration::from_secs(5),
		)
		.unwrap()
	}

	#[test]
	fn test_endpoint_strips_trailing_slash() {
		let transport = HttpTransport::with_client(
			Client::new(),
			"https://events.example.com/",
			AppKey::parse("app-key-123456").unwrap(),
		);
		assert_eq!(transport.endpoint(), "https://events.example.com/v1/batches");
	}

	#[tokio::test]
	async fn test_acknowledged_batch_succeeds() {
		let server = MockServer::start().await;
		let batch = batch();
		let id = batch.batch_id().to_string();

		Mock::given(method("POST"))
			.and(path("/v1/batches"))
			.and(header("Authorization", "Bearer app-key-123456"))
			.and(header("Idempotency-Key", id.as_str()))
			.and(body_partial_json(json!({
				"batch_id": id,
				"attempt": 0,
				"sdk": { "name": SDK_NAME },
				"events": [
					{ "name": "Screen Viewed", "sequence_number": 1 },
					{ "name": "File Uploaded", "sequence_number": 2, "duration_seconds": 1.5 }
				]
			})))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "batch_id": id })))
			.expect(1)
			.mount(&server)
			.await;

		transport(&server).send(&batch).await.unwrap();
	}

	#[tokio::test]
	async fn test_ack_for_other_batch_is_rejected() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(
				ResponseTemplate::new(200)
					.set_body_json(json!({ "batch_id": BatchId::new().to_string() })),
			)
			.mount(&server)
			.await;

		let err = transport(&server).send(&batch()).await.unwrap_err();
		assert!(matches!(err, BeaconError::AckMismatch { .. }));
		assert!(!err.is_retryable());
	}

	#[tokio::test]
	async fn test_rate_limit_reads_retry_after() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "42"))
			.mount(&server)
			.await;

		let err = transport(&server).send(&batch()).await.unwrap_err();
		assert!(matches!(
			err,
			BeaconError::RateLimited {
				retry_after_secs: Some(42)
			}
		));
		assert!(err.is_retryable());
	}

	#[tokio::test]
	async fn test_server_errors_classified() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
			.up_to_n_times(1)
			.mount(&server)
			.await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(400).set_body_string("bad event"))
			.mount(&server)
			.await;

		let transport = transport(&server);
		let first = transport.send(&batch()).await.unwrap_err();
		assert!(matches!(first, BeaconError::ServerError { status: 503, .. }));
		assert!(first.is_retryable());

		let second = transport.send(&batch()).await.unwrap_err();
		assert!(matches!(second, BeaconError::ServerError { status: 400, .. }));
		assert!(!second.is_retryable());
	}

	#[tokio::test]
	async fn test_unreachable_backend_is_retryable() {
		let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
		let uri = format!("http://{}", listener.local_addr().unwrap());
		drop(listener);

		let transport = HttpTransport::new(
			&uri,
			AppKey::parse("app-key-123456").unwrap(),
			Duration::from_secs(2),
		)
		.unwrap();
		let err = transport.send(&batch()).await.unwrap_err();
		assert!(matches!(err, BeaconError::RequestFailed(_)));
		assert!(err.is_retryable());
	}

	/// Counts events emitted from this crate.
	#[derive(Clone, Default)]
	struct CountingLayer {
		events: Arc<AtomicUsize>,
	}

	impl<S: Subscriber> Layer<S> for CountingLayer {
		fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
			if event.metadata().target().starts_with("beacon::") {
				self.events.fetch_add(1, Ordering::SeqCst);
			}
		}
	}

	#[tokio::test]
	async fn test_diagnostics_follow_log_level() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
			.mount(&server)
			.await;

		let throttle = Arc::new(LogThrottle::default());
		let transport = transport(&server).with_throttle(throttle.clone());
		let layer = CountingLayer::default();
		let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(layer.clone()));

		let err = transport.send(&batch()).await.unwrap_err();
		assert!(matches!(err, BeaconError::ServerError { status: 503, .. }));
		assert_eq!(layer.events.load(Ordering::SeqCst), 0);

		throttle.set_level(LogLevel::All);
		transport.send(&batch()).await.unwrap_err();
		assert!(layer.events.load(Ordering::SeqCst) >= 2);
	}
}
