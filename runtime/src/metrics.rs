//! Prometheus metrics for the dispatcher and the RPC client.
//!
//! - Messages processed, by routing key, outcome and acknowledgement
//! - Reply publish failures
//! - Per-message processing latency
//! - RPC requests and timeouts
//! - Repository query latency and failures (recorded by `reviews-postgres`)
//!
//! # Example
//!
//! ```rust,no_run
//! use reviews_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and spawn the HTTP listener.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] if the exporter cannot be configured.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., by another test), this logs a
    /// warning, starts nothing and returns `Ok`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        if let Err(e) = metrics::set_global_recorder(recorder) {
            tracing::warn!(error = %e, "Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }

        tokio::spawn(async move {
            if exporter.await.is_err() {
                // `ExporterError` implements neither `Debug` nor `Display`.
                tracing::error!("Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "dispatcher_messages_total",
        "Total number of messages settled by the dispatcher"
    );
    describe_counter!(
        "dispatcher_replies_failed_total",
        "Total number of replies that could not be published"
    );
    describe_histogram!(
        "dispatcher_message_duration_seconds",
        "Time from receipt to acknowledgement of a message"
    );

    describe_counter!("rpc_requests_total", "Total number of RPC requests sent");
    describe_counter!(
        "rpc_timeouts_total",
        "Total number of RPC requests that received no reply in time"
    );

    describe_histogram!(
        "repository_query_duration_seconds",
        "Time spent in repository queries"
    );
    describe_counter!(
        "repository_errors_total",
        "Total number of failed repository queries"
    );
}

/// Dispatcher metrics recorder.
pub struct DispatcherMetrics;

impl DispatcherMetrics {
    /// Record one settled message.
    pub fn record_message(routing_key: &str, outcome: &str, decision: &str, duration: Duration) {
        counter!(
            "dispatcher_messages_total",
            "routing_key" => routing_key.to_string(),
            "outcome" => outcome.to_string(),
            "decision" => decision.to_string()
        )
        .increment(1);
        histogram!("dispatcher_message_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a reply that could not be published.
    pub fn record_reply_failure() {
        counter!("dispatcher_replies_failed_total").increment(1);
    }
}

/// RPC client metrics recorder.
pub struct RpcMetrics;

impl RpcMetrics {
    /// Record a request sent.
    pub fn record_request(routing_key: &str) {
        counter!("rpc_requests_total", "routing_key" => routing_key.to_string()).increment(1);
    }

    /// Record a request that timed out.
    pub fn record_timeout(routing_key: &str) {
        counter!("rpc_timeouts_total", "routing_key" => routing_key.to_string()).increment(1);
    }
}
