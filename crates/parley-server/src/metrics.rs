//! Metrics collection and export for Parley.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use async_trait::async_trait;
use bytes::Bytes;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use parley_transport::{FrameReader, FrameWriter, TransportError};
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "parley_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "parley_connections_active";
    pub const FRAMES_TOTAL: &str = "parley_frames_total";
    pub const FRAME_BYTES: &str = "parley_frame_bytes";
    pub const ERRORS_TOTAL: &str = "parley_errors_total";
}

/// Describe every metric to the installed recorder.
///
/// Descriptions sent before a recorder is installed are lost.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::FRAMES_TOTAL, "Total number of frames read or written");
    metrics::describe_counter!(names::FRAME_BYTES, "Total bytes of frames read or written");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");
    parley_core::metrics::describe();

    info!("Metrics initialized");
}

/// Install the Prometheus recorder with its HTTP listener, then describe the
/// metrics.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    init_metrics();

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a frame.
pub fn record_frame(bytes: usize, direction: &'static str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction).increment(1);
    counter!(names::FRAME_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

/// Transport half that counts the frames passing through it.
pub struct Metered<T> {
    inner: T,
}

impl<T> Metered<T> {
    #[must_use]
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: FrameReader> FrameReader for Metered<T> {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.inner.recv().await {
            Ok(frame) => {
                if let Some(data) = &frame {
                    record_frame(data.len(), "inbound");
                }
                Ok(frame)
            }
            Err(e) => {
                record_error("transport_read");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<T: FrameWriter> FrameWriter for Metered<T> {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        let len = frame.len();
        self.inner.send(frame).await?;
        record_frame(len, "outbound");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.close().await
    }
}
