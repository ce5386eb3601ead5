//! Transport abstraction traits for parley.
//!
//! These traits define the interface a transport must provide so the
//! connection pumps stay transport-agnostic.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// The receiving half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Receive the next raw frame.
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly. Control
    /// messages (ping/pong) are handled internally and never surface here.
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// The sending half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Send one encoded frame.
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;
}
