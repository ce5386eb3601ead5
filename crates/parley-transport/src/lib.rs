//! # parley-transport
//!
//! Transport seam for the parley engine.
//!
//! A live connection is handed to the engine as two independent halves so the
//! inbound and outbound pumps can run as separate tasks:
//!
//! - [`FrameReader`] yields one raw frame per transport message
//! - [`FrameWriter`] writes one pre-encoded frame per call
//!
//! Implementations:
//!
//! - **WebSocket** - axum's upgraded socket (feature `websocket`, default)
//! - **Memory** - an in-process pair driven by tests
//!
//! ```rust,ignore
//! use parley_transport::FrameReader;
//!
//! async fn drain(mut reader: impl FrameReader) {
//!     while let Ok(Some(frame)) = reader.recv().await {
//!         // decode and dispatch
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{FrameReader, FrameWriter, TransportError};
