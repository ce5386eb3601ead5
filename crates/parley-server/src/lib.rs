//! # parley-server
//!
//! HTTP and WebSocket host for the parley engine: configuration, metrics
//! export and the axum routes that hand upgraded sockets to the connection
//! pumps.

pub mod config;
pub mod handlers;
pub mod metrics;

pub use crate::config::Config;
pub use crate::handlers::{app, run_server, AppState};
