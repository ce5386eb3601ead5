//! Identity and connection identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Maximum identity length in bytes.
pub const MAX_IDENTITY_LENGTH: usize = 128;

/// Atomic counter for connection IDs.
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("Identity cannot be empty")]
    Empty,

    #[error("Identity longer than {MAX_IDENTITY_LENGTH} bytes")]
    TooLong,

    #[error("Identity contains control characters")]
    InvalidCharacters,
}

/// Stable, unique user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Validate and wrap an identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is blank, too long, or contains
    /// control characters.
    pub fn new(value: impl Into<String>) -> Result<Self, IdentityError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(IdentityError::Empty);
        }
        if value.len() > MAX_IDENTITY_LENGTH {
            return Err(IdentityError::TooLong);
        }
        if value.chars().any(char::is_control) {
            return Err(IdentityError::InvalidCharacters);
        }
        Ok(Self(value))
    }

    /// Get the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unwrap into the owned string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Identity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Identity {
    type Error = IdentityError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Process-unique identifier of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next connection ID.
    #[must_use]
    pub fn next() -> Self {
        Self(CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The server-derived owner of a connection.
///
/// Every `from` on the wire comes from here, never from the client payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub identity: Identity,
    pub connection: ConnectionId,
}
