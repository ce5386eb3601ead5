//! Typing indicator state.
//!
//! At most one record per connection. A record disappears on an explicit
//! stop, on disconnect, or when the idle sweep finds it stale.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::clock::elapsed_millis;
use crate::identity::{ConnectionId, Identity};

/// A connection that is currently signalling "typing".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingRecord {
    pub connection: ConnectionId,
    /// Identity owning the connection.
    pub owner: Identity,
    pub target: Identity,
    pub last_activity: DateTime<Utc>,
}

impl TypingRecord {
    /// Whether the record has been idle for longer than `staleness`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, staleness: Duration) -> bool {
        let threshold = i64::try_from(staleness.as_millis()).unwrap_or(i64::MAX);
        elapsed_millis(self.last_activity, now) > threshold
    }
}

/// Typing table keyed by connection.
#[derive(Debug, Default)]
pub struct TypingTracker {
    records: HashMap<ConnectionId, TypingRecord>,
}

impl TypingTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn get(&self, connection: ConnectionId) -> Option<&TypingRecord> {
        self.records.get(&connection)
    }

    /// Create or refresh the record for `connection`.
    ///
    /// Returns the record it replaced, if any.
    pub fn start(
        &mut self,
        connection: ConnectionId,
        owner: &Identity,
        target: &Identity,
        now: DateTime<Utc>,
    ) -> Option<TypingRecord> {
        self.records.insert(
            connection,
            TypingRecord {
                connection,
                owner: owner.clone(),
                target: target.clone(),
                last_activity: now,
            },
        )
    }

    /// Remove the record after an explicit stop.
    pub fn stop(&mut self, connection: ConnectionId) -> Option<TypingRecord> {
        self.records.remove(&connection)
    }

    /// Remove the record of a closed connection.
    pub fn purge(&mut self, connection: ConnectionId) -> Option<TypingRecord> {
        let removed = self.records.remove(&connection);
        if removed.is_some() {
            debug!(connection = %connection, "Typing: purged on disconnect");
        }
        removed
    }

    /// Remove stale records and records whose connection is gone.
    ///
    /// Returns the removed records.
    pub fn sweep(
        &mut self,
        now: DateTime<Utc>,
        staleness: Duration,
        is_live: impl Fn(&TypingRecord) -> bool,
    ) -> Vec<TypingRecord> {
        let expired: Vec<ConnectionId> = self
            .records
            .values()
            .filter(|record| record.is_stale(now, staleness) || !is_live(record))
            .map(|record| record.connection)
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for connection in expired {
            if let Some(record) = self.records.remove(&connection) {
                debug!(connection = %connection, owner = %record.owner, "Typing: record expired");
                removed.push(record);
            }
        }
        removed.sort_by_key(|record| record.connection);
        removed
    }
}
