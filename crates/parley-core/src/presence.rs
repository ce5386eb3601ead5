//! Presence tracking for parley.
//!
//! One record per known identity: display name, online flag and the
//! advisory last-message preview. Records are never removed, so offline
//! contacts stay listed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::identity::Identity;

/// Display name used when a nickname cannot be resolved.
pub const UNKNOWN_DISPLAY_NAME: &str = "Unknown";

/// Presence state for a single identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceRecord {
    pub identity: Identity,
    pub display_name: String,
    pub online: bool,
    /// Advisory preview; contact lists read the store instead.
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl PresenceRecord {
    /// Create an offline record.
    #[must_use]
    pub fn new(identity: Identity, display_name: impl Into<String>) -> Self {
        Self {
            identity,
            display_name: display_name.into(),
            online: false,
            last_message: None,
            last_message_at: None,
        }
    }
}

/// Presence table keyed by identity.
#[derive(Debug, Default)]
pub struct PresenceTable {
    records: HashMap<Identity, PresenceRecord>,
}

impl PresenceTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known identities.
    #[must_use]
    pub fn count(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn contains(&self, identity: &Identity) -> bool {
        self.records.contains_key(identity)
    }

    #[must_use]
    pub fn get(&self, identity: &Identity) -> Option<&PresenceRecord> {
        self.records.get(identity)
    }

    /// Make sure a record exists.
    ///
    /// A new record starts offline. A known nickname replaces the placeholder
    /// of an existing record but never overwrites a resolved one with
    /// `Unknown`.
    ///
    /// Returns `true` if the record was created.
    pub fn ensure(&mut self, identity: &Identity, display_name: &str) -> bool {
        match self.records.get_mut(identity) {
            Some(record) => {
                if display_name != UNKNOWN_DISPLAY_NAME && record.display_name != display_name {
                    record.display_name = display_name.to_string();
                }
                false
            }
            None => {
                self.records.insert(
                    identity.clone(),
                    PresenceRecord::new(identity.clone(), display_name),
                );
                debug!(identity = %identity, "Presence: record created");
                true
            }
        }
    }

    /// Flip the online flag. Returns `true` if it changed.
    pub fn set_online(&mut self, identity: &Identity, online: bool) -> bool {
        match self.records.get_mut(identity) {
            Some(record) if record.online != online => {
                record.online = online;
                debug!(identity = %identity, online, "Presence: status changed");
                true
            }
            _ => false,
        }
    }

    /// Store the advisory preview on an existing record.
    pub fn record_message(&mut self, identity: &Identity, content: &str, at: DateTime<Utc>) {
        if let Some(record) = self.records.get_mut(identity) {
            record.last_message = Some(content.to_string());
            record.last_message_at = Some(at);
        }
    }

    /// Display name of `identity`, or `Unknown`.
    #[must_use]
    pub fn display_name_of(&self, identity: &Identity) -> String {
        self.records
            .get(identity)
            .map_or_else(|| UNKNOWN_DISPLAY_NAME.to_string(), |r| r.display_name.clone())
    }

    /// Copy of every record, ordered by identity.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PresenceRecord> {
        let mut records: Vec<PresenceRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.identity.cmp(&b.identity));
        records
    }
}
