//! Connection registry: identity to its live connections.
//!
//! An identity may hold several connections at once (one per tab). It is
//! online while at least one is registered.

use std::collections::HashMap;
use tracing::debug;

use crate::identity::{ConnectionId, Identity};
use crate::outbound::OutboundSender;

/// Outcome of [`ConnectionRegistry::unregister`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unregistered {
    /// The connection was not registered.
    NotRegistered,
    /// Removed; the identity still has this many connections.
    StillOnline(usize),
    /// Removed the identity's last connection.
    NowOffline,
}

/// Registry of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    identities: HashMap<Identity, HashMap<ConnectionId, OutboundSender>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns `true` if it is the identity's first.
    pub fn register(&mut self, identity: &Identity, sender: OutboundSender) -> bool {
        let connections = self.identities.entry(identity.clone()).or_default();
        let first = connections.is_empty();
        debug!(identity = %identity, connection = %sender.connection(), "Registry: connection added");
        connections.insert(sender.connection(), sender);
        first
    }

    /// Remove a connection, dropping the identity once it has none left.
    pub fn unregister(&mut self, identity: &Identity, connection: ConnectionId) -> Unregistered {
        let Some(connections) = self.identities.get_mut(identity) else {
            return Unregistered::NotRegistered;
        };
        if connections.remove(&connection).is_none() {
            return Unregistered::NotRegistered;
        }
        debug!(identity = %identity, connection = %connection, "Registry: connection removed");

        if connections.is_empty() {
            self.identities.remove(identity);
            Unregistered::NowOffline
        } else {
            Unregistered::StillOnline(connections.len())
        }
    }

    /// Snapshot of an identity's senders (empty if offline).
    #[must_use]
    pub fn connections_for(&self, identity: &Identity) -> Vec<OutboundSender> {
        self.identities
            .get(identity)
            .map(|connections| connections.values().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_online(&self, identity: &Identity) -> bool {
        self.identities.contains_key(identity)
    }

    /// Whether `connection` is still registered under `identity`.
    #[must_use]
    pub fn is_live(&self, identity: &Identity, connection: ConnectionId) -> bool {
        self.identities
            .get(identity)
            .is_some_and(|connections| connections.contains_key(&connection))
    }

    /// Identities with at least one connection.
    #[must_use]
    pub fn identities(&self) -> Vec<Identity> {
        self.identities.keys().cloned().collect()
    }

    #[must_use]
    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.identities.values().map(HashMap::len).sum()
    }
}
