//! Shared hub state.
//!
//! Registry, presence and typing are read and written together, so they live
//! behind one lock. Never hold it across a persistence call.

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::identity::Identity;
use crate::metrics;
use crate::outbound::{EnqueueError, FanoutReport};
use crate::presence::PresenceTable;
use crate::registry::ConnectionRegistry;
use crate::typing::TypingTracker;

/// Hub state shared by the router, broadcaster, sweeper and connection handlers.
pub type SharedState = Arc<Mutex<HubState>>;

/// Connection registry, presence table and typing table.
#[derive(Debug, Default)]
pub struct HubState {
    pub registry: ConnectionRegistry,
    pub presence: PresenceTable,
    pub typing: TypingTracker,
}

impl HubState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap in the shared lock.
    #[must_use]
    pub fn shared() -> SharedState {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Queue `payload` on every live connection of `identity` without blocking.
    ///
    /// Full or closed queues drop the payload for that connection only.
    pub fn deliver(&self, identity: &Identity, payload: &Bytes, kind: &'static str) -> FanoutReport {
        let mut report = FanoutReport::default();
        for sender in self.registry.connections_for(identity) {
            match sender.try_enqueue(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.dropped += 1;
                    match e {
                        EnqueueError::Full => warn!(
                            identity = %identity,
                            connection = %sender.connection(),
                            kind,
                            "Outbound queue full, dropping frame"
                        ),
                        EnqueueError::Closed => warn!(
                            identity = %identity,
                            connection = %sender.connection(),
                            kind,
                            "Outbound queue closed, dropping frame"
                        ),
                    }
                }
            }
        }
        metrics::record_fanout_dropped(kind, report.dropped);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ConnectionId;
    use crate::outbound::outbound_queue;

    #[test]
    fn test_deliver_drops_only_full_connection() {
        let mut state = HubState::new();
        let alice = Identity::new("alice").unwrap();
        let (fast, mut fast_rx) = outbound_queue(ConnectionId::next(), 4);
        let (slow, mut slow_rx) = outbound_queue(ConnectionId::next(), 1);
        state.registry.register(&alice, fast);
        state.registry.register(&alice, slow);

        let first = state.deliver(&alice, &Bytes::from("one"), "chat");
        let second = state.deliver(&alice, &Bytes::from("two"), "chat");

        assert_eq!(first, FanoutReport { delivered: 2, dropped: 0 });
        assert_eq!(second, FanoutReport { delivered: 1, dropped: 1 });
        assert_eq!(fast_rx.try_recv(), Some(Bytes::from("one")));
        assert_eq!(fast_rx.try_recv(), Some(Bytes::from("two")));
        assert_eq!(slow_rx.try_recv(), Some(Bytes::from("one")));
        assert_eq!(slow_rx.try_recv(), None);
    }

    #[test]
    fn test_deliver_to_offline_is_noop() {
        let state = HubState::new();
        let report = state.deliver(&Identity::new("bob").unwrap(), &Bytes::from("x"), "chat");
        assert_eq!(report, FanoutReport::default());
    }
}
