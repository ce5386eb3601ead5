//! Presence broadcaster: per-viewer contact lists.
//!
//! A contact list is recomputed on every push and never stored. Online flags
//! come from the registry; previews come from the store.

use chrono::{DateTime, Utc};
use parley_protocol::{encode, ContactEntry, OutboundFrame, UserList};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::to_rfc3339;
use crate::identity::Identity;
use crate::outbound::FanoutReport;
use crate::state::SharedState;
use crate::store::PersistenceGateway;

/// One row of a viewer's contact list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactListEntry {
    pub identity: Identity,
    pub display_name: String,
    pub is_online: bool,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl From<ContactListEntry> for ContactEntry {
    fn from(entry: ContactListEntry) -> Self {
        ContactEntry {
            identity: entry.identity.into_string(),
            display_name: entry.display_name,
            last_message: entry.last_message,
            last_message_time: entry.last_message_at.map(to_rfc3339),
            is_online: entry.is_online,
        }
    }
}

fn compare_contacts(a: &ContactListEntry, b: &ContactListEntry) -> Ordering {
    match (a.last_message_at, b.last_message_at) {
        (Some(x), Some(y)) => y.cmp(&x).then_with(|| a.identity.cmp(&b.identity)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a
            .display_name
            .cmp(&b.display_name)
            .then_with(|| a.identity.cmp(&b.identity)),
    }
}

/// Order a contact list: conversations first (newest first), then the rest
/// by display name. Identity breaks ties.
pub fn sort_contacts(entries: &mut [ContactListEntry]) {
    entries.sort_by(compare_contacts);
}

/// Computes and pushes contact lists.
#[derive(Clone)]
pub struct PresenceBroadcaster {
    state: SharedState,
    gateway: Arc<dyn PersistenceGateway>,
}

impl PresenceBroadcaster {
    #[must_use]
    pub fn new(state: SharedState, gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self { state, gateway }
    }

    /// Contact list for `viewer`: every known identity except the viewer.
    ///
    /// A failed preview lookup yields an entry without a preview.
    pub async fn contact_list_for(&self, viewer: &Identity) -> Vec<ContactListEntry> {
        let candidates: Vec<(Identity, String, bool)> = {
            let state = self.state.lock().await;
            state
                .presence
                .snapshot()
                .into_iter()
                .filter(|record| &record.identity != viewer)
                .map(|record| {
                    let online = state.registry.is_online(&record.identity);
                    (record.identity, record.display_name, online)
                })
                .collect()
        };

        let mut entries = Vec::with_capacity(candidates.len());
        for (identity, display_name, is_online) in candidates {
            let preview = match self.gateway.last_message_between(viewer, &identity).await {
                Ok(preview) => preview,
                Err(e) => {
                    warn!(viewer = %viewer, contact = %identity, error = %e, "Preview lookup failed");
                    None
                }
            };
            let (last_message, last_message_at) = match preview {
                Some(p) => (Some(p.content), Some(p.sent_at)),
                None => (None, None),
            };
            entries.push(ContactListEntry {
                identity,
                display_name,
                is_online,
                last_message,
                last_message_at,
            });
        }

        sort_contacts(&mut entries);
        entries
    }

    /// Compute the viewer's list and queue it on each of their connections.
    pub async fn push_to(&self, viewer: &Identity) -> FanoutReport {
        let users = self
            .contact_list_for(viewer)
            .await
            .into_iter()
            .map(ContactEntry::from)
            .collect();
        let frame = OutboundFrame::from(UserList { users });
        let payload = match encode(&frame) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(viewer = %viewer, error = %e, "Failed to encode contact list");
                return FanoutReport::default();
            }
        };

        let report = self.state.lock().await.deliver(viewer, &payload, frame.kind());
        debug!(viewer = %viewer, delivered = report.delivered, "Pushed contact list");
        report
    }

    /// Push to both participants of a conversation, once each.
    pub async fn push_to_participants(&self, a: &Identity, b: &Identity) -> FanoutReport {
        let mut report = self.push_to(a).await;
        if a != b {
            report.merge(self.push_to(b).await);
        }
        report
    }

    /// Push to every identity with a live connection.
    pub async fn push_to_all_connected(&self) -> FanoutReport {
        let mut viewers = self.state.lock().await.registry.identities();
        viewers.sort();

        let mut report = FanoutReport::default();
        for viewer in &viewers {
            report.merge(self.push_to(viewer).await);
        }
        report
    }
}
