//! # parley-core
//!
//! Real-time presence and messaging fan-out for parley.
//!
//! This crate provides:
//!
//! - **Registry** - identity to live connections (one per browser tab)
//! - **Presence** - cached display name, online flag and last-message preview
//! - **Typing** - per-connection typing state with an idle sweep
//! - **Router** - persists chat messages and delivers them to both parties
//! - **Broadcaster** - per-viewer contact lists, sorted by recent activity
//! - **Pump** - the inbound/outbound task pair serving one connection
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  frames  ┌──────────┐  chat   ┌──────────────┐
//! │ Connection │─────────▶│   Hub    │────────▶│ MessageRouter│──▶ PersistenceGateway
//! │  (pumps)   │◀─────────│          │ typing  └──────┬───────┘
//! └────────────┘  queue   └────┬─────┘                 ▼
//!                              │            ┌─────────────────────┐
//!                              └───────────▶│ PresenceBroadcaster │
//!                                           └─────────────────────┘
//!                HubState = Registry + Presence + Typing (one lock)
//! ```

pub mod broadcaster;
pub mod clock;
pub mod hub;
pub mod identity;
pub mod message;
pub mod metrics;
pub mod outbound;
pub mod presence;
pub mod pump;
pub mod registry;
pub mod router;
pub mod state;
pub mod store;
pub mod typing;

pub use broadcaster::{sort_contacts, ContactListEntry, PresenceBroadcaster};
pub use clock::{Clock, ManualClock, SystemClock};
pub use hub::{Hub, HubConfig, HubError, HubTasks, HISTORY_PAGE_SIZE};
pub use identity::{ConnectionId, Identity, IdentityError, Session};
pub use message::{ChatMessage, MessageId, MessagePreview};
pub use outbound::{outbound_queue, EnqueueError, FanoutReport, OutboundReceiver, OutboundSender};
pub use presence::{PresenceRecord, PresenceTable, UNKNOWN_DISPLAY_NAME};
pub use pump::serve_connection;
pub use registry::{ConnectionRegistry, Unregistered};
pub use router::{ChatCommand, MessageRouter, RouteOutcome, RouterError};
pub use state::{HubState, SharedState};
pub use store::{InMemoryGateway, PersistenceGateway, StoreError};
pub use typing::{TypingRecord, TypingTracker};
