//! Hub: wires the engine together and owns its background tasks.

use parley_protocol::{ChatDelivery, ChatFrame, FrameCodec, InboundFrame, TypingFrame, MAX_FRAME_SIZE};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::broadcaster::{ContactListEntry, PresenceBroadcaster};
use crate::clock::{to_rfc3339, Clock};
use crate::identity::{ConnectionId, Identity, IdentityError, Session};
use crate::outbound::{outbound_queue, OutboundReceiver};
use crate::presence::{PresenceRecord, UNKNOWN_DISPLAY_NAME};
use crate::registry::Unregistered;
use crate::router::{send_typing_stop, ChatCommand, MessageRouter, RouterError};
use crate::state::{HubState, SharedState};
use crate::store::{PersistenceGateway, StoreError};

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The frame's `to` is not a valid identity.
    #[error("Invalid target: {0}")]
    InvalidTarget(#[from] IdentityError),

    /// The router task is gone.
    #[error("Message router closed")]
    RouterClosed,

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Messages per history page.
pub const HISTORY_PAGE_SIZE: usize = 10;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Frames buffered per connection before fan-out starts dropping.
    pub outbound_capacity: usize,
    /// Chat messages buffered ahead of the router.
    pub chat_queue_capacity: usize,
    pub typing_sweep_interval: Duration,
    /// Idle time after which a typing indicator expires.
    pub typing_staleness: Duration,
    /// Largest inbound frame accepted, in bytes.
    pub max_frame_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            chat_queue_capacity: 1024,
            typing_sweep_interval: Duration::from_secs(10),
            typing_staleness: Duration::from_secs(15),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

/// Background tasks started with the hub.
#[derive(Debug)]
pub struct HubTasks {
    router: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl HubTasks {
    /// Stop the router and the typing sweeper.
    pub fn shutdown(self) {
        self.router.abort();
        self.sweeper.abort();
        info!("Hub tasks stopped");
    }
}

struct HubInner {
    config: HubConfig,
    state: SharedState,
    gateway: Arc<dyn PersistenceGateway>,
    router: MessageRouter,
    broadcaster: PresenceBroadcaster,
    chat_tx: mpsc::Sender<ChatCommand>,
}

/// Handle to the engine. Cheap to clone.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Build the engine and spawn the router and sweeper tasks.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(
        config: HubConfig,
        gateway: Arc<dyn PersistenceGateway>,
        clock: Arc<dyn Clock>,
    ) -> (Self, HubTasks) {
        info!("Starting hub with config: {:?}", config);
        let state = HubState::shared();
        let broadcaster = PresenceBroadcaster::new(state.clone(), gateway.clone());
        let router = MessageRouter::new(state.clone(), gateway.clone(), clock, broadcaster.clone());
        let (chat_tx, chat_rx) = mpsc::channel(config.chat_queue_capacity.max(1));

        let router_task = tokio::spawn(router.clone().run(chat_rx));
        let sweeper = tokio::spawn(sweep_loop(
            router.clone(),
            config.typing_sweep_interval,
            config.typing_staleness,
        ));

        let hub = Self {
            inner: Arc::new(HubInner {
                config,
                state,
                gateway,
                router,
                broadcaster,
                chat_tx,
            }),
        };
        (
            hub,
            HubTasks {
                router: router_task,
                sweeper,
            },
        )
    }

    /// Decoder for inbound frames, capped at `max_frame_size`.
    #[must_use]
    pub fn frame_codec(&self) -> FrameCodec {
        FrameCodec::with_max_frame_size(self.inner.config.max_frame_size)
    }

    /// Load every registered user into the presence table.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot list its users.
    pub async fn seed_from_gateway(&self) -> Result<usize, HubError> {
        let users = self.inner.gateway.known_identities().await?;
        let mut state = self.inner.state.lock().await;
        let mut created = 0;
        for (identity, nickname) in &users {
            if state.presence.ensure(identity, nickname) {
                created += 1;
            }
        }
        info!(users = users.len(), created, "Seeded presence from store");
        Ok(created)
    }

    /// Make an identity known, offline, without a connection.
    ///
    /// Connected viewers get a fresh contact list if the identity is new.
    pub async fn register_identity(&self, identity: &Identity, display_name: &str) -> bool {
        let created = self.inner.state.lock().await.presence.ensure(identity, display_name);
        if created {
            self.inner.broadcaster.push_to_all_connected().await;
        }
        created
    }

    /// Register a new connection for `identity` and announce it.
    pub async fn connect(&self, identity: Identity) -> (Session, OutboundReceiver) {
        let display_name = self.resolve_display_name(&identity).await;
        let connection = ConnectionId::next();
        let (sender, receiver) = outbound_queue(connection, self.inner.config.outbound_capacity);

        {
            let mut state = self.inner.state.lock().await;
            state.presence.ensure(&identity, &display_name);
            state.registry.register(&identity, sender);
            state.presence.set_online(&identity, true);
        }
        info!(identity = %identity, connection = %connection, "Connection opened");

        self.inner.broadcaster.push_to_all_connected().await;
        (
            Session {
                identity,
                connection,
            },
            receiver,
        )
    }

    async fn resolve_display_name(&self, identity: &Identity) -> String {
        let cached = {
            let state = self.inner.state.lock().await;
            state
                .presence
                .get(identity)
                .map(|record| record.display_name.clone())
                .filter(|name| name != UNKNOWN_DISPLAY_NAME)
        };
        if let Some(name) = cached {
            return name;
        }

        match self.inner.gateway.nickname_of(identity).await {
            Ok(Some(nickname)) => nickname,
            Ok(None) => UNKNOWN_DISPLAY_NAME.to_string(),
            Err(e) => {
                warn!(identity = %identity, error = %e, "Nickname lookup failed");
                UNKNOWN_DISPLAY_NAME.to_string()
            }
        }
    }

    /// Remove a connection and announce the change.
    ///
    /// The identity goes offline with its last connection. Any typing
    /// indicator the connection held is stopped at its target.
    pub async fn disconnect(&self, session: &Session) {
        let outcome = {
            let mut state = self.inner.state.lock().await;
            let outcome = state.registry.unregister(&session.identity, session.connection);
            if outcome == Unregistered::NowOffline {
                state.presence.set_online(&session.identity, false);
            }
            if let Some(record) = state.typing.purge(session.connection) {
                send_typing_stop(&state, &record);
            }
            outcome
        };

        match outcome {
            Unregistered::NotRegistered => {
                debug!(connection = %session.connection, "Connection already removed");
                return;
            }
            Unregistered::StillOnline(remaining) => {
                info!(identity = %session.identity, connection = %session.connection, remaining, "Connection closed");
            }
            Unregistered::NowOffline => {
                info!(identity = %session.identity, connection = %session.connection, "Connection closed, identity offline");
            }
        }

        self.inner.broadcaster.push_to_all_connected().await;
    }

    /// Handle one decoded frame from a connection.
    ///
    /// Chat frames join the router queue, waiting for room if it is full.
    /// Typing frames are handled immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the target is not a valid identity, the router is
    /// gone, or a pulse cannot be encoded.
    pub async fn dispatch(&self, session: &Session, frame: InboundFrame) -> Result<(), HubError> {
        match frame {
            InboundFrame::Chat(ChatFrame { to, content }) => {
                let command = ChatCommand {
                    from: session.identity.clone(),
                    to: Identity::new(to)?,
                    content,
                };
                self.inner
                    .chat_tx
                    .send(command)
                    .await
                    .map_err(|_| HubError::RouterClosed)
            }
            InboundFrame::Typing(TypingFrame { kind, to }) => {
                let to = Identity::new(to)?;
                self.inner.router.route_typing(session, kind, &to).await?;
                Ok(())
            }
        }
    }

    /// One page of `viewer`'s conversation with `other`, oldest first.
    ///
    /// `offset` counts back from the newest message. Each entry carries the
    /// sender's display name; the store nickname wins over the cached one.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot read the conversation.
    pub async fn history(
        &self,
        viewer: &Identity,
        other: &Identity,
        offset: usize,
    ) -> Result<Vec<ChatDelivery>, HubError> {
        let messages = self
            .inner
            .gateway
            .messages_between(viewer, other, HISTORY_PAGE_SIZE, offset)
            .await?;

        let viewer_name = self.history_display_name(viewer).await;
        let other_name = self.history_display_name(other).await;
        debug!(viewer = %viewer, other = %other, offset, count = messages.len(), "Loaded history page");

        Ok(messages
            .into_iter()
            .map(|message| {
                let from_display_name = if &message.from == viewer {
                    viewer_name.clone()
                } else {
                    other_name.clone()
                };
                ChatDelivery {
                    from: message.from.into_string(),
                    to: message.to.into_string(),
                    content: message.content,
                    sent_at: to_rfc3339(message.sent_at),
                    from_display_name,
                }
            })
            .collect())
    }

    async fn history_display_name(&self, identity: &Identity) -> String {
        match self.inner.gateway.nickname_of(identity).await {
            Ok(Some(nickname)) => nickname,
            Ok(None) => self.inner.state.lock().await.presence.display_name_of(identity),
            Err(e) => {
                warn!(identity = %identity, error = %e, "Nickname lookup failed");
                self.inner.state.lock().await.presence.display_name_of(identity)
            }
        }
    }

    /// Run one typing sweep now.
    pub async fn sweep_typing(&self) -> usize {
        self.inner
            .router
            .expire_typing(self.inner.config.typing_staleness)
            .await
    }

    /// Every presence record, ordered by identity.
    pub async fn presence_snapshot(&self) -> Vec<PresenceRecord> {
        self.inner.state.lock().await.presence.snapshot()
    }

    pub async fn contact_list_for(&self, viewer: &Identity) -> Vec<ContactListEntry> {
        self.inner.broadcaster.contact_list_for(viewer).await
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.inner.state.lock().await.registry.connection_count()
    }

    pub async fn is_online(&self, identity: &Identity) -> bool {
        self.inner.state.lock().await.registry.is_online(identity)
    }
}

async fn sweep_loop(router: MessageRouter, every: Duration, staleness: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let removed = router.expire_typing(staleness).await;
        if removed > 0 {
            debug!(removed, "Typing sweep");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{InMemoryGateway, MockPersistenceGateway};
    use parley_protocol::TypingKind;
    use serde_json::Value;

    fn id(value: &str) -> Identity {
        Identity::new(value).unwrap()
    }

    fn drain(rx: &mut OutboundReceiver) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.try_recv() {
            frames.push(serde_json::from_slice(&frame).unwrap());
        }
        frames
    }

    fn start_hub(store: Arc<dyn PersistenceGateway>) -> (Hub, HubTasks, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_millis(0));
        let (hub, tasks) = Hub::start(HubConfig::default(), store, clock.clone());
        (hub, tasks, clock)
    }

    #[tokio::test]
    async fn test_connect_uses_store_nickname() {
        let store = Arc::new(InMemoryGateway::new());
        store.add_user(id("alice"), "Alice");
        let (hub, tasks, _) = start_hub(store);

        let (_session, mut rx) = hub.connect(id("alice")).await;

        let snapshot = hub.presence_snapshot().await;
        assert_eq!(snapshot[0].display_name, "Alice");
        assert!(snapshot[0].online);
        // alice gets her own (empty) contact list on connect
        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "user_list");
        tasks.shutdown();
    }

    #[tokio::test]
    async fn test_connect_survives_nickname_failure() {
        let mut store = MockPersistenceGateway::new();
        store
            .expect_nickname_of()
            .returning(|_| Err(StoreError::Unavailable));
        let (hub, tasks, _) = start_hub(Arc::new(store));

        let (session, _rx) = hub.connect(id("alice")).await;

        assert!(hub.is_online(&session.identity).await);
        assert_eq!(hub.presence_snapshot().await[0].display_name, "Unknown");
        tasks.shutdown();
    }

    #[tokio::test]
    async fn test_second_tab_keeps_identity_online() {
        let (hub, tasks, _) = start_hub(Arc::new(InMemoryGateway::new()));
        let (tab1, _rx1) = hub.connect(id("alice")).await;
        let (tab2, _rx2) = hub.connect(id("alice")).await;

        hub.disconnect(&tab1).await;
        assert!(hub.is_online(&id("alice")).await);

        hub.disconnect(&tab2).await;
        assert!(!hub.is_online(&id("alice")).await);
        assert!(!hub.presence_snapshot().await[0].online);
        tasks.shutdown();
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (hub, tasks, _) = start_hub(Arc::new(InMemoryGateway::new()));
        let (session, _rx) = hub.connect(id("alice")).await;

        hub.disconnect(&session).await;
        hub.disconnect(&session).await;

        assert_eq!(hub.connection_count().await, 0);
        tasks.shutdown();
    }

    #[tokio::test]
    async fn test_disconnect_stops_typing() {
        // given: alice typing to bob
        let (hub, tasks, _) = start_hub(Arc::new(InMemoryGateway::new()));
        let (alice, _alice_rx) = hub.connect(id("alice")).await;
        let (_bob, mut bob_rx) = hub.connect(id("bob")).await;
        hub.dispatch(&alice, InboundFrame::typing(TypingKind::TypingStart, "bob"))
            .await
            .unwrap();
        drain(&mut bob_rx);

        // when
        hub.disconnect(&alice).await;

        // then: bob sees typing stop, then a list with alice offline
        let frames = drain(&mut bob_rx);
        assert_eq!(frames[0]["type"], "typing_stop");
        assert_eq!(frames[0]["from"], "alice");
        assert_eq!(frames[1]["type"], "user_list");
        assert_eq!(frames[1]["users"][0]["is_online"], false);
        tasks.shutdown();
    }

    #[tokio::test]
    async fn test_dispatch_rejects_invalid_target() {
        let (hub, tasks, _) = start_hub(Arc::new(InMemoryGateway::new()));
        let (session, _rx) = hub.connect(id("alice")).await;

        let result = hub
            .dispatch(&session, InboundFrame::chat("bad\u{0007}", "hi"))
            .await;

        assert!(matches!(result, Err(HubError::InvalidTarget(_))));
        tasks.shutdown();
    }

    #[tokio::test]
    async fn test_seed_and_register_identity() {
        let store = Arc::new(InMemoryGateway::new());
        store.add_user(id("alice"), "Alice");
        store.add_user(id("bob"), "Bob");
        let (hub, tasks, _) = start_hub(store);

        assert_eq!(hub.seed_from_gateway().await.unwrap(), 2);
        assert_eq!(hub.seed_from_gateway().await.unwrap(), 0);
        assert!(hub.register_identity(&id("carol"), "Carol").await);

        let list = hub.contact_list_for(&id("alice")).await;
        let names: Vec<&str> = list.iter().map(|e| e.display_name.as_str()).collect();
        assert_eq!(names, vec!["Bob", "Carol"]);
        tasks.shutdown();
    }

    #[tokio::test]
    async fn test_history_attaches_sender_names() {
        // given: a conversation of 12 messages; bob has no store nickname
        let store = Arc::new(InMemoryGateway::new());
        store.add_user(id("alice"), "Alice");
        let (hub, tasks, clock) = start_hub(store);
        let (alice, _alice_rx) = hub.connect(id("alice")).await;
        let (bob, _bob_rx) = hub.connect(id("bob")).await;
        for i in 0..12 {
            let (session, to) = if i % 3 == 0 { (&bob, "alice") } else { (&alice, "bob") };
            hub.dispatch(session, InboundFrame::chat(to, format!("m{i}")))
                .await
                .unwrap();
            clock.advance(Duration::from_secs(1));
        }
        // the router task drains the queue in order; wait for the last one
        while hub.history(&id("alice"), &id("bob"), 0).await.unwrap().last().map(|m| m.content.clone())
            != Some("m11".to_string())
        {
            tokio::task::yield_now().await;
        }

        // when
        let newest = hub.history(&id("alice"), &id("bob"), 0).await.unwrap();
        let oldest = hub.history(&id("bob"), &id("alice"), HISTORY_PAGE_SIZE).await.unwrap();

        // then
        assert_eq!(newest.len(), HISTORY_PAGE_SIZE);
        assert_eq!(newest[0].content, "m2");
        assert_eq!(newest[9].content, "m11");
        let contents: Vec<&str> = oldest.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1"]);
        assert_eq!(oldest[0].from, "bob");
        assert_eq!(oldest[0].from_display_name, "Unknown");
        assert_eq!(oldest[1].from_display_name, "Alice");
        tasks.shutdown();
    }

    #[tokio::test]
    async fn test_history_store_failure() {
        let mut store = MockPersistenceGateway::new();
        store.expect_nickname_of().returning(|_| Ok(None));
        store
            .expect_messages_between()
            .returning(|_, _, _, _| Err(StoreError::Unavailable));
        let (hub, tasks, _) = start_hub(Arc::new(store));

        let result = hub.history(&id("alice"), &id("bob"), 0).await;

        assert!(matches!(result, Err(HubError::Store(StoreError::Unavailable))));
        tasks.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_expires_typing() {
        // given: alice typing to bob, clock and timer both paused
        let (hub, tasks, clock) = start_hub(Arc::new(InMemoryGateway::new()));
        let (alice, _alice_rx) = hub.connect(id("alice")).await;
        let (_bob, mut bob_rx) = hub.connect(id("bob")).await;
        hub.dispatch(&alice, InboundFrame::typing(TypingKind::TypingStart, "bob"))
            .await
            .unwrap();
        drain(&mut bob_rx);

        // when: the indicator ages past the threshold and the sweeper ticks twice
        clock.advance(Duration::from_secs(16));
        tokio::time::sleep(Duration::from_secs(21)).await;

        // then
        let frames = drain(&mut bob_rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "typing_stop");
        tasks.shutdown();
    }
}
