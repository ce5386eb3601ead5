//! Message router for parley.
//!
//! Chat messages are consumed one at a time, in arrival order, by a single
//! task. Typing pulses are routed inline by the connection that produced them.

use bytes::Bytes;
use parley_protocol::{encode, ChatDelivery, OutboundFrame, ProtocolError, TypingKind, TypingPulse};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::broadcaster::PresenceBroadcaster;
use crate::clock::{to_rfc3339, Clock};
use crate::identity::{Identity, Session};
use crate::message::ChatMessage;
use crate::metrics;
use crate::outbound::FanoutReport;
use crate::presence::UNKNOWN_DISPLAY_NAME;
use crate::state::{HubState, SharedState};
use crate::store::PersistenceGateway;
use crate::typing::TypingRecord;

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// An outbound frame could not be encoded.
    #[error("Failed to encode frame: {0}")]
    Encode(#[from] ProtocolError),
}

/// A chat message waiting to be routed. `from` comes from the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCommand {
    pub from: Identity,
    pub to: Identity,
    pub content: String,
}

/// What happened to one routed message.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub message: ChatMessage,
    /// `false` if the store rejected the message; it was still delivered.
    pub persisted: bool,
    pub delivered: FanoutReport,
}

/// Encode a typing pulse from `from` and queue it for `to`.
pub(crate) fn send_typing(
    state: &HubState,
    kind: TypingKind,
    from: &Identity,
    to: &Identity,
) -> Result<FanoutReport, RouterError> {
    let frame = OutboundFrame::from(TypingPulse {
        kind,
        from: from.to_string(),
        to: to.to_string(),
        display_name: state.presence.display_name_of(from),
    });
    let payload = encode(&frame)?;
    trace!(from = %from, to = %to, kind = kind.as_str(), "Typing pulse");
    Ok(state.deliver(to, &payload, frame.kind()))
}

/// Tell a record's target that its owner stopped typing.
pub(crate) fn send_typing_stop(state: &HubState, record: &TypingRecord) -> FanoutReport {
    match send_typing(state, TypingKind::TypingStop, &record.owner, &record.target) {
        Ok(report) => report,
        Err(e) => {
            warn!(connection = %record.connection, error = %e, "Failed to send typing stop");
            FanoutReport::default()
        }
    }
}

/// Routes chat and typing traffic between connections.
#[derive(Clone)]
pub struct MessageRouter {
    state: SharedState,
    gateway: Arc<dyn PersistenceGateway>,
    clock: Arc<dyn Clock>,
    broadcaster: PresenceBroadcaster,
}

impl MessageRouter {
    #[must_use]
    pub fn new(
        state: SharedState,
        gateway: Arc<dyn PersistenceGateway>,
        clock: Arc<dyn Clock>,
        broadcaster: PresenceBroadcaster,
    ) -> Self {
        Self {
            state,
            gateway,
            clock,
            broadcaster,
        }
    }

    /// Consume chat commands in order until every sender is dropped.
    pub async fn run(self, mut commands: mpsc::Receiver<ChatCommand>) {
        info!("Message router started");
        while let Some(command) = commands.recv().await {
            if let Err(e) = self.route(command).await {
                warn!(error = %e, "Failed to route chat message");
            }
        }
        info!("Message router stopped");
    }

    /// Persist a chat message, deliver it to both parties and refresh their
    /// contact lists.
    ///
    /// A store failure does not stop delivery; it is reported through
    /// [`RouteOutcome::persisted`].
    ///
    /// # Errors
    ///
    /// Returns an error if the delivery frame cannot be encoded.
    pub async fn route(&self, command: ChatCommand) -> Result<RouteOutcome, RouterError> {
        let started = Instant::now();
        let ChatCommand { from, to, content } = command;
        let message = ChatMessage::new(from, to, content, self.clock.now());

        let persisted = match self.gateway.save_message(&message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    id = %message.id,
                    from = %message.from,
                    to = %message.to,
                    error = %e,
                    "Failed to persist message, delivering anyway"
                );
                metrics::record_persist_failure();
                false
            }
        };

        self.ensure_recipient(&message.to).await;

        let delivered = {
            let mut state = self.state.lock().await;
            state
                .presence
                .record_message(&message.from, &message.content, message.sent_at);
            state
                .presence
                .record_message(&message.to, &message.content, message.sent_at);

            let payload = self.delivery_payload(&state, &message)?;
            let mut report = state.deliver(&message.to, &payload, "chat");
            if message.from != message.to {
                report.merge(state.deliver(&message.from, &payload, "chat"));
            }
            report
        };

        debug!(
            id = %message.id,
            from = %message.from,
            to = %message.to,
            delivered = delivered.delivered,
            dropped = delivered.dropped,
            "Routed chat message"
        );

        self.broadcaster
            .push_to_participants(&message.from, &message.to)
            .await;

        metrics::record_chat_message();
        metrics::record_route_latency(started.elapsed().as_secs_f64());

        Ok(RouteOutcome {
            message,
            persisted,
            delivered,
        })
    }

    /// Create an offline presence record for a first-time recipient.
    ///
    /// Without a store nickname the record starts as "Unknown"; a later
    /// connect or seed replaces it.
    async fn ensure_recipient(&self, to: &Identity) {
        if self.state.lock().await.presence.contains(to) {
            return;
        }
        let nickname = match self.gateway.nickname_of(to).await {
            Ok(Some(nickname)) => nickname,
            Ok(None) => {
                trace!(to = %to, "Recipient unknown to the store");
                UNKNOWN_DISPLAY_NAME.to_string()
            }
            Err(e) => {
                warn!(to = %to, error = %e, "Nickname lookup failed");
                UNKNOWN_DISPLAY_NAME.to_string()
            }
        };
        self.state.lock().await.presence.ensure(to, &nickname);
    }

    fn delivery_payload(&self, state: &HubState, message: &ChatMessage) -> Result<Bytes, RouterError> {
        let frame = OutboundFrame::from(ChatDelivery {
            from: message.from.to_string(),
            to: message.to.to_string(),
            content: message.content.clone(),
            sent_at: to_rfc3339(message.sent_at),
            from_display_name: state.presence.display_name_of(&message.from),
        });
        Ok(encode(&frame)?)
    }

    /// Update typing state for a connection and pulse the target.
    ///
    /// Moving a `typing_start` to a new target stops the indicator at the old
    /// one. Frames from a connection that is no longer registered are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the pulse cannot be encoded.
    pub async fn route_typing(
        &self,
        session: &Session,
        kind: TypingKind,
        to: &Identity,
    ) -> Result<FanoutReport, RouterError> {
        let mut state = self.state.lock().await;
        if !state.registry.is_live(&session.identity, session.connection) {
            debug!(connection = %session.connection, "Ignoring typing from closed connection");
            return Ok(FanoutReport::default());
        }

        let previous = match kind {
            TypingKind::TypingStart => {
                state
                    .typing
                    .start(session.connection, &session.identity, to, self.clock.now())
            }
            TypingKind::TypingStop => state.typing.stop(session.connection),
        };

        let mut report = FanoutReport::default();
        if let Some(previous) = previous.filter(|p| &p.target != to) {
            report.merge(send_typing_stop(&state, &previous));
        }
        report.merge(send_typing(&state, kind, &session.identity, to)?);
        Ok(report)
    }

    /// Run one typing sweep: drop idle records and records of closed
    /// connections, and tell their targets typing stopped.
    ///
    /// Returns the number of records removed.
    pub async fn expire_typing(&self, staleness: Duration) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let HubState {
            registry, typing, ..
        } = &mut *state;
        let removed = typing.sweep(now, staleness, |record| {
            registry.is_live(&record.owner, record.connection)
        });

        for record in &removed {
            send_typing_stop(&state, record);
        }
        metrics::record_typing_expired(removed.len());
        removed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::identity::ConnectionId;
    use crate::outbound::{outbound_queue, OutboundReceiver};
    use crate::store::{InMemoryGateway, MockPersistenceGateway, StoreError};
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

    fn chats(frames: &[Value]) -> Vec<&Value> {
        frames.iter().filter(|f| f.get("content").is_some()).collect()
    }

    struct Fixture {
        state: SharedState,
        router: MessageRouter,
        clock: Arc<ManualClock>,
    }

    fn fixture(gateway: Arc<dyn PersistenceGateway>) -> Fixture {
        let state = HubState::shared();
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let broadcaster = PresenceBroadcaster::new(state.clone(), gateway.clone());
        let router = MessageRouter::new(state.clone(), gateway, clock.clone(), broadcaster);
        Fixture {
            state,
            router,
            clock,
        }
    }

    async fn connect(state: &SharedState, identity: &str, name: &str) -> (Session, OutboundReceiver) {
        let identity = id(identity);
        let connection = ConnectionId::next();
        let (tx, rx) = outbound_queue(connection, 32);
        let mut guard = state.lock().await;
        guard.presence.ensure(&identity, name);
        guard.registry.register(&identity, tx);
        guard.presence.set_online(&identity, true);
        (
            Session {
                identity,
                connection,
            },
            rx,
        )
    }

    fn command(from: &str, to: &str, content: &str) -> ChatCommand {
        ChatCommand {
            from: id(from),
            to: id(to),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_route_delivers_to_both_parties() {
        // given: alice and bob online
        let store = Arc::new(InMemoryGateway::new());
        let f = fixture(store.clone());
        let (_alice, mut alice_rx) = connect(&f.state, "alice", "Alice").await;
        let (_bob, mut bob_rx) = connect(&f.state, "bob", "Bob").await;

        // when
        let outcome = f.router.route(command("alice", "bob", "hello")).await.unwrap();

        // then: one delivery each, sender name resolved, message persisted
        assert!(outcome.persisted);
        assert_eq!(outcome.delivered.delivered, 2);
        for rx in [&mut alice_rx, &mut bob_rx] {
            let frames = drain(rx);
            let chat = chats(&frames);
            assert_eq!(chat.len(), 1);
            assert_eq!(chat[0]["content"], "hello");
            assert_eq!(chat[0]["from"], "alice");
            assert_eq!(chat[0]["from_display_name"], "Alice");
            assert_eq!(chat[0]["sent_at"], "2023-11-14T22:13:20.000Z");
        }
        assert_eq!(store.conversation(&id("alice"), &id("bob")).len(), 1);
    }

    #[tokio::test]
    async fn test_route_to_offline_recipient_persists() {
        let store = Arc::new(InMemoryGateway::new());
        store.add_user(id("bob"), "Bob");
        let f = fixture(store.clone());
        let (_alice, mut alice_rx) = connect(&f.state, "alice", "Alice").await;

        let outcome = f.router.route(command("alice", "bob", "later")).await.unwrap();

        assert!(outcome.persisted);
        assert_eq!(outcome.delivered.delivered, 1);
        assert_eq!(store.message_count(), 1);
        // bob gets an offline presence record and shows up with the preview
        let frames = drain(&mut alice_rx);
        let list = frames.iter().find(|f| f["type"] == "user_list").unwrap();
        assert_eq!(list["users"][0]["identity"], "bob");
        assert_eq!(list["users"][0]["last_message"], "later");
        assert_eq!(list["users"][0]["is_online"], false);
    }

    #[tokio::test]
    async fn test_route_to_recipient_unknown_to_store() {
        // given: bob has no nickname in the store and no presence record
        let store = Arc::new(InMemoryGateway::new());
        let f = fixture(store.clone());
        let (_alice, mut alice_rx) = connect(&f.state, "alice", "Alice").await;

        // when
        let outcome = f.router.route(command("alice", "bob", "anyone there?")).await.unwrap();

        // then: bob is listed for alice, offline, as "Unknown", with the preview
        assert!(outcome.persisted);
        let frames = drain(&mut alice_rx);
        let list = frames.iter().find(|f| f["type"] == "user_list").unwrap();
        assert_eq!(list["users"][0]["identity"], "bob");
        assert_eq!(list["users"][0]["display_name"], "Unknown");
        assert_eq!(list["users"][0]["is_online"], false);
        assert_eq!(list["users"][0]["last_message"], "anyone there?");

        // a nickname learned later replaces the placeholder
        store.add_user(id("bob"), "Bob");
        f.state.lock().await.presence.ensure(&id("bob"), "Bob");
        let names: Vec<String> = f
            .router
            .broadcaster
            .contact_list_for(&id("alice"))
            .await
            .into_iter()
            .map(|entry| entry.display_name)
            .collect();
        assert_eq!(names, vec!["Bob".to_string()]);
    }

    #[tokio::test]
    async fn test_persist_failure_still_delivers() {
        let mut store = MockPersistenceGateway::new();
        store
            .expect_save_message()
            .times(1)
            .returning(|_| Err(StoreError::Backend("disk full".into())));
        store.expect_nickname_of().returning(|_| Ok(None));
        store.expect_last_message_between().returning(|_, _| Ok(None));
        let f = fixture(Arc::new(store));
        let (_alice, mut alice_rx) = connect(&f.state, "alice", "Alice").await;
        let (_bob, mut bob_rx) = connect(&f.state, "bob", "Bob").await;

        let outcome = f.router.route(command("alice", "bob", "hi")).await.unwrap();

        assert!(!outcome.persisted);
        assert_eq!(chats(&drain(&mut alice_rx)).len(), 1);
        assert_eq!(chats(&drain(&mut bob_rx)).len(), 1);
    }

    #[tokio::test]
    async fn test_message_to_self_is_delivered_once() {
        let f = fixture(Arc::new(InMemoryGateway::new()));
        let (_alice, mut alice_rx) = connect(&f.state, "alice", "Alice").await;

        let outcome = f.router.route(command("alice", "alice", "note")).await.unwrap();

        assert_eq!(outcome.delivered.delivered, 1);
        assert_eq!(chats(&drain(&mut alice_rx)).len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_sender_name_falls_back() {
        let f = fixture(Arc::new(InMemoryGateway::new()));
        let (_bob, mut bob_rx) = connect(&f.state, "bob", "Bob").await;

        f.router.route(command("ghost", "bob", "boo")).await.unwrap();

        let frames = drain(&mut bob_rx);
        assert_eq!(chats(&frames)[0]["from_display_name"], "Unknown");
    }

    #[tokio::test]
    async fn test_typing_retarget_stops_previous() {
        let f = fixture(Arc::new(InMemoryGateway::new()));
        let (alice, _alice_rx) = connect(&f.state, "alice", "Alice").await;
        let (_bob, mut bob_rx) = connect(&f.state, "bob", "Bob").await;
        let (_carol, mut carol_rx) = connect(&f.state, "carol", "Carol").await;

        f.router
            .route_typing(&alice, TypingKind::TypingStart, &id("bob"))
            .await
            .unwrap();
        f.router
            .route_typing(&alice, TypingKind::TypingStart, &id("carol"))
            .await
            .unwrap();

        let bob_frames = drain(&mut bob_rx);
        let kinds: Vec<&str> = bob_frames.iter().map(|f| f["type"].as_str().unwrap()).collect();
        assert_eq!(kinds, vec!["typing_start", "typing_stop"]);
        assert_eq!(bob_frames[0]["display_name"], "Alice");
        let carol_frames = drain(&mut carol_rx);
        assert_eq!(carol_frames.len(), 1);
        assert_eq!(carol_frames[0]["type"], "typing_start");
    }

    #[tokio::test]
    async fn test_expire_typing_after_staleness() {
        // given: alice started typing to bob and went quiet
        let f = fixture(Arc::new(InMemoryGateway::new()));
        let (alice, _alice_rx) = connect(&f.state, "alice", "Alice").await;
        let (_bob, mut bob_rx) = connect(&f.state, "bob", "Bob").await;
        f.router
            .route_typing(&alice, TypingKind::TypingStart, &id("bob"))
            .await
            .unwrap();
        drain(&mut bob_rx);
        let staleness = Duration::from_secs(15);

        // when: within the threshold
        f.clock.advance(Duration::from_secs(10));
        assert_eq!(f.router.expire_typing(staleness).await, 0);

        // when: past the threshold
        f.clock.advance(Duration::from_secs(6));
        assert_eq!(f.router.expire_typing(staleness).await, 1);

        // then: record gone, bob told typing stopped
        assert_eq!(f.state.lock().await.typing.count(), 0);
        let frames = drain(&mut bob_rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "typing_stop");
        assert_eq!(frames[0]["from"], "alice");
    }

    #[tokio::test]
    async fn test_typing_from_closed_connection_is_ignored() {
        let f = fixture(Arc::new(InMemoryGateway::new()));
        let ghost = Session {
            identity: id("alice"),
            connection: ConnectionId::next(),
        };

        let report = f
            .router
            .route_typing(&ghost, TypingKind::TypingStart, &id("bob"))
            .await
            .unwrap();

        assert_eq!(report, FanoutReport::default());
        assert_eq!(f.state.lock().await.typing.count(), 0);
    }
}
