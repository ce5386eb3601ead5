//! Persistence gateway.
//!
//! The engine needs only a handful of store capabilities: append a chat
//! message, read the latest message or a page of history of a conversation,
//! and resolve nicknames.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::trace;

use crate::identity::Identity;
use crate::message::{ChatMessage, MessagePreview};

/// Store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backing store rejected or failed the operation.
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Store unavailable")]
    Unavailable,
}

/// Store operations the engine depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Durably append a chat message.
    async fn save_message(&self, message: &ChatMessage) -> Result<(), StoreError>;

    /// Most recent message exchanged between `a` and `b`, in either direction.
    async fn last_message_between(
        &self,
        a: &Identity,
        b: &Identity,
    ) -> Result<Option<MessagePreview>, StoreError>;

    /// One page of the conversation between `a` and `b`.
    ///
    /// Pages count back from the newest message: `offset` skips that many of
    /// the most recent messages, then up to `limit` older ones are returned,
    /// oldest first.
    async fn messages_between(
        &self,
        a: &Identity,
        b: &Identity,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ChatMessage>, StoreError>;

    /// Nickname registered for `identity`.
    async fn nickname_of(&self, identity: &Identity) -> Result<Option<String>, StoreError>;

    /// Every registered identity with its nickname.
    async fn known_identities(&self) -> Result<Vec<(Identity, String)>, StoreError>;
}

type ConversationKey = (Identity, Identity);

fn conversation_key(a: &Identity, b: &Identity) -> ConversationKey {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

/// In-memory gateway for tests, demos and single-node deployments.
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    users: DashMap<Identity, String>,
    conversations: DashMap<ConversationKey, Vec<ChatMessage>>,
}

impl InMemoryGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user (the registration collaborator's hook).
    pub fn add_user(&self, identity: Identity, nickname: impl Into<String>) {
        self.users.insert(identity, nickname.into());
    }

    /// Full conversation between `a` and `b`, in save order.
    #[must_use]
    pub fn conversation(&self, a: &Identity, b: &Identity) -> Vec<ChatMessage> {
        self.conversations
            .get(&conversation_key(a, b))
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    /// Total number of stored messages.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.conversations.iter().map(|entry| entry.value().len()).sum()
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn save_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        trace!(id = %message.id, from = %message.from, to = %message.to, "Saving message");
        self.conversations
            .entry(conversation_key(&message.from, &message.to))
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn last_message_between(
        &self,
        a: &Identity,
        b: &Identity,
    ) -> Result<Option<MessagePreview>, StoreError> {
        Ok(self
            .conversations
            .get(&conversation_key(a, b))
            .and_then(|messages| messages.iter().max_by_key(|m| m.sent_at).map(ChatMessage::preview)))
    }

    async fn messages_between(
        &self,
        a: &Identity,
        b: &Identity,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let mut messages = self.conversation(a, b);
        messages.sort_by_key(|m| m.sent_at);
        let mut page: Vec<ChatMessage> = messages.into_iter().rev().skip(offset).take(limit).collect();
        page.reverse();
        Ok(page)
    }

    async fn nickname_of(&self, identity: &Identity) -> Result<Option<String>, StoreError> {
        Ok(self.users.get(identity).map(|nickname| nickname.clone()))
    }

    async fn known_identities(&self) -> Result<Vec<(Identity, String)>, StoreError> {
        let mut users: Vec<(Identity, String)> = self
            .users
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        users.sort();
        Ok(users)
    }
}
