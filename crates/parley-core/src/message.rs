//! Chat message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::Identity;

/// A unique message identifier.
pub type MessageId = Uuid;

/// Generate a unique message ID.
#[must_use]
pub fn generate_message_id() -> MessageId {
    Uuid::new_v4()
}

/// A chat message as handed to the persistence gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message identifier.
    pub id: MessageId,
    /// Sender, taken from the session.
    pub from: Identity,
    /// Recipient.
    pub to: Identity,
    /// Message body.
    pub content: String,
    /// Server-assigned send time.
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a new message stamped at `sent_at`.
    #[must_use]
    pub fn new(from: Identity, to: Identity, content: impl Into<String>, sent_at: DateTime<Utc>) -> Self {
        Self {
            id: generate_message_id(),
            from,
            to,
            content: content.into(),
            sent_at,
        }
    }

    /// Preview of this message for contact lists.
    #[must_use]
    pub fn preview(&self) -> MessagePreview {
        MessagePreview {
            content: self.content.clone(),
            sent_at: self.sent_at,
        }
    }
}

/// Most recent message of a conversation, as shown in a contact list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePreview {
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: &str) -> Identity {
        Identity::new(value).unwrap()
    }

    #[test]
    fn test_message_ids_are_unique() {
        let now = Utc::now();
        let a = ChatMessage::new(id("alice"), id("bob"), "hi", now);
        let b = ChatMessage::new(id("alice"), id("bob"), "hi", now);
        assert_ne!(a.id, b.id);
    }
}
