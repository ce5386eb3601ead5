//! Frame types for the parley protocol.
//!
//! Inbound frames are what a client may send. Outbound frames are what the
//! server pushes to a connection's delivery queue.

use serde::{Deserialize, Serialize};

/// Typing signal kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypingKind {
    /// The sender started typing to the target.
    TypingStart,
    /// The sender stopped typing to the target.
    TypingStop,
}

impl TypingKind {
    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TypingKind::TypingStart => "typing_start",
            TypingKind::TypingStop => "typing_stop",
        }
    }

    /// Parse a wire name.
    #[must_use]
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "typing_start" => Some(TypingKind::TypingStart),
            "typing_stop" => Some(TypingKind::TypingStop),
            _ => None,
        }
    }
}

/// A chat frame as sent by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatFrame {
    /// Recipient identity.
    pub to: String,
    /// Message body.
    pub content: String,
}

/// A typing frame as sent by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingFrame {
    /// Start or stop.
    pub kind: TypingKind,
    /// Identity the sender is typing to.
    pub to: String,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Point-to-point chat message.
    Chat(ChatFrame),
    /// Typing indicator signal.
    Typing(TypingFrame),
}

impl InboundFrame {
    /// Build a chat frame.
    #[must_use]
    pub fn chat(to: impl Into<String>, content: impl Into<String>) -> Self {
        InboundFrame::Chat(ChatFrame {
            to: to.into(),
            content: content.into(),
        })
    }

    /// Build a typing frame.
    #[must_use]
    pub fn typing(kind: TypingKind, to: impl Into<String>) -> Self {
        InboundFrame::Typing(TypingFrame {
            kind,
            to: to.into(),
        })
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::Chat(_) => "chat",
            InboundFrame::Typing(t) => t.kind.as_str(),
        }
    }
}

/// Loose shape of any inbound JSON object, validated by the codec.
///
/// Unknown fields (including client-supplied `from` or `sent_at`) are ignored.
#[derive(Debug, Deserialize)]
pub(crate) struct RawInbound {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub to: Option<String>,
    pub content: Option<String>,
}

/// Chat delivery, sent to both participants' connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatDelivery {
    /// Sender identity.
    pub from: String,
    /// Recipient identity.
    pub to: String,
    /// Message body.
    pub content: String,
    /// Server timestamp, RFC 3339.
    pub sent_at: String,
    /// Sender display name at the time of routing.
    pub from_display_name: String,
}

/// Typing pulse, sent to the target's connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingPulse {
    /// Start or stop.
    #[serde(rename = "type")]
    pub kind: TypingKind,
    /// Typing identity.
    pub from: String,
    /// Target identity.
    pub to: String,
    /// Display name of the typing identity.
    pub display_name: String,
}

/// One row of a contact list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactEntry {
    pub identity: String,
    pub display_name: String,
    pub last_message: Option<String>,
    /// RFC 3339, `null` when the pair never exchanged a message.
    pub last_message_time: Option<String>,
    pub is_online: bool,
}

/// Contact list for one viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "user_list")]
pub struct UserList {
    pub users: Vec<ContactEntry>,
}

/// Any frame the server pushes to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    Chat(ChatDelivery),
    Typing(TypingPulse),
    UserList(UserList),
}

impl OutboundFrame {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundFrame::Chat(_) => "chat",
            OutboundFrame::Typing(_) => "typing",
            OutboundFrame::UserList(_) => "user_list",
        }
    }
}

impl From<ChatDelivery> for OutboundFrame {
    fn from(frame: ChatDelivery) -> Self {
        OutboundFrame::Chat(frame)
    }
}

impl From<TypingPulse> for OutboundFrame {
    fn from(frame: TypingPulse) -> Self {
        OutboundFrame::Typing(frame)
    }
}

impl From<UserList> for OutboundFrame {
    fn from(frame: UserList) -> Self {
        OutboundFrame::UserList(frame)
    }
}
