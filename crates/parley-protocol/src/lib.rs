//! # parley-protocol
//!
//! Wire frames exchanged between parley clients and the server.
//!
//! Every frame is a JSON object carried in a single WebSocket text message.
//!
//! ## Inbound (client to server)
//!
//! - chat: `{"to": "...", "content": "..."}`
//! - typing: `{"type": "typing_start" | "typing_stop", "to": "..."}`
//!
//! ## Outbound (server to client)
//!
//! - chat delivery: `{"from", "to", "content", "sent_at", "from_display_name"}`
//! - typing pulse: `{"type", "from", "to", "display_name"}`
//! - contact list: `{"type": "user_list", "users": [...]}`
//!
//! Sender identity, timestamps and display names are always filled in by the
//! server. Anything the client puts in those fields is ignored.
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, InboundFrame};
//!
//! let frame = codec::decode(br#"{"to":"bob","content":"hi"}"#).unwrap();
//! assert!(matches!(frame, InboundFrame::Chat(_)));
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, FrameCodec, ProtocolError, MAX_FRAME_SIZE};
pub use frames::{
    ChatDelivery, ChatFrame, ContactEntry, InboundFrame, OutboundFrame, TypingFrame, TypingKind,
    TypingPulse, UserList,
};
