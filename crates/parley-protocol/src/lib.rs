//! # parley-protocol
//!
//! Wire event definitions for the parley chat relay.
//!
//! This crate defines the JSON events exchanged between chat clients and
//! the relay server, plus the hydrated payload types they carry.
//!
//! ## Event families
//!
//! - `room:*` - Membership, creation, and room search
//! - `message:*` - Send, edit, delete, read receipts, private messages
//! - `typing:*` - Typing indicator start/stop
//! - `user:*` - Presence and status changes
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, ClientEvent};
//!
//! let event = codec::decode(r#"{"event":"room:join","data":{"roomId":"general"}}"#).unwrap();
//! assert!(matches!(event, ClientEvent::JoinRoom { .. }));
//! ```

pub mod codec;
pub mod events;
pub mod types;

pub use codec::{decode, encode, CodecError};
pub use events::{ClientEvent, ServerEvent};
pub use types::{
    Attachment, MessageId, MessageKind, PresenceStatus, PrincipalId, RoomId, RoomSummary,
    UserSummary, WireMessage,
};
