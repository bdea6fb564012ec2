//! Payload types carried by wire events.
//!
//! These are the hydrated shapes clients see: messages include sender
//! display fields so the client never has to join against a user list.

use serde::{Deserialize, Serialize};

/// Stable identifier of a registered user.
pub type PrincipalId = String;

/// Identifier of a room.
pub type RoomId = String;

/// Identifier of a message.
pub type MessageId = String;

/// Online/offline state of a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    /// Parse a status string from a `user:status` event.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

/// The kind of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    File,
    Image,
    System,
}

/// An already-encoded file payload attached to a message.
///
/// Upload mechanics live outside the relay; by the time an attachment
/// reaches this protocol it is text-encoded data plus metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Encoded payload (e.g. a data URL produced by the uploader).
    pub data: String,
    /// MIME type.
    pub mime: String,
    /// Payload size in bytes.
    pub size: u64,
}

/// Public view of a principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: PrincipalId,
    pub username: String,
    pub avatar: String,
    pub status: PresenceStatus,
    /// Last activity, milliseconds since the UNIX epoch.
    pub last_seen: u64,
}

/// Public view of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    pub is_private: bool,
    pub created_by: PrincipalId,
    pub member_count: usize,
    /// Creation time, milliseconds since the UNIX epoch.
    pub created_at: u64,
    /// Last membership change, milliseconds since the UNIX epoch.
    pub updated_at: u64,
}

/// A fully-hydrated message as delivered to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub content: String,
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    pub sender_id: PrincipalId,
    pub sender_name: String,
    pub sender_avatar: String,
    /// Creation time, milliseconds since the UNIX epoch.
    pub created_at: u64,
    pub edited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<u64>,
}
