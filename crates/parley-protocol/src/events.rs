//! Event types for the parley wire protocol.
//!
//! Every event is a JSON object `{"event": <name>, "data": {...}}`.
//! Inbound events ([`ClientEvent`]) each correspond to one router
//! transition; outbound events ([`ServerEvent`]) are addressed either
//! to a single connection or to every connection subscribed to a room.

use crate::types::{
    Attachment, MessageId, MessageKind, PresenceStatus, PrincipalId, RoomId, RoomSummary,
    UserSummary, WireMessage,
};
use serde::{Deserialize, Serialize};

/// An event sent by a client to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Join a room and receive its recent history.
    #[serde(rename = "room:join", rename_all = "camelCase")]
    JoinRoom { room_id: RoomId },

    /// Leave a room.
    #[serde(rename = "room:leave", rename_all = "camelCase")]
    LeaveRoom { room_id: RoomId },

    /// Send a message to a room.
    #[serde(rename = "message:send", rename_all = "camelCase")]
    SendMessage {
        room_id: RoomId,
        content: String,
        #[serde(default)]
        kind: MessageKind,
        #[serde(default)]
        attachment: Option<Attachment>,
    },

    /// Edit a previously sent message.
    #[serde(rename = "message:edit", rename_all = "camelCase")]
    EditMessage {
        message_id: MessageId,
        new_content: String,
    },

    /// Soft-delete a message.
    #[serde(rename = "message:delete", rename_all = "camelCase")]
    DeleteMessage { message_id: MessageId },

    /// Record a read receipt for a message.
    #[serde(rename = "message:read", rename_all = "camelCase")]
    MarkRead {
        message_id: MessageId,
        room_id: RoomId,
    },

    /// Start the typing indicator in a room.
    #[serde(rename = "typing:start", rename_all = "camelCase")]
    StartTyping { room_id: RoomId },

    /// Stop the typing indicator in a room.
    #[serde(rename = "typing:stop", rename_all = "camelCase")]
    StopTyping { room_id: RoomId },

    /// Create a room, optionally private, with an initial member list.
    #[serde(rename = "room:create", rename_all = "camelCase")]
    CreateRoom {
        name: String,
        #[serde(default)]
        is_private: bool,
        #[serde(default)]
        members: Vec<PrincipalId>,
    },

    /// Send a direct message to another principal.
    #[serde(rename = "message:private", rename_all = "camelCase")]
    PrivateMessage {
        recipient_id: PrincipalId,
        content: String,
        #[serde(default)]
        kind: MessageKind,
        #[serde(default)]
        attachment: Option<Attachment>,
    },

    /// Share an already-uploaded file into a room.
    #[serde(rename = "file:share", rename_all = "camelCase")]
    ShareFile {
        room_id: RoomId,
        file_data: String,
        file_name: String,
        file_type: String,
        file_size: u64,
    },

    /// Update the caller's presence status.
    #[serde(rename = "user:status", rename_all = "camelCase")]
    UpdateStatus { status: String },

    /// Search rooms by name substring.
    #[serde(rename = "room:search", rename_all = "camelCase")]
    SearchRooms { query: String },

    /// Search a room's messages by content substring.
    #[serde(rename = "message:search", rename_all = "camelCase")]
    SearchMessages { room_id: RoomId, query: String },
}

/// An event sent by the relay to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// A principal came online (broadcast to all connections).
    #[serde(rename = "user:online", rename_all = "camelCase")]
    UserOnline {
        user_id: PrincipalId,
        username: String,
        avatar: String,
    },

    /// A principal's last connection closed (broadcast to all).
    #[serde(rename = "user:offline", rename_all = "camelCase")]
    UserOffline {
        user_id: PrincipalId,
        username: String,
    },

    /// Snapshot of currently-online principals, sent on attach.
    #[serde(rename = "users:online", rename_all = "camelCase")]
    OnlineUsers { users: Vec<UserSummary> },

    /// The receiving connection was subscribed to a room.
    #[serde(rename = "room:joined", rename_all = "camelCase")]
    RoomJoined { room: RoomSummary },

    /// Recent history of a room, oldest first.
    #[serde(rename = "room:messages", rename_all = "camelCase")]
    RoomMessages {
        room_id: RoomId,
        messages: Vec<WireMessage>,
    },

    /// A new message in a subscribed room.
    #[serde(rename = "message:received", rename_all = "camelCase")]
    MessageReceived {
        room_id: RoomId,
        message: WireMessage,
    },

    /// A message in a subscribed room was edited.
    #[serde(rename = "message:edited", rename_all = "camelCase")]
    MessageEdited {
        message_id: MessageId,
        room_id: RoomId,
        new_content: String,
        edited_by: PrincipalId,
        edited_at: u64,
    },

    /// A message in a subscribed room was deleted.
    #[serde(rename = "message:deleted", rename_all = "camelCase")]
    MessageDeleted {
        message_id: MessageId,
        room_id: RoomId,
        deleted_by: PrincipalId,
    },

    /// Someone read a message you sent (delivered to the sender only).
    #[serde(rename = "message:read", rename_all = "camelCase")]
    MessageRead {
        message_id: MessageId,
        read_by: PrincipalId,
        read_by_username: String,
    },

    /// Typing snapshot after someone started typing.
    #[serde(rename = "typing:started", rename_all = "camelCase")]
    TypingStarted {
        room_id: RoomId,
        user_id: PrincipalId,
        username: String,
        typing_users: Vec<PrincipalId>,
    },

    /// Typing snapshot after someone stopped typing.
    #[serde(rename = "typing:stopped", rename_all = "camelCase")]
    TypingStopped {
        room_id: RoomId,
        user_id: PrincipalId,
        username: String,
        typing_users: Vec<PrincipalId>,
    },

    /// Acknowledgment of a `room:create` to the creator.
    #[serde(rename = "room:created", rename_all = "camelCase")]
    RoomCreated { room: RoomSummary },

    /// Invitation to a newly created room (online members only).
    #[serde(rename = "room:invited", rename_all = "camelCase")]
    RoomInvited {
        room: RoomSummary,
        invited_by: PrincipalId,
        invited_by_username: String,
    },

    /// Another principal joined a subscribed room.
    #[serde(rename = "user:joined", rename_all = "camelCase")]
    UserJoined {
        room_id: RoomId,
        user_id: PrincipalId,
        username: String,
        avatar: String,
    },

    /// Another principal left a subscribed room.
    #[serde(rename = "user:left", rename_all = "camelCase")]
    UserLeft {
        room_id: RoomId,
        user_id: PrincipalId,
        username: String,
    },

    /// A private message addressed to the receiving connection.
    #[serde(rename = "message:private", rename_all = "camelCase")]
    PrivateMessageReceived {
        room_id: RoomId,
        message: WireMessage,
    },

    /// Acknowledgment of a private send to the sender.
    #[serde(rename = "message:sent", rename_all = "camelCase")]
    MessageSent {
        message_id: MessageId,
        room_id: RoomId,
    },

    /// A file was shared into a subscribed room.
    #[serde(rename = "file:shared", rename_all = "camelCase")]
    FileShared {
        room_id: RoomId,
        message: WireMessage,
    },

    /// A principal changed status (broadcast to all).
    #[serde(rename = "user:status", rename_all = "camelCase")]
    UserStatus {
        user_id: PrincipalId,
        username: String,
        status: PresenceStatus,
        last_seen: u64,
    },

    /// Results of a room search (requester only).
    #[serde(rename = "room:search:results", rename_all = "camelCase")]
    RoomSearchResults {
        query: String,
        rooms: Vec<RoomSummary>,
    },

    /// Results of a message search (requester only).
    #[serde(rename = "message:search:results", rename_all = "camelCase")]
    MessageSearchResults {
        room_id: RoomId,
        query: String,
        messages: Vec<WireMessage>,
    },

    /// A rejected transition, reported to the originating connection only.
    #[serde(rename = "error", rename_all = "camelCase")]
    Error { message: String },
}
