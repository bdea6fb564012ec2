//! Message ledger.
//!
//! Append-only store of messages per room. Messages are mutated in place
//! for edits, read receipts, and soft deletes, and never physically
//! removed. Soft-deleted messages are excluded from every read path
//! (listing, search, unread counts) but retained in storage.

use crate::directory::Principal;
use crate::error::RouterError;
use crate::time::now_millis;
use dashmap::DashMap;
use parley_protocol::{Attachment, MessageId, MessageKind, PrincipalId, RoomId, WireMessage};
use std::collections::HashSet;
use uuid::Uuid;

/// A stored message.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: MessageId,
    pub sender_id: PrincipalId,
    pub room_id: RoomId,
    /// Message text, or the file name for file/image kinds.
    pub content: String,
    pub kind: MessageKind,
    pub attachment: Option<Attachment>,
    pub created_at: u64,
    pub edited: bool,
    pub edited_at: Option<u64>,
    pub deleted: bool,
    /// Principals who have read this message. The sender always has.
    pub read_by: HashSet<PrincipalId>,
}

impl StoredMessage {
    /// Hydrate with the sender's display fields for delivery.
    #[must_use]
    pub fn hydrate(&self, sender: &Principal) -> WireMessage {
        WireMessage {
            id: self.id.clone(),
            room_id: self.room_id.clone(),
            content: self.content.clone(),
            kind: self.kind,
            attachment: self.attachment.clone(),
            sender_id: self.sender_id.clone(),
            sender_name: sender.username.clone(),
            sender_avatar: sender.avatar.clone(),
            created_at: self.created_at,
            edited: self.edited,
            edited_at: self.edited_at,
        }
    }
}

/// Per-room message-type counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoomMessageStats {
    pub total: usize,
    pub text: usize,
    pub file: usize,
    pub image: usize,
}

/// Append-only store of messages, indexed per room.
#[derive(Debug, Default)]
pub struct MessageLedger {
    messages: DashMap<MessageId, StoredMessage>,
    /// Message ids per room in append order.
    room_index: DashMap<RoomId, Vec<MessageId>>,
}

impl MessageLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to a room.
    pub fn append(
        &self,
        sender_id: &str,
        room_id: &str,
        content: &str,
        kind: MessageKind,
        attachment: Option<Attachment>,
    ) -> StoredMessage {
        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            room_id: room_id.to_string(),
            content: content.to_string(),
            kind,
            attachment,
            created_at: now_millis(),
            edited: false,
            edited_at: None,
            deleted: false,
            read_by: HashSet::from([sender_id.to_string()]),
        };

        self.room_index
            .entry(room_id.to_string())
            .or_default()
            .push(message.id.clone());
        self.messages.insert(message.id.clone(), message.clone());
        message
    }

    /// Look up a message by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<StoredMessage> {
        self.messages.get(id).map(|m| m.clone())
    }

    /// Messages in a room, newest first, paginated, excluding deleted.
    #[must_use]
    pub fn list_by_room(&self, room_id: &str, limit: usize, offset: usize) -> Vec<StoredMessage> {
        let Some(index) = self.room_index.get(room_id) else {
            return Vec::new();
        };
        index
            .iter()
            .rev()
            .filter_map(|id| self.messages.get(id).map(|m| m.clone()))
            .filter(|m| !m.deleted)
            .skip(offset)
            .take(limit)
            .collect()
    }

    /// Record a read receipt. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `MessageNotFound` if the message does not exist.
    pub fn mark_read(
        &self,
        message_id: &str,
        principal_id: &str,
    ) -> Result<StoredMessage, RouterError> {
        let mut message = self
            .messages
            .get_mut(message_id)
            .ok_or_else(|| RouterError::MessageNotFound(message_id.to_string()))?;
        message.read_by.insert(principal_id.to_string());
        Ok(message.clone())
    }

    /// Mark every not-yet-read message in a room as read by a principal.
    ///
    /// Returns the number of messages newly marked. The caller's own
    /// messages are not excluded here; only `unread_count` excludes them.
    pub fn mark_room_read(&self, room_id: &str, principal_id: &str) -> usize {
        let Some(index) = self.room_index.get(room_id) else {
            return 0;
        };
        let mut marked = 0;
        for id in index.iter() {
            if let Some(mut message) = self.messages.get_mut(id) {
                if message.read_by.insert(principal_id.to_string()) {
                    marked += 1;
                }
            }
        }
        marked
    }

    /// Count of non-deleted messages in a room the principal has not
    /// read, excluding their own.
    #[must_use]
    pub fn unread_count(&self, room_id: &str, principal_id: &str) -> usize {
        let Some(index) = self.room_index.get(room_id) else {
            return 0;
        };
        index
            .iter()
            .filter_map(|id| self.messages.get(id))
            .filter(|m| {
                !m.deleted && m.sender_id != principal_id && !m.read_by.contains(principal_id)
            })
            .count()
    }

    /// Replace a message's content.
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` unless the requester is the original sender,
    /// `MessageNotFound` if the message does not exist.
    pub fn edit(
        &self,
        message_id: &str,
        new_content: &str,
        requester_id: &str,
    ) -> Result<StoredMessage, RouterError> {
        let mut message = self
            .messages
            .get_mut(message_id)
            .ok_or_else(|| RouterError::MessageNotFound(message_id.to_string()))?;
        if message.sender_id != requester_id {
            return Err(RouterError::Forbidden("only the sender may edit a message"));
        }
        message.content = new_content.to_string();
        message.edited = true;
        message.edited_at = Some(now_millis());
        Ok(message.clone())
    }

    /// Soft-delete a message.
    ///
    /// System messages may be deleted by any caller; everything else only
    /// by its sender. Deleting an already-deleted message succeeds and
    /// observes the same state.
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` on an ownership violation, `MessageNotFound`
    /// if the message does not exist.
    pub fn soft_delete(
        &self,
        message_id: &str,
        requester_id: &str,
    ) -> Result<StoredMessage, RouterError> {
        let mut message = self
            .messages
            .get_mut(message_id)
            .ok_or_else(|| RouterError::MessageNotFound(message_id.to_string()))?;
        if message.sender_id != requester_id && message.kind != MessageKind::System {
            return Err(RouterError::Forbidden(
                "only the sender may delete a message",
            ));
        }
        message.deleted = true;
        Ok(message.clone())
    }

    /// Case-insensitive substring search over a room's messages,
    /// newest first, excluding deleted.
    #[must_use]
    pub fn search(&self, room_id: &str, query: &str) -> Vec<StoredMessage> {
        let needle = query.to_lowercase();
        let Some(index) = self.room_index.get(room_id) else {
            return Vec::new();
        };
        index
            .iter()
            .rev()
            .filter_map(|id| self.messages.get(id).map(|m| m.clone()))
            .filter(|m| !m.deleted && m.content.to_lowercase().contains(&needle))
            .collect()
    }

    /// Per-room message-type counters, excluding deleted.
    #[must_use]
    pub fn room_stats(&self, room_id: &str) -> RoomMessageStats {
        let Some(index) = self.room_index.get(room_id) else {
            return RoomMessageStats::default();
        };
        let mut stats = RoomMessageStats::default();
        for id in index.iter() {
            let Some(message) = self.messages.get(id) else {
                continue;
            };
            if message.deleted {
                continue;
            }
            stats.total += 1;
            match message.kind {
                MessageKind::Text => stats.text += 1,
                MessageKind::File => stats.file += 1,
                MessageKind::Image => stats.image += 1,
                MessageKind::System => {}
            }
        }
        stats
    }

    /// Total number of stored messages, including deleted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the ledger is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
