//! Connection router for parley.
//!
//! The router owns the mapping from principal to live connections and
//! from room to subscribed connections, dispatches every inbound client
//! event, and computes the fan-out set for each outbound event. The
//! directory, registry, ledger, and typing tracker are injected and
//! remain the source of truth for their entities; the router only
//! indexes connections against them.
//!
//! Fan-out to a room holds that room's connection-set entry exclusively
//! for the duration of the send loop, so all subscribers observe a
//! room's events in the same order. Sends are non-blocking pushes onto
//! per-connection unbounded queues; no I/O happens under the lock.

use crate::directory::PrincipalDirectory;
use crate::error::RouterError;
use crate::ledger::{MessageLedger, StoredMessage};
use crate::registry::RoomRegistry;
use crate::typing::TypingTracker;
use dashmap::{DashMap, DashSet};
use parley_protocol::{
    ClientEvent, MessageKind, PresenceStatus, PrincipalId, RoomId, ServerEvent, WireMessage,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Identifier of one live transport session.
pub type ConnectionId = String;

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Rooms every connection is subscribed to on attach.
    pub default_rooms: Vec<RoomId>,
    /// Number of history messages returned on room join.
    pub history_page_size: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_rooms: vec![
                "global".to_string(),
                "general".to_string(),
                "random".to_string(),
                "help".to_string(),
            ],
            history_page_size: 50,
        }
    }
}

/// One live connection: owning principal plus its delivery queue.
struct ConnectionHandle {
    principal_id: PrincipalId,
    sender: mpsc::UnboundedSender<ServerEvent>,
}

/// The connection router.
pub struct Router {
    directory: Arc<PrincipalDirectory>,
    rooms: Arc<RoomRegistry>,
    ledger: Arc<MessageLedger>,
    typing: Arc<TypingTracker>,
    /// All live connections.
    connections: DashMap<ConnectionId, ConnectionHandle>,
    /// Connections owned by each principal (multi-device).
    principal_connections: DashMap<PrincipalId, DashSet<ConnectionId>>,
    /// Connections subscribed to each room.
    room_connections: DashMap<RoomId, DashSet<ConnectionId>>,
    /// Rooms each connection is subscribed to.
    subscriptions: DashMap<ConnectionId, DashSet<RoomId>>,
    config: RouterConfig,
}

impl Router {
    /// Create a router over injected services with default configuration.
    #[must_use]
    pub fn new(
        directory: Arc<PrincipalDirectory>,
        rooms: Arc<RoomRegistry>,
        ledger: Arc<MessageLedger>,
        typing: Arc<TypingTracker>,
    ) -> Self {
        Self::with_config(directory, rooms, ledger, typing, RouterConfig::default())
    }

    /// Create a router with custom configuration.
    #[must_use]
    pub fn with_config(
        directory: Arc<PrincipalDirectory>,
        rooms: Arc<RoomRegistry>,
        ledger: Arc<MessageLedger>,
        typing: Arc<TypingTracker>,
        config: RouterConfig,
    ) -> Self {
        Self {
            directory,
            rooms,
            ledger,
            typing,
            connections: DashMap::new(),
            principal_connections: DashMap::new(),
            room_connections: DashMap::new(),
            subscriptions: DashMap::new(),
            config,
        }
    }

    /// Seed the configured default rooms if they do not exist yet.
    ///
    /// Called once at process bootstrap.
    pub fn seed_default_rooms(&self) {
        for room_id in &self.config.default_rooms {
            if !self.rooms.exists(room_id) {
                // Fixed ids; a failure here means an empty configured name.
                if let Err(e) = self
                    .rooms
                    .create_room_with_id(room_id, room_id, "system", false, &[])
                {
                    warn!(room = %room_id, error = %e, "Skipping default room");
                }
            }
        }
    }

    /// Prune typing entries idle longer than `ttl` and broadcast the
    /// refreshed snapshots.
    ///
    /// Driven by a periodic server task; covers clients that never send
    /// an explicit stop event.
    pub fn sweep_typing(&self, ttl: std::time::Duration) {
        for pruned in self.typing.prune_stale(ttl) {
            for principal_id in &pruned.removed {
                let username = self
                    .directory
                    .lookup_by_id(principal_id)
                    .map_or_else(|| principal_id.clone(), |p| p.username);
                self.multicast_room(
                    &pruned.room_id,
                    &ServerEvent::TypingStopped {
                        room_id: pruned.room_id.clone(),
                        user_id: principal_id.clone(),
                        username,
                        typing_users: pruned.remaining.clone(),
                    },
                    None,
                );
            }
        }
    }

    /// Router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            connection_count: self.connections.len(),
            online_principal_count: self.principal_connections.len(),
            indexed_room_count: self.room_connections.len(),
        }
    }

    /// Attach an authenticated principal's new connection.
    ///
    /// Registers presence, auto-subscribes the connection to the default
    /// rooms, broadcasts `user:online`, and queues the online-user
    /// snapshot for the new connection.
    ///
    /// # Errors
    ///
    /// Returns `PrincipalNotFound` if the principal is not registered.
    pub fn attach(
        &self,
        principal_id: &str,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> Result<ConnectionId, RouterError> {
        let principal = self
            .directory
            .lookup_by_id(principal_id)
            .ok_or_else(|| RouterError::PrincipalNotFound(principal_id.to_string()))?;

        let connection_id = format!("conn_{}", Uuid::new_v4().simple());
        self.connections.insert(
            connection_id.clone(),
            ConnectionHandle {
                principal_id: principal.id.clone(),
                sender,
            },
        );
        self.principal_connections
            .entry(principal.id.clone())
            .or_default()
            .insert(connection_id.clone());

        self.directory.set_online(&principal.id);
        debug!(connection = %connection_id, principal = %principal.id, "Attached");

        self.broadcast_all(&ServerEvent::UserOnline {
            user_id: principal.id.clone(),
            username: principal.username.clone(),
            avatar: principal.avatar.clone(),
        });
        self.unicast(
            &connection_id,
            &ServerEvent::OnlineUsers {
                users: self.directory.list_online(),
            },
        );

        for room_id in self.config.default_rooms.clone() {
            if !self.rooms.exists(&room_id) {
                continue;
            }
            if let Ok(room) = self.rooms.add_member(&room_id, &principal.id) {
                self.index_connection(&connection_id, &room_id);
                self.unicast(
                    &connection_id,
                    &ServerEvent::RoomJoined {
                        room: room.summary(),
                    },
                );
            }
        }

        Ok(connection_id)
    }

    /// Tear down a connection on transport close.
    ///
    /// Deterministically unwinds all three indices: presence, room
    /// subscriptions, and (when this was the principal's last live
    /// connection) typing entries.
    pub fn detach(&self, connection_id: &str) {
        let Some((_, handle)) = self.connections.remove(connection_id) else {
            return;
        };
        let principal_id = handle.principal_id;

        // Room subscriptions.
        let subscribed: Vec<RoomId> = self
            .subscriptions
            .remove(connection_id)
            .map(|(_, rooms)| rooms.into_iter().collect())
            .unwrap_or_default();
        for room_id in &subscribed {
            self.deindex_connection(connection_id, room_id);
        }

        // Presence.
        let mut last_connection = false;
        if let Some(conns) = self.principal_connections.get_mut(&principal_id) {
            conns.remove(connection_id);
            if conns.is_empty() {
                last_connection = true;
            }
        }
        if last_connection {
            self.principal_connections.remove(&principal_id);
            let offline = self.directory.set_offline(&principal_id);
            if let Some(principal) = offline {
                self.broadcast_all(&ServerEvent::UserOffline {
                    user_id: principal.id.clone(),
                    username: principal.username.clone(),
                });

                // Typing entries would otherwise go stale forever.
                for room_id in self.typing.clear_principal(&principal.id, &subscribed) {
                    let snapshot = self.typing.snapshot(&room_id);
                    self.multicast_room(
                        &room_id,
                        &ServerEvent::TypingStopped {
                            room_id: room_id.clone(),
                            user_id: principal.id.clone(),
                            username: principal.username.clone(),
                            typing_users: snapshot,
                        },
                        None,
                    );
                }
            }
        }

        debug!(connection = %connection_id, principal = %principal_id, "Detached");
    }

    /// Process one inbound event from a connection.
    ///
    /// A rejected transition is reported as a single `error` event to the
    /// originating connection only; it never leaves partial state behind.
    pub fn dispatch(&self, connection_id: &str, event: ClientEvent) {
        if let Err(err) = self.handle(connection_id, event) {
            warn!(connection = %connection_id, error = %err, "Rejected event");
            self.unicast(connection_id, &err.to_event());
        }
    }

    fn handle(&self, connection_id: &str, event: ClientEvent) -> Result<(), RouterError> {
        match event {
            ClientEvent::JoinRoom { room_id } => self.join_room(connection_id, &room_id),
            ClientEvent::LeaveRoom { room_id } => self.leave_room(connection_id, &room_id),
            ClientEvent::SendMessage {
                room_id,
                content,
                kind,
                attachment,
            } => self.send_message(connection_id, &room_id, &content, kind, attachment),
            ClientEvent::EditMessage {
                message_id,
                new_content,
            } => self.edit_message(connection_id, &message_id, &new_content),
            ClientEvent::DeleteMessage { message_id } => {
                self.delete_message(connection_id, &message_id)
            }
            ClientEvent::MarkRead { message_id, .. } => self.mark_read(connection_id, &message_id),
            ClientEvent::StartTyping { room_id } => self.set_typing(connection_id, &room_id, true),
            ClientEvent::StopTyping { room_id } => self.set_typing(connection_id, &room_id, false),
            ClientEvent::CreateRoom {
                name,
                is_private,
                members,
            } => self.create_room(connection_id, &name, is_private, &members),
            ClientEvent::PrivateMessage {
                recipient_id,
                content,
                kind,
                attachment,
            } => self.private_message(connection_id, &recipient_id, &content, kind, attachment),
            ClientEvent::ShareFile {
                room_id,
                file_data,
                file_name,
                file_type,
                file_size,
            } => self.share_file(
                connection_id,
                &room_id,
                &file_data,
                &file_name,
                &file_type,
                file_size,
            ),
            ClientEvent::UpdateStatus { status } => self.update_status(connection_id, &status),
            ClientEvent::SearchRooms { query } => self.search_rooms(connection_id, &query),
            ClientEvent::SearchMessages { room_id, query } => {
                self.search_messages(connection_id, &room_id, &query)
            }
        }
    }

    fn join_room(&self, connection_id: &str, room_id: &str) -> Result<(), RouterError> {
        let principal = self.principal_of(connection_id)?;
        let room = self
            .rooms
            .get(room_id)
            .ok_or_else(|| RouterError::RoomNotFound(room_id.to_string()))?;
        if !room.allows(&principal.id) {
            return Err(RouterError::AccessDenied);
        }

        self.rooms.add_member(room_id, &principal.id)?;
        self.index_connection(connection_id, room_id);

        // Most recent page, flipped oldest-first for display.
        let mut history: Vec<WireMessage> = self
            .ledger
            .list_by_room(room_id, self.config.history_page_size, 0)
            .iter()
            .map(|m| self.hydrate(m))
            .collect();
        history.reverse();
        self.unicast(
            connection_id,
            &ServerEvent::RoomMessages {
                room_id: room_id.to_string(),
                messages: history,
            },
        );

        self.multicast_room(
            room_id,
            &ServerEvent::UserJoined {
                room_id: room_id.to_string(),
                user_id: principal.id.clone(),
                username: principal.username.clone(),
                avatar: principal.avatar.clone(),
            },
            Some(connection_id),
        );
        Ok(())
    }

    fn leave_room(&self, connection_id: &str, room_id: &str) -> Result<(), RouterError> {
        let principal = self.principal_of(connection_id)?;

        // Idempotent: an absent room or membership is not an error.
        let _ = self.rooms.remove_member(room_id, &principal.id);
        self.deindex_connection(connection_id, room_id);
        if let Some(rooms) = self.subscriptions.get(connection_id) {
            rooms.remove(room_id);
        }

        self.multicast_room(
            room_id,
            &ServerEvent::UserLeft {
                room_id: room_id.to_string(),
                user_id: principal.id.clone(),
                username: principal.username.clone(),
            },
            Some(connection_id),
        );
        Ok(())
    }

    fn send_message(
        &self,
        connection_id: &str,
        room_id: &str,
        content: &str,
        kind: MessageKind,
        attachment: Option<parley_protocol::Attachment>,
    ) -> Result<(), RouterError> {
        let principal = self.principal_of(connection_id)?;
        if content.is_empty() || room_id.is_empty() {
            return Err(RouterError::Validation(
                "Message content and room ID are required",
            ));
        }
        if !self.rooms.exists(room_id) {
            return Err(RouterError::RoomNotFound(room_id.to_string()));
        }

        let message = self
            .ledger
            .append(&principal.id, room_id, content, kind, attachment);
        self.multicast_room(
            room_id,
            &ServerEvent::MessageReceived {
                room_id: room_id.to_string(),
                message: message.hydrate(&principal),
            },
            None,
        );

        // Sending implies the sender stopped typing.
        let snapshot = self.typing.set_typing(room_id, &principal.id, false);
        self.multicast_room(
            room_id,
            &ServerEvent::TypingStopped {
                room_id: room_id.to_string(),
                user_id: principal.id.clone(),
                username: principal.username.clone(),
                typing_users: snapshot,
            },
            Some(connection_id),
        );
        Ok(())
    }

    fn edit_message(
        &self,
        connection_id: &str,
        message_id: &str,
        new_content: &str,
    ) -> Result<(), RouterError> {
        let principal = self.principal_of(connection_id)?;
        let message = self.ledger.edit(message_id, new_content, &principal.id)?;

        self.multicast_room(
            &message.room_id,
            &ServerEvent::MessageEdited {
                message_id: message.id.clone(),
                room_id: message.room_id.clone(),
                new_content: message.content.clone(),
                edited_by: principal.id.clone(),
                edited_at: message.edited_at.unwrap_or(message.created_at),
            },
            None,
        );
        Ok(())
    }

    fn delete_message(&self, connection_id: &str, message_id: &str) -> Result<(), RouterError> {
        let principal = self.principal_of(connection_id)?;
        let message = self.ledger.soft_delete(message_id, &principal.id)?;

        self.multicast_room(
            &message.room_id,
            &ServerEvent::MessageDeleted {
                message_id: message.id.clone(),
                room_id: message.room_id.clone(),
                deleted_by: principal.id.clone(),
            },
            None,
        );
        Ok(())
    }

    fn mark_read(&self, connection_id: &str, message_id: &str) -> Result<(), RouterError> {
        let principal = self.principal_of(connection_id)?;
        let message = self.ledger.mark_read(message_id, &principal.id)?;

        // Point-to-point receipt to the sender's live connections.
        if message.sender_id != principal.id {
            let receipt = ServerEvent::MessageRead {
                message_id: message.id.clone(),
                read_by: principal.id.clone(),
                read_by_username: principal.username.clone(),
            };
            self.unicast_principal(&message.sender_id, &receipt);
        }
        Ok(())
    }

    fn set_typing(
        &self,
        connection_id: &str,
        room_id: &str,
        is_typing: bool,
    ) -> Result<(), RouterError> {
        let principal = self.principal_of(connection_id)?;
        let snapshot = self.typing.set_typing(room_id, &principal.id, is_typing);

        let event = if is_typing {
            ServerEvent::TypingStarted {
                room_id: room_id.to_string(),
                user_id: principal.id.clone(),
                username: principal.username.clone(),
                typing_users: snapshot,
            }
        } else {
            ServerEvent::TypingStopped {
                room_id: room_id.to_string(),
                user_id: principal.id.clone(),
                username: principal.username.clone(),
                typing_users: snapshot,
            }
        };
        self.multicast_room(room_id, &event, Some(connection_id));
        Ok(())
    }

    fn create_room(
        &self,
        connection_id: &str,
        name: &str,
        is_private: bool,
        members: &[PrincipalId],
    ) -> Result<(), RouterError> {
        let principal = self.principal_of(connection_id)?;
        if name.is_empty() {
            return Err(RouterError::Validation("Room name is required"));
        }

        let room = self
            .rooms
            .create_room(name, &principal.id, is_private, members)?;
        self.index_connection(connection_id, &room.id);

        self.unicast(
            connection_id,
            &ServerEvent::RoomCreated {
                room: room.summary(),
            },
        );

        // Invitations are delivered to online members only; offline
        // members receive nothing (no persisted invitation queue).
        let invitation = ServerEvent::RoomInvited {
            room: room.summary(),
            invited_by: principal.id.clone(),
            invited_by_username: principal.username.clone(),
        };
        for member_id in members {
            if member_id != &principal.id {
                self.unicast_principal(member_id, &invitation);
            }
        }
        Ok(())
    }

    fn private_message(
        &self,
        connection_id: &str,
        recipient_id: &str,
        content: &str,
        kind: MessageKind,
        attachment: Option<parley_protocol::Attachment>,
    ) -> Result<(), RouterError> {
        let principal = self.principal_of(connection_id)?;
        if recipient_id.is_empty() || content.is_empty() {
            return Err(RouterError::Validation(
                "Recipient ID and content are required",
            ));
        }
        let recipient = self
            .directory
            .lookup_by_id(recipient_id)
            .ok_or_else(|| RouterError::RecipientNotFound(recipient_id.to_string()))?;

        // Deterministic pairing so repeated conversations reuse one room.
        let room_id = private_room_id(&principal.id, &recipient.id);
        if !self.rooms.exists(&room_id) {
            self.rooms.create_room_with_id(
                &room_id,
                &format!("Private: {} & {}", principal.username, recipient.username),
                &principal.id,
                true,
                &[recipient.id.clone()],
            )?;
        }

        let message = self
            .ledger
            .append(&principal.id, &room_id, content, kind, attachment);
        self.unicast_principal(
            &recipient.id,
            &ServerEvent::PrivateMessageReceived {
                room_id: room_id.clone(),
                message: message.hydrate(&principal),
            },
        );

        // The sender is acknowledged whether or not the recipient is online.
        self.unicast(
            connection_id,
            &ServerEvent::MessageSent {
                message_id: message.id,
                room_id,
            },
        );
        Ok(())
    }

    fn share_file(
        &self,
        connection_id: &str,
        room_id: &str,
        file_data: &str,
        file_name: &str,
        file_type: &str,
        file_size: u64,
    ) -> Result<(), RouterError> {
        let principal = self.principal_of(connection_id)?;
        if file_data.is_empty() || file_name.is_empty() {
            return Err(RouterError::Validation(
                "File data and name are required",
            ));
        }
        if !self.rooms.exists(room_id) {
            return Err(RouterError::RoomNotFound(room_id.to_string()));
        }

        let attachment = parley_protocol::Attachment {
            data: file_data.to_string(),
            mime: file_type.to_string(),
            size: file_size,
        };
        let message = self.ledger.append(
            &principal.id,
            room_id,
            file_name,
            MessageKind::File,
            Some(attachment),
        );
        self.multicast_room(
            room_id,
            &ServerEvent::FileShared {
                room_id: room_id.to_string(),
                message: message.hydrate(&principal),
            },
            None,
        );
        Ok(())
    }

    fn update_status(&self, connection_id: &str, status: &str) -> Result<(), RouterError> {
        let principal = self.principal_of(connection_id)?;
        let status = PresenceStatus::parse(status)
            .ok_or(RouterError::Validation("Unknown status"))?;

        let updated = self
            .directory
            .set_status(&principal.id, status)
            .ok_or_else(|| RouterError::PrincipalNotFound(principal.id.clone()))?;
        self.broadcast_all(&ServerEvent::UserStatus {
            user_id: updated.id.clone(),
            username: updated.username.clone(),
            status: updated.status,
            last_seen: updated.last_seen,
        });
        Ok(())
    }

    fn search_rooms(&self, connection_id: &str, query: &str) -> Result<(), RouterError> {
        self.principal_of(connection_id)?;
        if query.is_empty() {
            return Err(RouterError::Validation("Search query is required"));
        }
        self.unicast(
            connection_id,
            &ServerEvent::RoomSearchResults {
                query: query.to_string(),
                rooms: self.rooms.search(query),
            },
        );
        Ok(())
    }

    fn search_messages(
        &self,
        connection_id: &str,
        room_id: &str,
        query: &str,
    ) -> Result<(), RouterError> {
        self.principal_of(connection_id)?;
        if query.is_empty() || room_id.is_empty() {
            return Err(RouterError::Validation(
                "Room ID and search query are required",
            ));
        }
        if !self.rooms.exists(room_id) {
            return Err(RouterError::RoomNotFound(room_id.to_string()));
        }

        let messages = self
            .ledger
            .search(room_id, query)
            .iter()
            .map(|m| self.hydrate(m))
            .collect();
        self.unicast(
            connection_id,
            &ServerEvent::MessageSearchResults {
                room_id: room_id.to_string(),
                query: query.to_string(),
                messages,
            },
        );
        Ok(())
    }

    // ---- delivery helpers ----

    fn principal_of(&self, connection_id: &str) -> Result<crate::Principal, RouterError> {
        let handle = self
            .connections
            .get(connection_id)
            .ok_or_else(|| RouterError::PrincipalNotFound(connection_id.to_string()))?;
        self.directory
            .lookup_by_id(&handle.principal_id)
            .ok_or_else(|| RouterError::PrincipalNotFound(handle.principal_id.clone()))
    }

    fn index_connection(&self, connection_id: &str, room_id: &str) {
        self.room_connections
            .entry(room_id.to_string())
            .or_default()
            .insert(connection_id.to_string());
        self.subscriptions
            .entry(connection_id.to_string())
            .or_default()
            .insert(room_id.to_string());
    }

    fn deindex_connection(&self, connection_id: &str, room_id: &str) {
        if let Some(conns) = self.room_connections.get_mut(room_id) {
            conns.remove(connection_id);
            if conns.is_empty() {
                drop(conns);
                self.room_connections.remove(room_id);
            }
        }
    }

    /// Queue an event for a single connection.
    fn unicast(&self, connection_id: &str, event: &ServerEvent) {
        if let Some(handle) = self.connections.get(connection_id) {
            if handle.sender.send(event.clone()).is_err() {
                trace!(connection = %connection_id, "Delivery queue closed");
            }
        }
    }

    /// Queue an event for every live connection of a principal.
    fn unicast_principal(&self, principal_id: &str, event: &ServerEvent) {
        if let Some(conns) = self.principal_connections.get(principal_id) {
            for connection_id in conns.iter() {
                self.unicast(&connection_id, event);
            }
        }
    }

    /// Queue an event for every connection subscribed to a room.
    ///
    /// Holds the room entry exclusively while sending, which sequences
    /// concurrent fan-outs for the same room.
    fn multicast_room(
        &self,
        room_id: &str,
        event: &ServerEvent,
        exclude: Option<&str>,
    ) -> usize {
        let Some(conns) = self.room_connections.get_mut(room_id) else {
            return 0;
        };
        let mut delivered = 0;
        for connection_id in conns.iter() {
            if Some(connection_id.as_str()) == exclude {
                continue;
            }
            self.unicast(&connection_id, event);
            delivered += 1;
        }
        trace!(room = %room_id, recipients = delivered, "Fanned out event");
        delivered
    }

    /// Queue an event for every live connection.
    fn broadcast_all(&self, event: &ServerEvent) {
        for entry in self.connections.iter() {
            if entry.sender.send(event.clone()).is_err() {
                trace!(connection = %entry.key(), "Delivery queue closed");
            }
        }
    }

    fn hydrate(&self, message: &StoredMessage) -> WireMessage {
        match self.directory.lookup_by_id(&message.sender_id) {
            Some(sender) => message.hydrate(&sender),
            None => WireMessage {
                id: message.id.clone(),
                room_id: message.room_id.clone(),
                content: message.content.clone(),
                kind: message.kind,
                attachment: message.attachment.clone(),
                sender_id: message.sender_id.clone(),
                sender_name: message.sender_id.clone(),
                sender_avatar: String::new(),
                created_at: message.created_at,
                edited: message.edited,
                edited_at: message.edited_at,
            },
        }
    }
}

/// Deterministic room id for a private conversation: the sort-ordered
/// pairing of the two principal ids.
#[must_use]
pub fn private_room_id(a: &str, b: &str) -> RoomId {
    let mut pair = [a, b];
    pair.sort_unstable();
    format!("{}_{}", pair[0], pair[1])
}

/// Router statistics.
#[derive(Debug, Clone)]
pub struct RouterStats {
    /// Number of live connections.
    pub connection_count: usize,
    /// Number of principals with at least one live connection.
    pub online_principal_count: usize,
    /// Number of rooms with at least one subscribed connection.
    pub indexed_room_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MessageLedger, PrincipalDirectory, RoomRegistry, TypingTracker};
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        directory: Arc<PrincipalDirectory>,
        ledger: Arc<MessageLedger>,
        router: Router,
    }

    fn fixture() -> Fixture {
        let directory = Arc::new(PrincipalDirectory::new());
        let rooms = Arc::new(RoomRegistry::new());
        let ledger = Arc::new(MessageLedger::new());
        let typing = Arc::new(TypingTracker::new());
        let router = Router::with_config(
            directory.clone(),
            rooms,
            ledger.clone(),
            typing,
            RouterConfig {
                default_rooms: vec!["general".to_string()],
                history_page_size: 50,
            },
        );
        router.seed_default_rooms();
        Fixture {
            directory,
            ledger,
            router,
        }
    }

    fn attach(fx: &Fixture, username: &str) -> (String, ConnectionId, UnboundedReceiver<ServerEvent>) {
        let principal = match fx.directory.lookup_by_username(username) {
            Some(p) => p,
            None => fx.directory.register(username, "pw", "").unwrap(),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = fx.router.attach(&principal.id, tx).unwrap();
        (principal.id, conn, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_attach_bootstrap() {
        let fx = fixture();
        let (_alice, _conn, mut rx) = attach(&fx, "alice");

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerEvent::UserOnline { username, .. } if username == "alice")));
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerEvent::OnlineUsers { users } if users.len() == 1)));
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerEvent::RoomJoined { room } if room.id == "general")));
    }

    #[tokio::test]
    async fn test_send_message_end_to_end() {
        let fx = fixture();
        let (alice, _alice_conn, mut alice_rx) = attach(&fx, "alice");
        let (bob, bob_conn, _bob_rx) = attach(&fx, "bob");
        drain(&mut alice_rx);

        fx.router.dispatch(
            &bob_conn,
            ClientEvent::SendMessage {
                room_id: "general".into(),
                content: "hi".into(),
                kind: MessageKind::Text,
                attachment: None,
            },
        );

        let received: Vec<_> = drain(&mut alice_rx)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::MessageReceived { room_id, message } => Some((room_id, message)),
                _ => None,
            })
            .collect();
        assert_eq!(received.len(), 1);
        let (room_id, message) = &received[0];
        assert_eq!(room_id, "general");
        assert_eq!(message.content, "hi");
        assert_eq!(message.sender_id, bob);

        assert_eq!(fx.ledger.unread_count("general", &alice), 1);
        fx.ledger.mark_read(&message.id, &alice).unwrap();
        assert_eq!(fx.ledger.unread_count("general", &alice), 0);
    }

    #[tokio::test]
    async fn test_send_message_validation() {
        let fx = fixture();
        let (_alice, conn, mut rx) = attach(&fx, "alice");
        drain(&mut rx);

        fx.router.dispatch(
            &conn,
            ClientEvent::SendMessage {
                room_id: "general".into(),
                content: String::new(),
                kind: MessageKind::Text,
                attachment: None,
            },
        );
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ServerEvent::Error { .. }));

        fx.router.dispatch(
            &conn,
            ClientEvent::SendMessage {
                room_id: "missing".into(),
                content: "hi".into(),
                kind: MessageKind::Text,
                attachment: None,
            },
        );
        let events = drain(&mut rx);
        assert!(
            matches!(&events[0], ServerEvent::Error { message } if message.starts_with("Room not found"))
        );
    }

    #[tokio::test]
    async fn test_join_room_history_oldest_first() {
        let fx = fixture();
        let (_alice, alice_conn, mut alice_rx) = attach(&fx, "alice");
        drain(&mut alice_rx);

        for content in ["one", "two", "three"] {
            fx.router.dispatch(
                &alice_conn,
                ClientEvent::SendMessage {
                    room_id: "general".into(),
                    content: content.into(),
                    kind: MessageKind::Text,
                    attachment: None,
                },
            );
        }

        let (_bob, bob_conn, mut bob_rx) = attach(&fx, "bob");
        drain(&mut bob_rx);
        // Default attach already indexed bob under general; join again
        // explicitly to fetch history.
        fx.router.dispatch(
            &bob_conn,
            ClientEvent::JoinRoom {
                room_id: "general".into(),
            },
        );

        let history = drain(&mut bob_rx)
            .into_iter()
            .find_map(|e| match e {
                ServerEvent::RoomMessages { messages, .. } => Some(messages),
                _ => None,
            })
            .unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
        assert!(history.iter().all(|m| !m.content.is_empty()));
    }

    #[tokio::test]
    async fn test_private_room_access_denied() {
        let fx = fixture();
        let (bob, _bob_conn, mut bob_rx) = attach(&fx, "bob");
        let (_alice, alice_conn, _alice_rx) = attach(&fx, "alice");
        let (_carol, carol_conn, mut carol_rx) = attach(&fx, "carol");
        drain(&mut bob_rx);
        drain(&mut carol_rx);

        fx.router.dispatch(
            &alice_conn,
            ClientEvent::CreateRoom {
                name: "team".into(),
                is_private: true,
                members: vec![bob.clone()],
            },
        );

        // bob (online) is invited.
        let bob_events = drain(&mut bob_rx);
        let invite = bob_events
            .iter()
            .find_map(|e| match e {
                ServerEvent::RoomInvited { room, .. } => Some(room.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(invite.name, "team");
        assert!(invite.is_private);

        // carol is neither invited nor allowed in.
        assert!(drain(&mut carol_rx).is_empty());
        fx.router.dispatch(
            &carol_conn,
            ClientEvent::JoinRoom {
                room_id: invite.id.clone(),
            },
        );
        let carol_events = drain(&mut carol_rx);
        assert!(
            matches!(&carol_events[0], ServerEvent::Error { message } if message.contains("Access denied"))
        );
    }

    #[tokio::test]
    async fn test_private_message_deterministic_room() {
        let fx = fixture();
        let (alice, alice_conn, mut alice_rx) = attach(&fx, "alice");
        let (bob, bob_conn, mut bob_rx) = attach(&fx, "bob");
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        fx.router.dispatch(
            &alice_conn,
            ClientEvent::PrivateMessage {
                recipient_id: bob.clone(),
                content: "psst".into(),
                kind: MessageKind::Text,
                attachment: None,
            },
        );
        fx.router.dispatch(
            &bob_conn,
            ClientEvent::PrivateMessage {
                recipient_id: alice.clone(),
                content: "yes?".into(),
                kind: MessageKind::Text,
                attachment: None,
            },
        );

        let alice_acks: Vec<_> = drain(&mut alice_rx)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::MessageSent { room_id, .. } => Some(room_id),
                _ => None,
            })
            .collect();
        let bob_events = drain(&mut bob_rx);
        let bob_room = bob_events
            .iter()
            .find_map(|e| match e {
                ServerEvent::PrivateMessageReceived { room_id, .. } => Some(room_id.clone()),
                _ => None,
            })
            .unwrap();

        assert_eq!(alice_acks.len(), 1);
        assert_eq!(alice_acks[0], bob_room);
        assert_eq!(bob_room, private_room_id(&bob, &alice));
    }

    #[tokio::test]
    async fn test_private_message_offline_recipient_still_acked() {
        let fx = fixture();
        let bob = fx.directory.register("bob", "pw", "").unwrap();
        let (_alice, alice_conn, mut alice_rx) = attach(&fx, "alice");
        drain(&mut alice_rx);

        fx.router.dispatch(
            &alice_conn,
            ClientEvent::PrivateMessage {
                recipient_id: bob.id.clone(),
                content: "you there?".into(),
                kind: MessageKind::Text,
                attachment: None,
            },
        );
        let events = drain(&mut alice_rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerEvent::MessageSent { .. })));
    }

    #[tokio::test]
    async fn test_edit_by_non_sender_not_broadcast() {
        let fx = fixture();
        let (_alice, alice_conn, mut alice_rx) = attach(&fx, "alice");
        let (_bob, bob_conn, mut bob_rx) = attach(&fx, "bob");
        drain(&mut alice_rx);

        fx.router.dispatch(
            &alice_conn,
            ClientEvent::SendMessage {
                room_id: "general".into(),
                content: "original".into(),
                kind: MessageKind::Text,
                attachment: None,
            },
        );
        let message_id = drain(&mut alice_rx)
            .into_iter()
            .find_map(|e| match e {
                ServerEvent::MessageReceived { message, .. } => Some(message.id),
                _ => None,
            })
            .unwrap();
        drain(&mut bob_rx);

        fx.router.dispatch(
            &bob_conn,
            ClientEvent::EditMessage {
                message_id: message_id.clone(),
                new_content: "hijacked".into(),
            },
        );

        let bob_events = drain(&mut bob_rx);
        assert_eq!(bob_events.len(), 1);
        assert!(matches!(&bob_events[0], ServerEvent::Error { message } if message.contains("Forbidden")));
        // The rejection is never broadcast.
        assert!(drain(&mut alice_rx).is_empty());
        assert_eq!(fx.ledger.search("general", "original").len(), 1);
    }

    #[tokio::test]
    async fn test_delete_broadcast() {
        let fx = fixture();
        let (_alice, alice_conn, mut alice_rx) = attach(&fx, "alice");
        let (_bob, _bob_conn, mut bob_rx) = attach(&fx, "bob");
        drain(&mut alice_rx);

        fx.router.dispatch(
            &alice_conn,
            ClientEvent::SendMessage {
                room_id: "general".into(),
                content: "oops".into(),
                kind: MessageKind::Text,
                attachment: None,
            },
        );
        let message_id = drain(&mut alice_rx)
            .into_iter()
            .find_map(|e| match e {
                ServerEvent::MessageReceived { message, .. } => Some(message.id),
                _ => None,
            })
            .unwrap();
        drain(&mut bob_rx);

        fx.router.dispatch(
            &alice_conn,
            ClientEvent::DeleteMessage {
                message_id: message_id.clone(),
            },
        );
        let bob_events = drain(&mut bob_rx);
        assert!(bob_events
            .iter()
            .any(|e| matches!(e, ServerEvent::MessageDeleted { message_id: id, .. } if *id == message_id)));
    }

    #[tokio::test]
    async fn test_typing_excludes_originator() {
        let fx = fixture();
        let (bob_id, bob_conn, mut bob_rx) = attach(&fx, "bob");
        let (_alice, _alice_conn, mut alice_rx) = attach(&fx, "alice");
        drain(&mut bob_rx);
        drain(&mut alice_rx);

        fx.router.dispatch(
            &bob_conn,
            ClientEvent::StartTyping {
                room_id: "general".into(),
            },
        );

        assert!(drain(&mut bob_rx).is_empty());
        let alice_events = drain(&mut alice_rx);
        match &alice_events[0] {
            ServerEvent::TypingStarted { typing_users, .. } => {
                assert_eq!(typing_users, &vec![bob_id.clone()]);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        fx.router.dispatch(
            &bob_conn,
            ClientEvent::StopTyping {
                room_id: "general".into(),
            },
        );
        let alice_events = drain(&mut alice_rx);
        match &alice_events[0] {
            ServerEvent::TypingStopped { typing_users, .. } => assert!(typing_users.is_empty()),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_clears_typing() {
        let fx = fixture();
        let (_bob, bob_conn, _bob_rx) = attach(&fx, "bob");
        let (_alice, _alice_conn, mut alice_rx) = attach(&fx, "alice");
        drain(&mut alice_rx);

        fx.router.dispatch(
            &bob_conn,
            ClientEvent::StartTyping {
                room_id: "general".into(),
            },
        );
        fx.router.dispatch(
            &bob_conn,
            ClientEvent::SendMessage {
                room_id: "general".into(),
                content: "done typing".into(),
                kind: MessageKind::Text,
                attachment: None,
            },
        );

        let events = drain(&mut alice_rx);
        let stopped = events
            .iter()
            .find_map(|e| match e {
                ServerEvent::TypingStopped { typing_users, .. } => Some(typing_users.clone()),
                _ => None,
            })
            .unwrap();
        assert!(stopped.is_empty());
    }

    #[tokio::test]
    async fn test_mark_read_receipt_to_sender_only() {
        let fx = fixture();
        let (_alice, alice_conn, mut alice_rx) = attach(&fx, "alice");
        let (bob_id, bob_conn, mut bob_rx) = attach(&fx, "bob");
        let (_carol, _carol_conn, mut carol_rx) = attach(&fx, "carol");
        drain(&mut bob_rx);

        fx.router.dispatch(
            &bob_conn,
            ClientEvent::SendMessage {
                room_id: "general".into(),
                content: "read me".into(),
                kind: MessageKind::Text,
                attachment: None,
            },
        );
        let message_id = drain(&mut alice_rx)
            .into_iter()
            .find_map(|e| match e {
                ServerEvent::MessageReceived { message, .. } => Some(message.id),
                _ => None,
            })
            .unwrap();
        drain(&mut carol_rx);

        fx.router.dispatch(
            &alice_conn,
            ClientEvent::MarkRead {
                message_id: message_id.clone(),
                room_id: "general".into(),
            },
        );

        let bob_events = drain(&mut bob_rx);
        assert!(bob_events.iter().any(|e| matches!(
            e,
            ServerEvent::MessageRead { read_by_username, .. } if read_by_username == "alice"
        )));
        assert!(drain(&mut carol_rx).is_empty());
        // Marking your own message read produces no receipt.
        fx.router.dispatch(
            &bob_conn,
            ClientEvent::MarkRead {
                message_id,
                room_id: "general".into(),
            },
        );
        assert!(drain(&mut bob_rx).is_empty());
        let _ = bob_id;
    }

    #[tokio::test]
    async fn test_detach_last_connection_goes_offline() {
        let fx = fixture();
        let (_alice, _alice_conn, mut alice_rx) = attach(&fx, "alice");
        let (bob_id, bob_conn1, _rx1) = attach(&fx, "bob");
        let principal = fx.directory.lookup_by_id(&bob_id).unwrap();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let bob_conn2 = fx.router.attach(&principal.id, tx2).unwrap();
        drain(&mut alice_rx);

        fx.router.detach(&bob_conn1);
        assert!(drain(&mut alice_rx)
            .iter()
            .all(|e| !matches!(e, ServerEvent::UserOffline { .. })));

        fx.router.detach(&bob_conn2);
        let events = drain(&mut alice_rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerEvent::UserOffline { username, .. } if username == "bob")));
    }

    #[tokio::test]
    async fn test_detach_clears_typing() {
        let fx = fixture();
        let (bob_id, bob_conn, _bob_rx) = attach(&fx, "bob");
        let (_alice, _alice_conn, mut alice_rx) = attach(&fx, "alice");
        drain(&mut alice_rx);

        fx.router.dispatch(
            &bob_conn,
            ClientEvent::StartTyping {
                room_id: "general".into(),
            },
        );
        drain(&mut alice_rx);

        fx.router.detach(&bob_conn);
        let events = drain(&mut alice_rx);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::TypingStopped { user_id, typing_users, .. }
                if *user_id == bob_id && typing_users.is_empty()
        )));
    }

    #[tokio::test]
    async fn test_sweep_typing_broadcasts_stop() {
        let fx = fixture();
        let (bob_id, bob_conn, _bob_rx) = attach(&fx, "bob");
        let (_alice, _alice_conn, mut alice_rx) = attach(&fx, "alice");
        drain(&mut alice_rx);

        fx.router.dispatch(
            &bob_conn,
            ClientEvent::StartTyping {
                room_id: "general".into(),
            },
        );
        drain(&mut alice_rx);

        fx.router.sweep_typing(std::time::Duration::ZERO);
        let events = drain(&mut alice_rx);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::TypingStopped { user_id, typing_users, .. }
                if *user_id == bob_id && typing_users.is_empty()
        )));

        // A second sweep finds nothing.
        fx.router.sweep_typing(std::time::Duration::ZERO);
        assert!(drain(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn test_leave_room_idempotent() {
        let fx = fixture();
        let (_alice, alice_conn, mut alice_rx) = attach(&fx, "alice");
        drain(&mut alice_rx);

        fx.router.dispatch(
            &alice_conn,
            ClientEvent::LeaveRoom {
                room_id: "general".into(),
            },
        );
        fx.router.dispatch(
            &alice_conn,
            ClientEvent::LeaveRoom {
                room_id: "never-existed".into(),
            },
        );
        // Neither leave produces an error.
        assert!(drain(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn test_room_and_message_search() {
        let fx = fixture();
        let (_alice, alice_conn, mut alice_rx) = attach(&fx, "alice");
        drain(&mut alice_rx);

        fx.router.dispatch(
            &alice_conn,
            ClientEvent::SendMessage {
                room_id: "general".into(),
                content: "deploy finished".into(),
                kind: MessageKind::Text,
                attachment: None,
            },
        );
        drain(&mut alice_rx);

        fx.router.dispatch(
            &alice_conn,
            ClientEvent::SearchRooms {
                query: "GENER".into(),
            },
        );
        fx.router.dispatch(
            &alice_conn,
            ClientEvent::SearchMessages {
                room_id: "general".into(),
                query: "DEPLOY".into(),
            },
        );

        let events = drain(&mut alice_rx);
        let rooms = events
            .iter()
            .find_map(|e| match e {
                ServerEvent::RoomSearchResults { rooms, .. } => Some(rooms.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(rooms.len(), 1);
        let messages = events
            .iter()
            .find_map(|e| match e {
                ServerEvent::MessageSearchResults { messages, .. } => Some(messages.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "deploy finished");
    }

    #[tokio::test]
    async fn test_file_share() {
        let fx = fixture();
        let (_alice, alice_conn, mut alice_rx) = attach(&fx, "alice");
        let (_bob, bob_conn, mut bob_rx) = attach(&fx, "bob");
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        fx.router.dispatch(
            &bob_conn,
            ClientEvent::ShareFile {
                room_id: "general".into(),
                file_data: "data:text/plain;base64,aGk=".into(),
                file_name: "hi.txt".into(),
                file_type: "text/plain".into(),
                file_size: 2,
            },
        );

        let events = drain(&mut alice_rx);
        let message = events
            .iter()
            .find_map(|e| match e {
                ServerEvent::FileShared { message, .. } => Some(message.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(message.content, "hi.txt");
        assert_eq!(message.kind, MessageKind::File);
        assert_eq!(message.attachment.as_ref().unwrap().size, 2);

        // Missing payload is a validation error.
        fx.router.dispatch(
            &bob_conn,
            ClientEvent::ShareFile {
                room_id: "general".into(),
                file_data: String::new(),
                file_name: "hi.txt".into(),
                file_type: "text/plain".into(),
                file_size: 0,
            },
        );
        let bob_events = drain(&mut bob_rx);
        assert!(bob_events
            .iter()
            .any(|e| matches!(e, ServerEvent::Error { .. })));
    }

    #[tokio::test]
    async fn test_status_update_broadcast() {
        let fx = fixture();
        let (_alice, _alice_conn, mut alice_rx) = attach(&fx, "alice");
        let (_bob, bob_conn, mut bob_rx) = attach(&fx, "bob");
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        fx.router.dispatch(
            &bob_conn,
            ClientEvent::UpdateStatus {
                status: "offline".into(),
            },
        );
        let events = drain(&mut alice_rx);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::UserStatus { status, .. } if *status == PresenceStatus::Offline
        )));

        fx.router.dispatch(
            &bob_conn,
            ClientEvent::UpdateStatus {
                status: "busy".into(),
            },
        );
        let bob_events = drain(&mut bob_rx);
        assert!(bob_events
            .iter()
            .any(|e| matches!(e, ServerEvent::Error { .. })));
    }
}
