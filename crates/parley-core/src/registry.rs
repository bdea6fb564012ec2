//! Room registry.
//!
//! Authoritative record of rooms, their membership sets, and privacy
//! flags. Rooms are never deleted; membership changes bump `updated_at`.

use crate::error::RouterError;
use crate::time::now_millis;
use dashmap::DashMap;
use parley_protocol::{PrincipalId, RoomId, RoomSummary};
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

/// A named, membership-scoped message channel.
#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub created_by: PrincipalId,
    pub is_private: bool,
    /// Membership set. The creator is always a member.
    pub members: HashSet<PrincipalId>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Room {
    /// Public view of this room.
    #[must_use]
    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            is_private: self.is_private,
            created_by: self.created_by.clone(),
            member_count: self.members.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Whether a principal may subscribe to this room.
    #[must_use]
    pub fn allows(&self, principal_id: &str) -> bool {
        !self.is_private || self.members.contains(principal_id)
    }
}

/// Registry of all rooms.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: DashMap<RoomId, Room>,
}

impl RoomRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a room with a generated id.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the name is empty.
    pub fn create_room(
        &self,
        name: &str,
        created_by: &str,
        is_private: bool,
        initial_members: &[PrincipalId],
    ) -> Result<Room, RouterError> {
        let suffix = Uuid::new_v4().simple().to_string();
        let id = format!("room_{}_{}", now_millis(), &suffix[..9]);
        self.create_room_with_id(&id, name, created_by, is_private, initial_members)
    }

    /// Create a room under a caller-chosen id.
    ///
    /// Used by the bootstrap step (fixed default-room ids) and by the
    /// deterministic private-conversation rooms.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the name is empty.
    pub fn create_room_with_id(
        &self,
        id: &str,
        name: &str,
        created_by: &str,
        is_private: bool,
        initial_members: &[PrincipalId],
    ) -> Result<Room, RouterError> {
        if name.is_empty() {
            return Err(RouterError::Validation("Room name is required"));
        }

        let now = now_millis();
        let mut members: HashSet<PrincipalId> = initial_members.iter().cloned().collect();
        members.insert(created_by.to_string());

        let room = Room {
            id: id.to_string(),
            name: name.to_string(),
            created_by: created_by.to_string(),
            is_private,
            members,
            created_at: now,
            updated_at: now,
        };

        debug!(room = %room.id, name = %name, private = is_private, "Created room");
        self.rooms.insert(room.id.clone(), room.clone());
        Ok(room)
    }

    /// Look up a room by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Room> {
        self.rooms.get(id).map(|r| r.clone())
    }

    /// Whether a room exists.
    #[must_use]
    pub fn exists(&self, id: &str) -> bool {
        self.rooms.contains_key(id)
    }

    /// Summaries of all rooms.
    #[must_use]
    pub fn list_all(&self) -> Vec<RoomSummary> {
        self.rooms.iter().map(|r| r.summary()).collect()
    }

    /// Summaries of public rooms.
    #[must_use]
    pub fn list_public(&self) -> Vec<RoomSummary> {
        self.rooms
            .iter()
            .filter(|r| !r.is_private)
            .map(|r| r.summary())
            .collect()
    }

    /// Rooms where the principal is creator or member.
    #[must_use]
    pub fn list_for_principal(&self, principal_id: &str) -> Vec<RoomSummary> {
        self.rooms
            .iter()
            .filter(|r| r.members.contains(principal_id) || r.created_by == principal_id)
            .map(|r| r.summary())
            .collect()
    }

    /// Add a principal to a room's membership set. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `RoomNotFound` if the room does not exist.
    pub fn add_member(&self, room_id: &str, principal_id: &str) -> Result<Room, RouterError> {
        let mut room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| RouterError::RoomNotFound(room_id.to_string()))?;
        room.members.insert(principal_id.to_string());
        room.updated_at = now_millis();
        Ok(room.clone())
    }

    /// Remove a principal from a room's membership set. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `RoomNotFound` if the room does not exist.
    pub fn remove_member(&self, room_id: &str, principal_id: &str) -> Result<Room, RouterError> {
        let mut room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| RouterError::RoomNotFound(room_id.to_string()))?;
        room.members.remove(principal_id);
        room.updated_at = now_millis();
        Ok(room.clone())
    }

    /// Case-insensitive substring search over room names.
    #[must_use]
    pub fn search(&self, name_substring: &str) -> Vec<RoomSummary> {
        let needle = name_substring.to_lowercase();
        self.rooms
            .iter()
            .filter(|r| r.name.to_lowercase().contains(&needle))
            .map(|r| r.summary())
            .collect()
    }

    /// Number of rooms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_room_creator_is_member() {
        let registry = RoomRegistry::new();
        let room = registry
            .create_room("team", "alice", true, &["bob".into()])
            .unwrap();

        assert!(room.members.contains("alice"));
        assert!(room.members.contains("bob"));
        assert_eq!(room.members.len(), 2);
    }

    #[test]
    fn test_create_room_empty_name() {
        let registry = RoomRegistry::new();
        assert!(matches!(
            registry.create_room("", "alice", false, &[]),
            Err(RouterError::Validation(_))
        ));
    }

    #[test]
    fn test_membership_idempotent() {
        let registry = RoomRegistry::new();
        registry
            .create_room_with_id("general", "general", "system", false, &[])
            .unwrap();

        registry.add_member("general", "alice").unwrap();
        let room = registry.add_member("general", "alice").unwrap();
        assert!(room.members.contains("alice"));

        registry.remove_member("general", "alice").unwrap();
        let room = registry.remove_member("general", "alice").unwrap();
        assert!(!room.members.contains("alice"));
    }

    #[test]
    fn test_membership_missing_room() {
        let registry = RoomRegistry::new();
        assert!(matches!(
            registry.add_member("nope", "alice"),
            Err(RouterError::RoomNotFound(_))
        ));
        assert!(matches!(
            registry.remove_member("nope", "alice"),
            Err(RouterError::RoomNotFound(_))
        ));
    }

    #[test]
    fn test_private_room_access() {
        let registry = RoomRegistry::new();
        let room = registry
            .create_room("team", "alice", true, &["bob".into()])
            .unwrap();

        assert!(room.allows("alice"));
        assert!(room.allows("bob"));
        assert!(!room.allows("carol"));
    }

    #[test]
    fn test_list_filters() {
        let registry = RoomRegistry::new();
        registry
            .create_room_with_id("general", "general", "system", false, &[])
            .unwrap();
        registry.create_room("team", "alice", true, &[]).unwrap();

        assert_eq!(registry.list_all().len(), 2);
        assert_eq!(registry.list_public().len(), 1);
        assert_eq!(registry.list_for_principal("alice").len(), 1);
    }

    #[test]
    fn test_search_case_insensitive() {
        let registry = RoomRegistry::new();
        registry
            .create_room_with_id("general", "general", "system", false, &[])
            .unwrap();
        registry
            .create_room_with_id("random", "random", "system", false, &[])
            .unwrap();

        let hits = registry.search("GEN");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "general");
        assert!(registry.search("zzz").is_empty());
    }
}
