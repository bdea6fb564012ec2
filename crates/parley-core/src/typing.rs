//! Typing indicator tracking.
//!
//! Per-room ephemeral sets of currently-typing principals. Entries are
//! rebuilt from explicit start/stop events, carry a touched-at timestamp
//! so stale entries can be pruned, and are cleared when a principal's
//! connections unwind. Nothing here survives a restart.

use crate::time::now_millis;
use dashmap::DashMap;
use parley_protocol::{PrincipalId, RoomId};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Outcome of pruning one room's typing set.
#[derive(Debug, Clone)]
pub struct PrunedRoom {
    pub room_id: RoomId,
    /// Principals removed by the prune, sorted.
    pub removed: Vec<PrincipalId>,
    /// Snapshot of the room after the prune, sorted.
    pub remaining: Vec<PrincipalId>,
}

/// Tracker of per-room typing sets.
#[derive(Debug, Default)]
pub struct TypingTracker {
    /// Room id -> principal id -> touched-at (epoch millis).
    rooms: DashMap<RoomId, HashMap<PrincipalId, u64>>,
}

impl TypingTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle a principal's typing state in a room.
    ///
    /// Idempotent add/remove on a set; starting again refreshes the
    /// touched-at timestamp. Returns the snapshot of typing principals
    /// in the room after the update.
    pub fn set_typing(
        &self,
        room_id: &str,
        principal_id: &str,
        is_typing: bool,
    ) -> Vec<PrincipalId> {
        if is_typing {
            let mut entry = self.rooms.entry(room_id.to_string()).or_default();
            entry.insert(principal_id.to_string(), now_millis());
            return Self::sorted_keys(&entry);
        }

        let Some(mut entry) = self.rooms.get_mut(room_id) else {
            return Vec::new();
        };
        entry.remove(principal_id);
        let snapshot = Self::sorted_keys(&entry);
        if entry.is_empty() {
            drop(entry);
            self.rooms.remove(room_id);
        }
        snapshot
    }

    /// Current typing snapshot for a room.
    #[must_use]
    pub fn snapshot(&self, room_id: &str) -> Vec<PrincipalId> {
        self.rooms
            .get(room_id)
            .map(|e| Self::sorted_keys(&e))
            .unwrap_or_default()
    }

    /// Remove a principal's typing entries from the given rooms.
    ///
    /// Returns the rooms whose set actually changed, for re-broadcast.
    pub fn clear_principal(&self, principal_id: &str, room_ids: &[RoomId]) -> Vec<RoomId> {
        let mut changed = Vec::new();
        for room_id in room_ids {
            let Some(mut entry) = self.rooms.get_mut(room_id) else {
                continue;
            };
            if entry.remove(principal_id).is_some() {
                changed.push(room_id.clone());
                if entry.is_empty() {
                    drop(entry);
                    self.rooms.remove(room_id);
                }
            }
        }
        if !changed.is_empty() {
            debug!(principal = %principal_id, rooms = changed.len(), "Cleared typing entries");
        }
        changed
    }

    /// Remove entries idle longer than `ttl`.
    ///
    /// Returns each affected room with the removed principals and the
    /// refreshed snapshot.
    pub fn prune_stale(&self, ttl: Duration) -> Vec<PrunedRoom> {
        let cutoff = now_millis().saturating_sub(ttl.as_millis() as u64);
        let mut affected = Vec::new();
        let room_ids: Vec<RoomId> = self.rooms.iter().map(|e| e.key().clone()).collect();

        for room_id in room_ids {
            let Some(mut entry) = self.rooms.get_mut(&room_id) else {
                continue;
            };
            let mut removed = Vec::new();
            entry.retain(|principal_id, touched| {
                let fresh = *touched > cutoff;
                if !fresh {
                    removed.push(principal_id.clone());
                }
                fresh
            });
            if !removed.is_empty() {
                removed.sort();
                let remaining = Self::sorted_keys(&entry);
                debug!(room = %room_id, pruned = removed.len(), "Pruned stale typing entries");
                if entry.is_empty() {
                    drop(entry);
                    self.rooms.remove(&room_id);
                }
                affected.push(PrunedRoom {
                    room_id,
                    removed,
                    remaining,
                });
            }
        }
        affected
    }

    fn sorted_keys(entry: &HashMap<PrincipalId, u64>) -> Vec<PrincipalId> {
        let mut keys: Vec<PrincipalId> = entry.keys().cloned().collect();
        keys.sort();
        keys
    }
}
