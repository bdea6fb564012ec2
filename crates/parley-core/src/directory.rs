//! Principal directory.
//!
//! Authoritative record of registered users, their profile, and their
//! online/offline state. Connections are tracked by the router; the
//! directory only knows whether a principal currently has any.

use crate::error::RouterError;
use crate::time::now_millis;
use dashmap::DashMap;
use parley_protocol::{PresenceStatus, PrincipalId, UserSummary};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

/// A registered user identity, independent of any live connection.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: PrincipalId,
    pub username: String,
    pub email: String,
    pub avatar: String,
    pub status: PresenceStatus,
    /// Milliseconds since the UNIX epoch.
    pub last_seen: u64,
    pub created_at: u64,
    pub updated_at: u64,
    /// SHA-256 hex digest of the secret. Never exposed on the wire.
    secret_digest: String,
}

impl Principal {
    /// Public view of this principal.
    #[must_use]
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id.clone(),
            username: self.username.clone(),
            avatar: self.avatar.clone(),
            status: self.status,
            last_seen: self.last_seen,
        }
    }
}

/// Profile fields a principal may update about themself.
#[derive(Debug, Default, Clone)]
pub struct ProfileUpdate {
    pub avatar: Option<String>,
    pub email: Option<String>,
}

fn digest(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Directory of registered principals.
///
/// Lookups are exact-match and case-sensitive on identifiers.
#[derive(Debug, Default)]
pub struct PrincipalDirectory {
    principals: DashMap<PrincipalId, Principal>,
    by_username: DashMap<String, PrincipalId>,
    by_email: DashMap<String, PrincipalId>,
}

impl PrincipalDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new principal.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateIdentity` if the username or email is taken.
    pub fn register(
        &self,
        username: &str,
        secret: &str,
        email: &str,
    ) -> Result<Principal, RouterError> {
        if username.is_empty() || secret.is_empty() {
            return Err(RouterError::Validation("Username and secret are required"));
        }
        if self.by_username.contains_key(username) {
            return Err(RouterError::DuplicateIdentity(username.to_string()));
        }
        if !email.is_empty() && self.by_email.contains_key(email) {
            return Err(RouterError::DuplicateIdentity(email.to_string()));
        }

        let now = now_millis();
        let principal = Principal {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            email: email.to_string(),
            avatar: format!("https://api.dicebear.com/7.x/avataaars/svg?seed={username}"),
            status: PresenceStatus::Offline,
            last_seen: now,
            created_at: now,
            updated_at: now,
            secret_digest: digest(secret),
        };

        self.by_username
            .insert(principal.username.clone(), principal.id.clone());
        if !email.is_empty() {
            self.by_email
                .insert(principal.email.clone(), principal.id.clone());
        }
        self.principals
            .insert(principal.id.clone(), principal.clone());

        debug!(principal = %principal.id, username = %username, "Registered principal");
        Ok(principal)
    }

    /// Verify a username/secret pair.
    ///
    /// Returns the principal on success, `None` otherwise.
    #[must_use]
    pub fn authenticate(&self, username: &str, secret: &str) -> Option<Principal> {
        let id = self.by_username.get(username)?;
        let principal = self.principals.get(id.value())?;
        if principal.secret_digest == digest(secret) {
            Some(principal.clone())
        } else {
            None
        }
    }

    /// Look up a principal by id.
    #[must_use]
    pub fn lookup_by_id(&self, id: &str) -> Option<Principal> {
        self.principals.get(id).map(|p| p.clone())
    }

    /// Look up a principal by username.
    #[must_use]
    pub fn lookup_by_username(&self, username: &str) -> Option<Principal> {
        let id = self.by_username.get(username)?;
        self.principals.get(id.value()).map(|p| p.clone())
    }

    /// Mark a principal online. Idempotent; always refreshes `last_seen`.
    pub fn set_online(&self, id: &str) -> Option<Principal> {
        self.set_status(id, PresenceStatus::Online)
    }

    /// Mark a principal offline. Idempotent; always refreshes `last_seen`.
    pub fn set_offline(&self, id: &str) -> Option<Principal> {
        self.set_status(id, PresenceStatus::Offline)
    }

    /// Set an explicit presence status. Idempotent; refreshes `last_seen`.
    pub fn set_status(&self, id: &str, status: PresenceStatus) -> Option<Principal> {
        let mut principal = self.principals.get_mut(id)?;
        let now = now_millis();
        principal.status = status;
        principal.last_seen = now;
        principal.updated_at = now;
        Some(principal.clone())
    }

    /// Summaries of currently-online principals.
    #[must_use]
    pub fn list_online(&self) -> Vec<UserSummary> {
        self.principals
            .iter()
            .filter(|p| p.status == PresenceStatus::Online)
            .map(|p| p.summary())
            .collect()
    }

    /// Summaries of every registered principal.
    #[must_use]
    pub fn list_all(&self) -> Vec<UserSummary> {
        self.principals.iter().map(|p| p.summary()).collect()
    }

    /// Update profile fields.
    ///
    /// # Errors
    ///
    /// Returns `PrincipalNotFound` if the principal does not exist.
    pub fn update_profile(
        &self,
        id: &str,
        update: ProfileUpdate,
    ) -> Result<Principal, RouterError> {
        let mut principal = self
            .principals
            .get_mut(id)
            .ok_or_else(|| RouterError::PrincipalNotFound(id.to_string()))?;

        if let Some(avatar) = update.avatar {
            principal.avatar = avatar;
        }
        if let Some(email) = update.email {
            self.by_email.remove(&principal.email);
            self.by_email.insert(email.clone(), principal.id.clone());
            principal.email = email;
        }
        principal.updated_at = now_millis();
        Ok(principal.clone())
    }

    /// Number of registered principals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.principals.len()
    }

    /// Whether the directory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.principals.is_empty()
    }
}
