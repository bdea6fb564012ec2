//! Router errors.
//!
//! Every rejected transition maps to exactly one variant here, and is
//! reported as a single `error` event to the originating connection only.

use parley_protocol::ServerEvent;
use thiserror::Error;

/// Errors produced while processing an inbound event.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Malformed or missing required fields. No state is mutated.
    #[error("{0}")]
    Validation(&'static str),

    /// Referenced room does not exist.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Referenced message does not exist.
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Referenced principal does not exist.
    #[error("User not found: {0}")]
    PrincipalNotFound(String),

    /// Private-message recipient does not exist.
    #[error("Recipient not found: {0}")]
    RecipientNotFound(String),

    /// Privacy violation: private room, principal not a member.
    #[error("Access denied to private room")]
    AccessDenied,

    /// Ownership violation: only the sender may edit/delete a message.
    #[error("Forbidden: {0}")]
    Forbidden(&'static str),

    /// Registration collision on username or email.
    #[error("Identity already registered: {0}")]
    DuplicateIdentity(String),
}

impl RouterError {
    /// The wire representation of this rejection.
    #[must_use]
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::Error {
            message: self.to_string(),
        }
    }
}
