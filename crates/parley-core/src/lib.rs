//! # parley-core
//!
//! Connection, presence, and room-routing engine for the parley chat relay.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **PrincipalDirectory** - Registered users and their online state
//! - **RoomRegistry** - Rooms, membership sets, and privacy flags
//! - **MessageLedger** - Append-only message store with edits, soft
//!   deletes, and read receipts
//! - **TypingTracker** - Ephemeral per-room typing indicator sets
//! - **Router** - Connection indices, event dispatch, and fan-out
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│   Router    │────▶│ RoomRegistry│
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                        │        │
//!                        ▼        ▼
//!               ┌─────────────┐ ┌─────────────┐
//!               │  Directory  │ │   Ledger    │
//!               └─────────────┘ └─────────────┘
//! ```
//!
//! The directory, registry, ledger, and typing tracker each own their
//! entities; the router only indexes live connections against them.

pub mod directory;
pub mod error;
pub mod ledger;
pub mod registry;
pub mod router;
pub mod time;
pub mod typing;

pub use directory::{Principal, PrincipalDirectory, ProfileUpdate};
pub use error::RouterError;
pub use ledger::{MessageLedger, RoomMessageStats, StoredMessage};
pub use registry::{Room, RoomRegistry};
pub use router::{private_room_id, ConnectionId, Router, RouterConfig, RouterStats};
pub use typing::{PrunedRoom, TypingTracker};
