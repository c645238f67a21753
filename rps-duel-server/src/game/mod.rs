//! Game Logic Module
//!
//! The duel engine. Synchronous and free of I/O; the network layer feeds it
//! intents and delivers what it emits.
//!
//! ## Module Structure
//!
//! - `state`: Session record, connection ids, replicated view
//! - `registry`: Session registry and opponent search
//! - `intent`: Client intents
//! - `events`: Notifications, replication updates, delivery trait
//! - `battle`: Transitions

pub mod state;
pub mod registry;
pub mod intent;
pub mod events;
pub mod battle;

// Re-export key types
pub use state::{ConnectionId, PlayerSession, ReplicatedState, SessionState};
pub use registry::MatchCoordinator;
pub use intent::Intent;
pub use events::{Notification, ReplicationChannel, ReplicationUpdate};
pub use battle::{BattleEngine, BattleError, Selection};
