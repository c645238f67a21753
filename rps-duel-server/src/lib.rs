//! # RPS Duel Server
//!
//! Authoritative server for one-on-one rock-paper-scissors duels between
//! connected players.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      RPS DUEL SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Pure primitives                           │
//! │  ├── choice.rs   - Moves, outcomes, the resolver             │
//! │  └── color.rs    - Cosmetic player colour                    │
//! │                                                              │
//! │  game/           - Duel logic (no I/O)                       │
//! │  ├── state.rs    - Per-connection session record             │
//! │  ├── registry.rs - Session registry and opponent search      │
//! │  ├── intent.rs   - Client intents                            │
//! │  ├── events.rs   - Notifications and replication channel     │
//! │  └── battle.rs   - The duel state machine                    │
//! │                                                              │
//! │  network/        - Transport                                 │
//! │  ├── server.rs   - WebSocket server                          │
//! │  ├── session.rs  - Session hub (serialises transitions)      │
//! │  ├── protocol.rs - Message types                             │
//! │  └── auth.rs     - Optional JWT validation                   │
//! │                                                              │
//! │  config.rs       - Environment configuration                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority
//!
//! Clients only submit intents. Every session field is written by the
//! [`game::battle::BattleEngine`], which runs inside a single hub task, so
//! both sides of a pairing always change together. A player's hand is only
//! ever replicated to that player until the duel resolves.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::choice::{compare, Move, Outcome};
pub use game::battle::{BattleEngine, BattleError};
pub use game::registry::MatchCoordinator;
pub use game::state::{ConnectionId, PlayerSession, SessionState};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
