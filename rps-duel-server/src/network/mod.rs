//! Network Layer
//!
//! WebSocket transport for the duel engine. All state changes are delegated
//! to `game/` through the session hub.

pub mod auth;
pub mod protocol;
pub mod session;
pub mod server;

pub use auth::{AuthConfig, TokenClaims, AuthError, validate_token};
pub use protocol::{ClientMessage, ServerMessage, ErrorCode};
pub use session::{SessionHub, HubHandle, HubError};
pub use server::{DuelServer, DuelServerError};
