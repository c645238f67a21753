//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Messages are JSON objects tagged by `type`. Binary frames carry the same
//! JSON as UTF-8 bytes.

use serde::{Serialize, Deserialize};

use crate::core::choice::Move;
use crate::core::color::Color;
use crate::game::events::{Notification, ReplicationUpdate};
use crate::game::intent::Intent;
use crate::game::state::ConnectionId;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Present a bearer token. Must be the first frame when auth is enabled.
    Auth {
        /// JWT.
        token: String,
    },

    /// Challenge any idle participant.
    RequestChallenge,

    /// Challenge one participant by id.
    ChallengePlayer {
        /// Participant to challenge.
        target: ConnectionId,
    },

    /// Accept or decline the pending challenge.
    RespondToChallenge {
        /// Whether to accept.
        accept: bool,
    },

    /// Lock in a hand.
    SelectMove {
        /// The hand.
        #[serde(rename = "move")]
        choice: Move,
    },

    /// Ping for latency measurement.
    Ping { timestamp: u64 },
}

impl ClientMessage {
    /// The duel intent carried by this message, if any.
    pub fn to_intent(&self) -> Option<Intent> {
        match self {
            ClientMessage::RequestChallenge => Some(Intent::RequestChallenge),
            ClientMessage::ChallengePlayer { target } => {
                Some(Intent::ChallengePlayer { target: *target })
            }
            ClientMessage::RespondToChallenge { accept } => {
                Some(Intent::RespondToChallenge { accept: *accept })
            }
            ClientMessage::SelectMove { choice } => Some(Intent::SelectMove { choice: *choice }),
            ClientMessage::Auth { .. } | ClientMessage::Ping { .. } => None,
        }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Registration succeeded.
    Welcome(WelcomeInfo),

    /// Replicated session change.
    Replicate(ReplicationUpdate),

    /// Targeted duel notification.
    Notify(Notification),

    /// Pong response.
    Pong { timestamp: u64, server_time: u64 },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown { reason: String },
}

/// Sent once after a connection is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomeInfo {
    /// Id assigned to this connection.
    pub connection_id: ConnectionId,
    /// Display name assigned to this connection.
    pub display_name: String,
    /// Cosmetic colour assigned to this connection.
    pub color: Color,
    /// Server version.
    pub server_version: String,
    /// Server wall clock, Unix milliseconds.
    pub server_time: u64,
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Sent something other than `auth` while auth was required.
    NotAuthenticated,
    /// JWT token has expired.
    TokenExpired,
    /// Invalid input.
    InvalidInput,
    /// Server overloaded.
    ServerOverloaded,
}

impl ServerMessage {
    /// Build an error message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError {
            code,
            message: message.into(),
        })
    }

    /// Build a pong echoing the client's timestamp.
    pub fn pong(timestamp: u64) -> Self {
        ServerMessage::Pong {
            timestamp,
            server_time: now_millis(),
        }
    }
}

/// Current Unix time in milliseconds.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Deserialize from a binary frame holding JSON bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::choice::Outcome;
    use crate::game::state::{ReplicatedState, SessionState};

    #[test]
    fn test_client_message_wire_names() {
        let msg = ClientMessage::from_json(r#"{"type":"select_move","move":"paper"}"#).unwrap();
        assert_eq!(msg, ClientMessage::SelectMove { choice: Move::Paper });

        let msg = ClientMessage::from_json(r#"{"type":"challenge_player","target":7}"#).unwrap();
        assert_eq!(msg, ClientMessage::ChallengePlayer { target: ConnectionId(7) });

        let msg = ClientMessage::from_json(r#"{"type":"request_challenge"}"#).unwrap();
        assert_eq!(msg.to_intent(), Some(Intent::RequestChallenge));
    }

    #[test]
    fn test_unknown_move_rejected() {
        assert!(ClientMessage::from_json(r#"{"type":"select_move","move":"lizard"}"#).is_err());
        assert!(ClientMessage::from_json(r#"{"type":"select_move","move":null}"#).is_err());
        assert!(ClientMessage::from_json(r#"{"type":"dance"}"#).is_err());
    }

    #[test]
    fn test_binary_frame_is_json_bytes() {
        let msg = ClientMessage::from_slice(br#"{"type":"respond_to_challenge","accept":true}"#).unwrap();
        assert_eq!(msg.to_intent(), Some(Intent::RespondToChallenge { accept: true }));
    }

    #[test]
    fn test_non_intent_messages() {
        assert_eq!(ClientMessage::Ping { timestamp: 1 }.to_intent(), None);
        assert_eq!(ClientMessage::Auth { token: "t".into() }.to_intent(), None);
    }

    #[test]
    fn test_replicate_wire_shape() {
        let msg = ServerMessage::Replicate(ReplicationUpdate::Upsert(ReplicatedState {
            id: ConnectionId(3),
            display_name: "Player 3".into(),
            color: Color::new(10, 20, 30),
            state: SessionState::WaitingConfirm,
            opponent_id: Some(ConnectionId(4)),
            choice: None,
            is_challenger: true,
        }));

        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "replicate");
        assert_eq!(value["op"], "upsert");
        assert_eq!(value["state"], "waiting_confirm");
        assert_eq!(value["opponent_id"], 4);
        assert!(value["move"].is_null());

        assert_eq!(ServerMessage::from_json(&msg.to_json().unwrap()).unwrap(), msg);
    }

    #[test]
    fn test_notify_wire_shape() {
        let msg = ServerMessage::Notify(Notification::BattleResult {
            outcome: Outcome::Lose,
            own_move: Move::Scissors,
            opponent_move: Move::Rock,
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"notify""#));
        assert!(json.contains(r#""event":"battle_result""#));
        assert!(json.contains(r#""outcome":"lose""#));

        let json = ServerMessage::Notify(Notification::ChallengeUnavailable).to_json().unwrap();
        assert!(json.contains("challenge_unavailable"));
    }

    #[test]
    fn test_error_codes() {
        let json = ServerMessage::error(ErrorCode::AuthFailed, "Invalid token").to_json().unwrap();
        assert!(json.contains("auth_failed"));
        assert!(json.contains("Invalid token"));
    }

    #[test]
    fn test_pong_echoes_timestamp() {
        match ServerMessage::pong(42) {
            ServerMessage::Pong { timestamp, server_time } => {
                assert_eq!(timestamp, 42);
                assert!(server_time > 0);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }
}
