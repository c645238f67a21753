//! Client Intents
//!
//! What a participant may ask the engine to do. Each intent carries only
//! its payload; the acting session is supplied by the transport.

use serde::{Serialize, Deserialize};

use crate::core::choice::Move;
use crate::game::state::ConnectionId;

/// A request from a client to change its duel state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    /// Challenge any idle participant.
    RequestChallenge,
    /// Challenge one specific participant.
    ChallengePlayer {
        /// Participant to challenge.
        target: ConnectionId,
    },
    /// Accept or decline the pending challenge.
    RespondToChallenge {
        /// `true` to start selecting, `false` to call it off.
        accept: bool,
    },
    /// Lock in a hand.
    SelectMove {
        /// The hand.
        #[serde(rename = "move")]
        choice: Move,
    },
}

impl Intent {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Intent::RequestChallenge => "request_challenge",
            Intent::ChallengePlayer { .. } => "challenge_player",
            Intent::RespondToChallenge { .. } => "respond_to_challenge",
            Intent::SelectMove { .. } => "select_move",
        }
    }
}
