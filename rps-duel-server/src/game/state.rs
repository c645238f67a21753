//! Session State Definitions
//!
//! The authoritative per-connection duel record and its replicated view.
//! A pairing is never stored on its own: it is two sessions whose
//! `opponent_id` fields name each other.

use serde::{Serialize, Deserialize};
use std::fmt;

use crate::core::choice::Move;
use crate::core::color::Color;

// =============================================================================
// CONNECTION ID
// =============================================================================

/// Stable identifier of one connected participant.
///
/// Assigned monotonically on register and never reused, so ordering by id is
/// ordering by registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// SESSION STATE
// =============================================================================

/// Duel status of one participant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Free to challenge or be challenged.
    #[default]
    Idle,
    /// Challenge issued, waiting for the challenged side to answer.
    WaitingConfirm,
    /// Challenge accepted, hands are being collected.
    Selecting,
    /// Both hands are in and the result is being delivered. Only held inside
    /// a single resolve step; sessions are back to `Idle` before it ends.
    Completed,
}

impl SessionState {
    /// Whether a session in this state must be paired.
    #[inline]
    pub fn is_paired(self) -> bool {
        matches!(self, SessionState::WaitingConfirm | SessionState::Selecting)
    }
}

// =============================================================================
// PLAYER SESSION
// =============================================================================

/// Server-side record of one connected participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerSession {
    /// Connection identifier.
    pub id: ConnectionId,
    /// Name shown above the avatar.
    pub display_name: String,
    /// Cosmetic colour.
    pub color: Color,
    /// Duel status.
    pub state: SessionState,
    /// Opponent, set iff `state` is paired.
    pub opponent_id: Option<ConnectionId>,
    /// Chosen hand; `None` until picked during `Selecting`.
    pub choice: Option<Move>,
    /// Whether this side issued the challenge. Meaningless while unpaired.
    pub is_challenger: bool,
}

impl PlayerSession {
    /// Create a fresh idle session.
    pub fn new(id: ConnectionId, display_name: impl Into<String>, color: Color) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            color,
            state: SessionState::Idle,
            opponent_id: None,
            choice: None,
            is_challenger: false,
        }
    }

    /// Default display name for a connection.
    pub fn default_name(id: ConnectionId) -> String {
        format!("Player {}", id)
    }

    /// Drop every duel field back to its idle default.
    pub fn reset_battle_state(&mut self) {
        self.state = SessionState::Idle;
        self.opponent_id = None;
        self.choice = None;
        self.is_challenger = false;
    }

    /// Enter `WaitingConfirm` against `opponent`.
    pub(crate) fn begin_challenge(&mut self, opponent: ConnectionId, is_challenger: bool) {
        self.state = SessionState::WaitingConfirm;
        self.opponent_id = Some(opponent);
        self.choice = None;
        self.is_challenger = is_challenger;
    }

    /// Enter `Selecting` with no hand chosen.
    pub(crate) fn begin_selection(&mut self) {
        self.state = SessionState::Selecting;
        self.choice = None;
    }

    /// Check the per-session field invariants (not the pairing symmetry).
    pub fn is_consistent(&self) -> bool {
        let paired = self.state.is_paired();
        let opponent_ok = paired == self.opponent_id.is_some()
            && self.opponent_id != Some(self.id);
        let choice_ok = self.choice.is_none() || self.state == SessionState::Selecting;
        let challenger_ok = paired || !self.is_challenger;
        opponent_ok && choice_ok && challenger_ok
    }

    /// Full replicated view, as pushed to the owning client.
    pub fn snapshot(&self) -> ReplicatedState {
        ReplicatedState {
            id: self.id,
            display_name: self.display_name.clone(),
            color: self.color,
            state: self.state,
            opponent_id: self.opponent_id,
            choice: self.choice,
            is_challenger: self.is_challenger,
        }
    }
}

// =============================================================================
// REPLICATED STATE
// =============================================================================

/// Replicated fields of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicatedState {
    /// Session the fields belong to.
    pub id: ConnectionId,
    /// Display name.
    pub display_name: String,
    /// Cosmetic colour.
    pub color: Color,
    /// Duel status.
    pub state: SessionState,
    /// Opponent, if paired.
    pub opponent_id: Option<ConnectionId>,
    /// Chosen hand. Always `None` in views sent to anyone but the owner.
    #[serde(rename = "move")]
    pub choice: Option<Move>,
    /// Whether this side issued the challenge.
    pub is_challenger: bool,
}

impl ReplicatedState {
    /// The view other clients get: identical but without the hand.
    pub fn redacted(mut self) -> Self {
        self.choice = None;
        self
    }
}
