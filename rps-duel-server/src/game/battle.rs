//! Battle Protocol Engine
//!
//! The duel state machine. Every transition is validated against the
//! current session state and applied to both sides of a pairing in one
//! call, so callers never see a half-updated pair.
//!
//! ```text
//!   Idle ──challenge──▶ WaitingConfirm ──accept──▶ Selecting ──both picked──▶ (result) ──▶ Idle
//!                              │                        │
//!                              └──reject──▶ Idle        └──opponent gone──▶ Idle
//! ```
//!
//! The engine is synchronous and owns no I/O. Output goes through a
//! [`ReplicationChannel`]; serialising calls is the caller's job.

use serde::{Serialize, Deserialize};
use tracing::{debug, info, warn};

use crate::core::choice::{Move, Outcome};
use crate::core::color::Color;
use crate::game::events::{Notification, ReplicationChannel, ReplicationUpdate};
use crate::game::intent::Intent;
use crate::game::registry::{MatchCoordinator, Unregistered};
use crate::game::state::{ConnectionId, PlayerSession, SessionState};

/// Why an intent was not applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BattleError {
    /// Precondition not met. Nothing changed.
    #[error("session {id} cannot {action} while {state:?}")]
    InvalidTransition {
        /// Session whose state blocked the transition.
        id: ConnectionId,
        /// Its state at the time.
        state: SessionState,
        /// Attempted action.
        action: &'static str,
    },

    /// The opponent could not be resolved. The requester was reset to idle.
    #[error("session {id} lost its opponent {opponent:?}")]
    DanglingOpponent {
        /// Requesting session.
        id: ConnectionId,
        /// Opponent it pointed at, if any.
        opponent: Option<ConnectionId>,
    },

    /// A challenge named a session that is not registered.
    #[error("session {id} targeted unknown session {target}")]
    UnknownTarget {
        /// Challenger.
        id: ConnectionId,
        /// Missing target.
        target: ConnectionId,
    },

    /// The acting session itself is not registered.
    #[error("unknown session {0}")]
    UnknownSession(ConnectionId),
}

impl BattleError {
    /// Whether this is an ordinary stale or out-of-order request.
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, BattleError::InvalidTransition { .. })
    }
}

/// What happened to a `SelectMove`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Hand locked in, opponent still choosing.
    Waiting,
    /// Hand locked in and the duel resolved.
    Resolved {
        /// Result from the selecting player's side.
        outcome: Outcome,
    },
}

/// Session counts by duel phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Registered sessions.
    pub connected: usize,
    /// Sessions free to duel.
    pub idle: usize,
    /// Sessions in an unanswered challenge.
    pub negotiating: usize,
    /// Sessions picking a hand.
    pub selecting: usize,
}

/// The authoritative duel state machine.
#[derive(Debug, Default)]
pub struct BattleEngine {
    registry: MatchCoordinator,
}

impl BattleEngine {
    /// Create an engine with an empty registry.
    pub fn new() -> Self {
        Self::with_registry(MatchCoordinator::new())
    }

    /// Create an engine around an existing registry.
    pub fn with_registry(registry: MatchCoordinator) -> Self {
        Self { registry }
    }

    /// Read access to the registry.
    pub fn registry(&self) -> &MatchCoordinator {
        &self.registry
    }

    /// Session counts.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            connected: self.registry.len(),
            idle: self.registry.count_in(SessionState::Idle),
            negotiating: self.registry.count_in(SessionState::WaitingConfirm),
            selecting: self.registry.count_in(SessionState::Selecting),
        }
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Register and announce a new participant.
    pub fn connect<C: ReplicationChannel + ?Sized>(
        &mut self,
        display_name: Option<String>,
        color: Color,
        out: &mut C,
    ) -> ConnectionId {
        let id = self.register(display_name, color);
        self.announce(id, out);
        id
    }

    /// Register a new idle participant without telling anyone.
    ///
    /// Lets the transport attach its outbound route before [`announce`]
    /// emits anything for the new id.
    ///
    /// [`announce`]: BattleEngine::announce
    pub fn register(&mut self, display_name: Option<String>, color: Color) -> ConnectionId {
        let id = self.registry.register(display_name, color);
        if let Some(session) = self.registry.get(id) {
            info!(id = %id, name = %session.display_name, color = %session.color.to_hex(), "Session registered");
        }
        id
    }

    /// Send the roster to `id` and `id`'s redacted snapshot to everyone else.
    pub fn announce<C: ReplicationChannel + ?Sized>(&self, id: ConnectionId, out: &mut C) {
        let Some(newcomer) = self.registry.get(id) else {
            return;
        };

        let sessions = self
            .registry
            .sessions()
            .map(|session| {
                if session.id == id {
                    session.snapshot()
                } else {
                    session.snapshot().redacted()
                }
            })
            .collect();
        out.replicate(id, ReplicationUpdate::Snapshot { sessions });

        let public = newcomer.snapshot().redacted();
        for other in self.registry.ids().filter(|other| *other != id) {
            out.replicate(other, ReplicationUpdate::Upsert(public.clone()));
        }
    }

    /// Remove a participant.
    ///
    /// If it was paired, the surviving side is forced back to idle before this
    /// returns.
    pub fn disconnect<C: ReplicationChannel + ?Sized>(
        &mut self,
        id: ConnectionId,
        out: &mut C,
    ) -> Result<Unregistered, BattleError> {
        let removed = self
            .registry
            .unregister(id)
            .ok_or(BattleError::UnknownSession(id))?;

        for target in self.registry.ids() {
            out.replicate(target, ReplicationUpdate::Removed { id });
        }

        for survivor in &removed.reset {
            info!(id = %survivor, departed = %id, "Opponent disconnected, duel cancelled");
            self.publish(*survivor, out);
        }

        info!(id = %id, state = ?removed.session.state, "Session unregistered");
        Ok(removed)
    }

    /// Apply one client intent.
    pub fn handle<C: ReplicationChannel + ?Sized>(
        &mut self,
        id: ConnectionId,
        intent: Intent,
        out: &mut C,
    ) -> Result<(), BattleError> {
        let result = match intent {
            Intent::RequestChallenge => self.request_challenge(id, out).map(|_| ()),
            Intent::ChallengePlayer { target } => self.challenge_player(id, target, out),
            Intent::RespondToChallenge { accept } => self.respond_to_challenge(id, accept, out),
            Intent::SelectMove { choice } => self.select_move(id, choice, out).map(|_| ()),
        };

        debug_assert!(
            self.registry.verify().is_ok(),
            "pairing invariant broken after {}",
            intent.name()
        );

        result
    }

    // =========================================================================
    // TRANSITIONS
    // =========================================================================

    /// Challenge the first idle participant.
    ///
    /// Returns the challenged id, or `None` (after notifying the challenger)
    /// when nobody is free.
    pub fn request_challenge<C: ReplicationChannel + ?Sized>(
        &mut self,
        challenger: ConnectionId,
        out: &mut C,
    ) -> Result<Option<ConnectionId>, BattleError> {
        self.require_state(challenger, SessionState::Idle, "request_challenge")?;

        let Some(target) = self.registry.find_opponent(challenger).map(|s| s.id) else {
            debug!(id = %challenger, "No idle opponent available");
            out.notify(challenger, Notification::ChallengeUnavailable);
            return Ok(None);
        };

        self.start_challenge(challenger, target, out)?;
        Ok(Some(target))
    }

    /// Challenge one named participant.
    pub fn challenge_player<C: ReplicationChannel + ?Sized>(
        &mut self,
        challenger: ConnectionId,
        target: ConnectionId,
        out: &mut C,
    ) -> Result<(), BattleError> {
        self.require_state(challenger, SessionState::Idle, "challenge_player")?;

        if target == challenger {
            return Err(BattleError::InvalidTransition {
                id: challenger,
                state: SessionState::Idle,
                action: "challenge_self",
            });
        }

        let Some(target_state) = self.registry.get(target).map(|s| s.state) else {
            out.notify(challenger, Notification::ChallengeUnavailable);
            return Err(BattleError::UnknownTarget { id: challenger, target });
        };

        if target_state != SessionState::Idle {
            out.notify(challenger, Notification::ChallengeUnavailable);
            return Err(BattleError::InvalidTransition {
                id: target,
                state: target_state,
                action: "be_challenged",
            });
        }

        self.start_challenge(challenger, target, out)
    }

    /// Pair two idle sessions in `WaitingConfirm`.
    fn start_challenge<C: ReplicationChannel + ?Sized>(
        &mut self,
        challenger: ConnectionId,
        target: ConnectionId,
        out: &mut C,
    ) -> Result<(), BattleError> {
        {
            let (a, b) = self
                .registry
                .get_pair_mut(challenger, target)
                .ok_or(BattleError::UnknownTarget { id: challenger, target })?;

            for side in [&*a, &*b] {
                if side.state != SessionState::Idle {
                    return Err(BattleError::InvalidTransition {
                        id: side.id,
                        state: side.state,
                        action: "start_challenge",
                    });
                }
            }

            a.begin_challenge(target, true);
            b.begin_challenge(challenger, false);
        }

        self.publish(challenger, out);
        self.publish(target, out);
        out.notify(challenger, Notification::ChallengeSent { opponent_id: target });
        out.notify(target, Notification::ChallengeReceived { challenger_id: challenger });

        info!(challenger = %challenger, target = %target, "Challenge issued");
        Ok(())
    }

    /// Answer the pending challenge.
    ///
    /// Only the challenged side may accept; either side may decline, which
    /// lets a challenger withdraw.
    pub fn respond_to_challenge<C: ReplicationChannel + ?Sized>(
        &mut self,
        responder: ConnectionId,
        accept: bool,
        out: &mut C,
    ) -> Result<(), BattleError> {
        let session = self.require_state(responder, SessionState::WaitingConfirm, "respond_to_challenge")?;

        if accept && session.is_challenger {
            return Err(BattleError::InvalidTransition {
                id: responder,
                state: session.state,
                action: "accept_own_challenge",
            });
        }

        let opponent = self.live_opponent(responder, out)?;

        if accept {
            if let Some((a, b)) = self.registry.get_pair_mut(responder, opponent) {
                a.begin_selection();
                b.begin_selection();
            }

            self.publish(responder, out);
            self.publish(opponent, out);
            out.notify(responder, Notification::SelectionStarted);
            out.notify(opponent, Notification::SelectionStarted);

            info!(responder = %responder, opponent = %opponent, "Challenge accepted");
        } else {
            self.reset_pair(responder, opponent, out);
            out.notify(responder, Notification::ChallengeRejected);
            out.notify(opponent, Notification::ChallengeRejected);

            info!(responder = %responder, opponent = %opponent, "Challenge rejected");
        }

        Ok(())
    }

    /// Lock in a hand, resolving the duel if the opponent already has one.
    ///
    /// A second selection is rejected and leaves the first hand in place.
    pub fn select_move<C: ReplicationChannel + ?Sized>(
        &mut self,
        player: ConnectionId,
        choice: Move,
        out: &mut C,
    ) -> Result<Selection, BattleError> {
        let session = self.require_state(player, SessionState::Selecting, "select_move")?;

        if session.choice.is_some() {
            return Err(BattleError::InvalidTransition {
                id: player,
                state: session.state,
                action: "select_move_again",
            });
        }

        let opponent = self.live_opponent(player, out)?;

        if let Some(session) = self.registry.get_mut(player) {
            session.choice = Some(choice);
        }
        self.publish(player, out);

        let opponent_ready = self
            .registry
            .get(opponent)
            .map(|s| s.choice.is_some())
            .unwrap_or(false);

        if opponent_ready {
            let outcome = self.resolve(player, opponent, out)?;
            return Ok(Selection::Resolved { outcome });
        }

        out.notify(player, Notification::SelectionWaiting { own_move: choice });
        debug!(id = %player, "Hand locked in, waiting for opponent");
        Ok(Selection::Waiting)
    }

    /// Compare both hands, tell each side, and reset the pair.
    ///
    /// Returns the outcome from `a`'s side; `b` always gets the reverse.
    fn resolve<C: ReplicationChannel + ?Sized>(
        &mut self,
        a: ConnectionId,
        b: ConnectionId,
        out: &mut C,
    ) -> Result<Outcome, BattleError> {
        let (outcome, move_a, move_b) = {
            let (sa, sb) = self
                .registry
                .get_pair_mut(a, b)
                .ok_or(BattleError::DanglingOpponent { id: a, opponent: Some(b) })?;

            let (Some(move_a), Some(move_b)) = (sa.choice, sb.choice) else {
                return Err(BattleError::InvalidTransition {
                    id: a,
                    state: sa.state,
                    action: "resolve",
                });
            };

            sa.state = SessionState::Completed;
            sb.state = SessionState::Completed;
            (Outcome::of(move_a, move_b), move_a, move_b)
        };

        out.notify(a, Notification::BattleResult {
            outcome,
            own_move: move_a,
            opponent_move: move_b,
        });
        out.notify(b, Notification::BattleResult {
            outcome: outcome.reversed(),
            own_move: move_b,
            opponent_move: move_a,
        });

        self.reset_pair(a, b, out);

        info!(
            a = %a, b = %b,
            a_move = %move_a, b_move = %move_b,
            outcome = ?outcome,
            "Duel resolved"
        );
        Ok(outcome)
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    /// Look up `id` and check it is in `expected`.
    fn require_state(
        &self,
        id: ConnectionId,
        expected: SessionState,
        action: &'static str,
    ) -> Result<&PlayerSession, BattleError> {
        let session = self.registry.get(id).ok_or(BattleError::UnknownSession(id))?;
        if session.state != expected {
            return Err(BattleError::InvalidTransition {
                id,
                state: session.state,
                action,
            });
        }
        Ok(session)
    }

    /// Resolve the live opponent of `id`, or reset `id` to idle if the
    /// pairing is broken.
    fn live_opponent<C: ReplicationChannel + ?Sized>(
        &mut self,
        id: ConnectionId,
        out: &mut C,
    ) -> Result<ConnectionId, BattleError> {
        if let Some(opponent) = self.registry.paired_opponent(id) {
            return Ok(opponent);
        }

        let opponent = self.registry.get(id).and_then(|s| s.opponent_id);
        if let Some(session) = self.registry.get_mut(id) {
            session.reset_battle_state();
        }
        self.publish(id, out);

        warn!(id = %id, opponent = ?opponent, "Opponent unreachable, session reset");
        Err(BattleError::DanglingOpponent { id, opponent })
    }

    /// Reset both sides of a pairing and replicate them.
    fn reset_pair<C: ReplicationChannel + ?Sized>(
        &mut self,
        a: ConnectionId,
        b: ConnectionId,
        out: &mut C,
    ) {
        for id in [a, b] {
            if let Some(session) = self.registry.get_mut(id) {
                session.reset_battle_state();
            }
        }
        self.publish(a, out);
        self.publish(b, out);
    }

    /// Replicate `id`: full view to its owner, redacted view to everyone else.
    fn publish<C: ReplicationChannel + ?Sized>(&self, id: ConnectionId, out: &mut C) {
        let Some(session) = self.registry.get(id) else {
            return;
        };

        let full = session.snapshot();
        for target in self.registry.ids() {
            let view = if target == id {
                full.clone()
            } else {
                full.clone().redacted()
            };
            out.replicate(target, ReplicationUpdate::Upsert(view));
        }
    }
}
