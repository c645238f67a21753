//! Duel Notifications and Replication
//!
//! Everything the engine emits goes through a [`ReplicationChannel`]:
//! replicated-field updates and one-shot targeted notifications. The
//! engine never knows how they are delivered.

use serde::{Serialize, Deserialize};

use crate::core::choice::{Move, Outcome};
use crate::game::state::{ConnectionId, ReplicatedState};

/// One-shot message for exactly one participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// Your challenge was delivered.
    ChallengeSent {
        /// Who you challenged.
        opponent_id: ConnectionId,
    },
    /// Someone challenged you.
    ChallengeReceived {
        /// Who challenged you.
        challenger_id: ConnectionId,
    },
    /// No idle participant could take your challenge.
    ChallengeUnavailable,
    /// The challenge was declined (by either side).
    ChallengeRejected,
    /// Both sides accepted; pick a hand.
    SelectionStarted,
    /// Your hand is locked in, the opponent has not picked yet.
    SelectionWaiting {
        /// Your hand.
        own_move: Move,
    },
    /// The duel is over.
    BattleResult {
        /// Result from your side.
        outcome: Outcome,
        /// Your hand.
        own_move: Move,
        /// Opponent's hand.
        opponent_move: Move,
    },
}

/// Change to a replicated session as seen by one client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ReplicationUpdate {
    /// Every session this client can see, sent once after it connects.
    Snapshot {
        /// Sessions in ascending id order.
        sessions: Vec<ReplicatedState>,
    },
    /// Session fields changed (or the session is new to this client).
    Upsert(ReplicatedState),
    /// Session left.
    Removed {
        /// Departed session.
        id: ConnectionId,
    },
}

/// Delivery capability supplied by the transport.
///
/// Calls for the same `target` must reach that client in call order.
pub trait ReplicationChannel {
    /// Push a replicated-field change to `target`.
    fn replicate(&mut self, target: ConnectionId, update: ReplicationUpdate);

    /// Deliver a targeted notification to `target`.
    fn notify(&mut self, target: ConnectionId, notification: Notification);
}

/// Anything recorded by a [`RecordingChannel`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Emitted {
    /// A replication push.
    Replicate(ConnectionId, ReplicationUpdate),
    /// A notification.
    Notify(ConnectionId, Notification),
}

impl Emitted {
    /// Recipient.
    pub fn target(&self) -> ConnectionId {
        match self {
            Emitted::Replicate(t, _) | Emitted::Notify(t, _) => *t,
        }
    }
}

/// In-memory channel that keeps everything in emission order.
#[derive(Debug, Default)]
pub struct RecordingChannel {
    /// Everything emitted so far.
    pub emitted: Vec<Emitted>,
}

impl RecordingChannel {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications delivered to `target`, in order.
    pub fn notifications_for(&self, target: ConnectionId) -> Vec<Notification> {
        self.emitted
            .iter()
            .filter_map(|e| match e {
                Emitted::Notify(t, n) if *t == target => Some(n.clone()),
                _ => None,
            })
            .collect()
    }

    /// Replication updates delivered to `target`, in order.
    pub fn updates_for(&self, target: ConnectionId) -> Vec<ReplicationUpdate> {
        self.emitted
            .iter()
            .filter_map(|e| match e {
                Emitted::Replicate(t, u) if *t == target => Some(u.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&mut self) {
        self.emitted.clear();
    }

    /// Take everything recorded so far.
    pub fn drain(&mut self) -> Vec<Emitted> {
        std::mem::take(&mut self.emitted)
    }
}

impl ReplicationChannel for RecordingChannel {
    fn replicate(&mut self, target: ConnectionId, update: ReplicationUpdate) {
        self.emitted.push(Emitted::Replicate(target, update));
    }

    fn notify(&mut self, target: ConnectionId, notification: Notification) {
        self.emitted.push(Emitted::Notify(target, notification));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_filters_by_target() {
        let mut channel = RecordingChannel::new();
        channel.notify(ConnectionId(1), Notification::SelectionStarted);
        channel.notify(ConnectionId(2), Notification::ChallengeRejected);
        channel.replicate(ConnectionId(1), ReplicationUpdate::Removed { id: ConnectionId(3) });

        assert_eq!(
            channel.notifications_for(ConnectionId(1)),
            vec![Notification::SelectionStarted]
        );
        assert_eq!(channel.updates_for(ConnectionId(2)), vec![]);
        assert_eq!(channel.drain().len(), 3);
        assert!(channel.emitted.is_empty());
    }

    #[test]
    fn test_battle_result_wire_shape() {
        let json = serde_json::to_value(Notification::BattleResult {
            outcome: Outcome::Win,
            own_move: Move::Rock,
            opponent_move: Move::Scissors,
        })
        .unwrap();

        assert_eq!(json["event"], "battle_result");
        assert_eq!(json["outcome"], "win");
        assert_eq!(json["own_move"], "rock");
        assert_eq!(json["opponent_move"], "scissors");
    }
}
