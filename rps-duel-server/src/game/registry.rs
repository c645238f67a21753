//! Match Coordinator
//!
//! Registry of every connected session and the opponent search.
//! Uses BTreeMap so iteration (and therefore matchmaking) is ordered by
//! connection id.

use std::collections::BTreeMap;

use crate::core::color::Color;
use crate::game::state::{ConnectionId, PlayerSession, SessionState};

/// Sessions returned by [`MatchCoordinator::unregister`].
#[derive(Debug, Clone)]
pub struct Unregistered {
    /// The removed session, as it was at removal.
    pub session: PlayerSession,
    /// Sessions that were paired with it and have been reset to idle.
    pub reset: Vec<ConnectionId>,
}

/// Process-wide registry of connected sessions.
///
/// Owned explicitly by the battle engine; there is no global instance.
#[derive(Debug)]
pub struct MatchCoordinator {
    sessions: BTreeMap<ConnectionId, PlayerSession>,
    next_id: u64,
}

impl MatchCoordinator {
    /// Create an empty registry. Ids start at 1.
    pub fn new() -> Self {
        Self {
            sessions: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Register a new idle session and return its id.
    ///
    /// `display_name` defaults to `Player {id}`.
    pub fn register(&mut self, display_name: Option<String>, color: Color) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;

        let name = display_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| PlayerSession::default_name(id));
        self.sessions.insert(id, PlayerSession::new(id, name, color));
        id
    }

    /// Remove a session.
    ///
    /// Any session still pointing at the removed one is forced back to idle,
    /// so no pairing outlives either side.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<Unregistered> {
        let session = self.sessions.remove(&id)?;

        let mut reset = Vec::new();
        for other in self.sessions.values_mut() {
            if other.opponent_id == Some(id) {
                other.reset_battle_state();
                reset.push(other.id);
            }
        }

        Some(Unregistered { session, reset })
    }

    /// Find an idle session other than `challenger`.
    ///
    /// Tie-break: lowest connection id, i.e. the longest-connected idle
    /// participant.
    pub fn find_opponent(&self, challenger: ConnectionId) -> Option<&PlayerSession> {
        self.sessions
            .values()
            .find(|s| s.id != challenger && s.state == SessionState::Idle)
    }

    /// Get a session.
    pub fn get(&self, id: ConnectionId) -> Option<&PlayerSession> {
        self.sessions.get(&id)
    }

    /// Get a session mutably.
    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut PlayerSession> {
        self.sessions.get_mut(&id)
    }

    /// Get two distinct sessions mutably at once, in argument order.
    pub fn get_pair_mut(
        &mut self,
        a: ConnectionId,
        b: ConnectionId,
    ) -> Option<(&mut PlayerSession, &mut PlayerSession)> {
        if a == b {
            return None;
        }

        let (low, high) = if a < b { (a, b) } else { (b, a) };
        let mut span = self.sessions.range_mut(low..=high);
        let (low_id, low_session) = span.next()?;
        let (high_id, high_session) = span.next_back()?;
        if *low_id != low || *high_id != high {
            return None;
        }

        if a < b {
            Some((low_session, high_session))
        } else {
            Some((high_session, low_session))
        }
    }

    /// All registered ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.sessions.keys().copied()
    }

    /// All sessions in ascending id order.
    pub fn sessions(&self) -> impl Iterator<Item = &PlayerSession> {
        self.sessions.values()
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of sessions in `state`.
    pub fn count_in(&self, state: SessionState) -> usize {
        self.sessions.values().filter(|s| s.state == state).count()
    }

    /// Resolve the live opponent of `id`.
    ///
    /// Returns the opponent id only if `id` is paired, the opponent is
    /// registered, points back at `id`, and is in the same state.
    pub fn paired_opponent(&self, id: ConnectionId) -> Option<ConnectionId> {
        let session = self.sessions.get(&id)?;
        let opponent_id = session.opponent_id?;
        let opponent = self.sessions.get(&opponent_id)?;

        let linked = opponent.opponent_id == Some(id)
            && opponent.state == session.state
            && session.state.is_paired();
        linked.then_some(opponent_id)
    }

    /// Check every session's field invariants and the pairing symmetry.
    ///
    /// Returns the first offending session id.
    pub fn verify(&self) -> Result<(), ConnectionId> {
        for session in self.sessions.values() {
            if !session.is_consistent() {
                return Err(session.id);
            }
            if session.state.is_paired() && self.paired_opponent(session.id).is_none() {
                return Err(session.id);
            }
            if session.state.is_paired() {
                // Exactly one challenger per pairing.
                let opponent = session.opponent_id.and_then(|o| self.sessions.get(&o));
                if opponent.map(|o| o.is_challenger == session.is_challenger).unwrap_or(true) {
                    return Err(session.id);
                }
            }
        }
        Ok(())
    }
}

impl Default for MatchCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(count: usize) -> (MatchCoordinator, Vec<ConnectionId>) {
        let mut registry = MatchCoordinator::new();
        let ids = (0..count)
            .map(|_| registry.register(None, Color::WHITE))
            .collect();
        (registry, ids)
    }

    fn pair(registry: &mut MatchCoordinator, a: ConnectionId, b: ConnectionId) {
        let (sa, sb) = registry.get_pair_mut(a, b).unwrap();
        sa.begin_challenge(b, true);
        sb.begin_challenge(a, false);
    }

    #[test]
    fn test_register_assigns_increasing_ids() {
        let (registry, ids) = registry_with(3);
        assert_eq!(ids, vec![ConnectionId(1), ConnectionId(2), ConnectionId(3)]);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get(ids[1]).unwrap().display_name, "Player 2");
    }

    #[test]
    fn test_register_custom_name() {
        let mut registry = MatchCoordinator::new();
        let id = registry.register(Some("alice".into()), Color::WHITE);
        assert_eq!(registry.get(id).unwrap().display_name, "alice");

        let id = registry.register(Some("   ".into()), Color::WHITE);
        assert_eq!(registry.get(id).unwrap().display_name, "Player 2");
    }

    #[test]
    fn test_ids_not_reused() {
        let (mut registry, ids) = registry_with(2);
        registry.unregister(ids[1]);
        let next = registry.register(None, Color::WHITE);
        assert_eq!(next, ConnectionId(3));
    }

    #[test]
    fn test_find_opponent_lowest_idle() {
        let (mut registry, ids) = registry_with(4);

        assert_eq!(registry.find_opponent(ids[0]).map(|s| s.id), Some(ids[1]));
        assert_eq!(registry.find_opponent(ids[1]).map(|s| s.id), Some(ids[0]));

        pair(&mut registry, ids[0], ids[1]);
        assert_eq!(registry.find_opponent(ids[2]).map(|s| s.id), Some(ids[3]));
        assert_eq!(registry.find_opponent(ids[3]).map(|s| s.id), Some(ids[2]));
    }

    #[test]
    fn test_find_opponent_none() {
        let (mut registry, ids) = registry_with(3);
        assert!(registry.find_opponent(ids[0]).is_some());

        pair(&mut registry, ids[1], ids[2]);
        assert!(registry.find_opponent(ids[0]).is_none());

        let (alone, ids) = registry_with(1);
        assert!(alone.find_opponent(ids[0]).is_none());
    }

    #[test]
    fn test_unregister_resets_opponent() {
        let (mut registry, ids) = registry_with(3);
        pair(&mut registry, ids[0], ids[1]);

        let removed = registry.unregister(ids[1]).unwrap();
        assert_eq!(removed.session.id, ids[1]);
        assert_eq!(removed.reset, vec![ids[0]]);

        let survivor = registry.get(ids[0]).unwrap();
        assert_eq!(survivor.state, SessionState::Idle);
        assert!(survivor.opponent_id.is_none());
        assert!(registry.verify().is_ok());
    }

    #[test]
    fn test_unregister_unknown() {
        let (mut registry, ids) = registry_with(1);
        assert!(registry.unregister(ConnectionId(99)).is_none());

        assert!(registry.unregister(ids[0]).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_get_pair_mut() {
        let (mut registry, ids) = registry_with(2);
        assert!(registry.get_pair_mut(ids[0], ids[0]).is_none());
        assert!(registry.get_pair_mut(ids[0], ConnectionId(99)).is_none());

        assert!(registry.get_pair_mut(ConnectionId(99), ids[0]).is_none());

        let (a, b) = registry.get_pair_mut(ids[1], ids[0]).unwrap();
        assert_eq!(a.id, ids[1]);
        assert_eq!(b.id, ids[0]);
    }

    #[test]
    fn test_get_pair_mut_across_gaps() {
        let (mut registry, ids) = registry_with(5);
        registry.unregister(ids[0]);
        registry.unregister(ids[2]);

        let (a, b) = registry.get_pair_mut(ids[1], ids[4]).unwrap();
        assert_eq!((a.id, b.id), (ids[1], ids[4]));
        let (a, b) = registry.get_pair_mut(ids[4], ids[1]).unwrap();
        assert_eq!((a.id, b.id), (ids[4], ids[1]));

        // Either end missing, even with sessions in between.
        assert!(registry.get_pair_mut(ids[0], ids[3]).is_none());
        assert!(registry.get_pair_mut(ids[1], ids[2]).is_none());
    }

    #[test]
    fn test_paired_opponent_and_verify() {
        let (mut registry, ids) = registry_with(3);
        assert!(registry.paired_opponent(ids[0]).is_none());

        pair(&mut registry, ids[0], ids[1]);
        assert_eq!(registry.paired_opponent(ids[0]), Some(ids[1]));
        assert_eq!(registry.paired_opponent(ids[1]), Some(ids[0]));
        assert!(registry.verify().is_ok());

        // Break the back-pointer on one side.
        registry.get_mut(ids[1]).unwrap().opponent_id = Some(ids[2]);
        assert!(registry.paired_opponent(ids[0]).is_none());
        assert!(registry.verify().is_err());
    }

    #[test]
    fn test_count_in() {
        let (mut registry, ids) = registry_with(3);
        pair(&mut registry, ids[0], ids[2]);
        assert_eq!(registry.count_in(SessionState::Idle), 1);
        assert_eq!(registry.count_in(SessionState::WaitingConfirm), 2);
    }
}
