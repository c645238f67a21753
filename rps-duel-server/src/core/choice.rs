//! Moves and Outcome Resolution
//!
//! The three playable hands and the pure comparison that decides a duel.
//! A session that has not chosen yet holds `Option::<Move>::None`; this
//! module only ever sees concrete hands.

use serde::{Serialize, Deserialize};
use std::fmt;

/// A playable hand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Move {
    /// Beats scissors.
    Rock = 1,
    /// Beats rock.
    Paper = 2,
    /// Beats paper.
    Scissors = 3,
}

impl Move {
    /// Every playable hand, in wire order.
    pub const ALL: [Move; 3] = [Move::Rock, Move::Paper, Move::Scissors];

    /// The hand this one defeats.
    #[inline]
    pub const fn beats(self) -> Move {
        match self {
            Move::Rock => Move::Scissors,
            Move::Scissors => Move::Paper,
            Move::Paper => Move::Rock,
        }
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Move::Rock => "rock",
            Move::Paper => "paper",
            Move::Scissors => "scissors",
        };
        f.write_str(name)
    }
}

/// Compare two hands from `a`'s perspective.
///
/// Returns `1` if `a` wins, `-1` if `a` loses and `0` on a draw.
/// Total and side-effect free.
#[inline]
pub fn compare(a: Move, b: Move) -> i8 {
    if a == b {
        0
    } else if a.beats() == b {
        1
    } else {
        -1
    }
}

/// Result of a duel as seen by one participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// This side won.
    Win,
    /// This side lost.
    Lose,
    /// Both sides played the same hand.
    Draw,
}

impl Outcome {
    /// Map a `compare` score onto an outcome. Any positive score is a win.
    pub fn from_score(score: i8) -> Self {
        match score.signum() {
            1 => Outcome::Win,
            -1 => Outcome::Lose,
            _ => Outcome::Draw,
        }
    }

    /// Resolve `own` against `other`.
    pub fn of(own: Move, other: Move) -> Self {
        Self::from_score(compare(own, other))
    }

    /// The same duel seen from the other side.
    pub fn reversed(self) -> Self {
        match self {
            Outcome::Win => Outcome::Lose,
            Outcome::Lose => Outcome::Win,
            Outcome::Draw => Outcome::Draw,
        }
    }

    /// Signed score, `+1` / `0` / `-1`.
    pub fn score(self) -> i8 {
        match self {
            Outcome::Win => 1,
            Outcome::Lose => -1,
            Outcome::Draw => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_move() -> impl Strategy<Value = Move> {
        prop_oneof![Just(Move::Rock), Just(Move::Paper), Just(Move::Scissors)]
    }

    #[test]
    fn test_cycle() {
        assert_eq!(compare(Move::Rock, Move::Scissors), 1);
        assert_eq!(compare(Move::Scissors, Move::Paper), 1);
        assert_eq!(compare(Move::Paper, Move::Rock), 1);

        assert_eq!(compare(Move::Scissors, Move::Rock), -1);
        assert_eq!(compare(Move::Paper, Move::Scissors), -1);
        assert_eq!(compare(Move::Rock, Move::Paper), -1);
    }

    #[test]
    fn test_each_move_beats_exactly_one() {
        for a in Move::ALL {
            let wins = Move::ALL.iter().filter(|&&b| compare(a, b) == 1).count();
            let losses = Move::ALL.iter().filter(|&&b| compare(a, b) == -1).count();
            assert_eq!(wins, 1, "{a} should beat exactly one hand");
            assert_eq!(losses, 1, "{a} should lose to exactly one hand");
        }
    }

    #[test]
    fn test_outcome_mapping() {
        assert_eq!(Outcome::from_score(1), Outcome::Win);
        assert_eq!(Outcome::from_score(0), Outcome::Draw);
        assert_eq!(Outcome::from_score(-1), Outcome::Lose);
        assert_eq!(Outcome::of(Move::Rock, Move::Scissors), Outcome::Win);
        assert_eq!(Outcome::Draw.reversed(), Outcome::Draw);
        assert_eq!(Outcome::Win.reversed().score(), -1);
    }

    #[test]
    fn test_move_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Move::Scissors).unwrap(), "\"scissors\"");
        let parsed: Move = serde_json::from_str("\"rock\"").unwrap();
        assert_eq!(parsed, Move::Rock);
    }

    proptest! {
        #[test]
        fn prop_compare_is_antisymmetric(a in any_move(), b in any_move()) {
            prop_assert_eq!(compare(a, b), -compare(b, a));
        }

        #[test]
        fn prop_compare_self_is_draw(a in any_move()) {
            prop_assert_eq!(compare(a, a), 0);
        }

        #[test]
        fn prop_outcome_reversal_matches_swap(a in any_move(), b in any_move()) {
            prop_assert_eq!(Outcome::of(a, b).reversed(), Outcome::of(b, a));
        }
    }
}
