//! Room phases and the transitions between them.

use serde::{Deserialize, Serialize};

/// Which mini-game a room runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameKind {
    /// Dice-driven race along a track.
    Race,
    /// Elimination voting between contributed movie cards.
    Battle,
    /// Spinning wheel that knocks out one sector per spin.
    Wheel,
}

/// Lifecycle phase of a room.
///
/// Battle: `Created -> Collecting -> Generating -> Voting (per round) -> Finished`.
/// Race and wheel: `Created -> Running (per round) -> Finished`.
/// `Cancelled` is reachable from every phase before `Finished` and absorbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Room exists, nobody has contributed yet.
    Created,
    /// Participants are adding their entries.
    Collecting,
    /// Entries are being generated/disguised by the service.
    Generating,
    /// Battle rounds: one ballot per participant per round.
    Voting,
    /// Race and wheel rounds are being played.
    Running,
    /// A winner is decided.
    Finished,
    /// Abandoned before finishing.
    Cancelled,
}

impl Phase {
    /// `true` for `Finished` and `Cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Finished | Phase::Cancelled)
    }

    /// `true` while entries are still private to their contributors.
    pub fn precedes_generation(self) -> bool {
        matches!(self, Phase::Created | Phase::Collecting)
    }

    /// `true` when rounds are being played.
    pub fn is_in_play(self) -> bool {
        matches!(self, Phase::Voting | Phase::Running)
    }

    /// Whether `self -> next` is a legal move of the phase machine.
    ///
    /// Staying in `Voting` or `Running` is legal: both loop once per round.
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (Finished | Cancelled, _) => false,
            (_, Cancelled) => true,
            (Created, Collecting | Running) => true,
            (Collecting, Generating) => true,
            (Generating, Voting) => true,
            (Voting, Voting | Finished) => true,
            (Running, Running | Finished) => true,
            _ => false,
        }
    }

    /// Whether `next` lies somewhere ahead of `self` on the phase machine,
    /// possibly several moves away. Terminal phases reach nothing.
    pub fn can_reach(self, next: Phase) -> bool {
        let mut seen = vec![self];
        let mut frontier = vec![self];
        while let Some(phase) = frontier.pop() {
            for candidate in Phase::ALL {
                if phase.can_transition_to(candidate) {
                    if candidate == next {
                        return true;
                    }
                    if !seen.contains(&candidate) {
                        seen.push(candidate);
                        frontier.push(candidate);
                    }
                }
            }
        }
        false
    }

    pub const ALL: [Phase; 7] = [
        Phase::Created,
        Phase::Collecting,
        Phase::Generating,
        Phase::Voting,
        Phase::Running,
        Phase::Finished,
        Phase::Cancelled,
    ];
}
