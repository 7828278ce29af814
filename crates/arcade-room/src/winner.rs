//! Terminal-state detection.
//!
//! Different services mark a decided game differently: some assign
//! `final_rank == 1`, some only leave a single participant standing. Both
//! strategies are always evaluated, so a payload that satisfies either one is
//! treated as decided.

use crate::phase::Phase;
use crate::room::{Participant, Room};

/// The participant holding rank 1, if any.
pub fn winner_by_rank(room: &Room) -> Option<&Participant> {
    room.participants.iter().find(|p| p.final_rank == Some(1))
}

/// The single participant still standing, if exactly one is.
pub fn winner_by_survivor(room: &Room) -> Option<&Participant> {
    let mut active = room.active();
    match (active.next(), active.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    }
}

/// The decided winner of a finished room, rank strategy first.
///
/// `None` unless the phase is [`Phase::Finished`].
pub fn winner(room: &Room) -> Option<&Participant> {
    if room.phase != Phase::Finished {
        return None;
    }
    winner_by_rank(room).or_else(|| winner_by_survivor(room))
}

/// Whether `room` is terminal with a decided winner.
pub fn has_winner(room: &Room) -> bool {
    winner(room).is_some()
}
