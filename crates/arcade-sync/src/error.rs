//! Errors surfaced to callers of the room API.

use arcade_room::{GameKind, ParticipantId, Phase, UserId};

/// Why a local turn action was refused before anything was sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TurnError {
    #[error("room is not loaded yet")]
    NotLoaded,

    #[error("user {user} may not act in this room")]
    NotEligible { user: UserId },

    #[error("action needs a {expected:?} room, this one is {actual:?}")]
    WrongGame { expected: GameKind, actual: GameKind },

    #[error("cannot {action} while the room is {phase:?}")]
    WrongPhase { action: &'static str, phase: Phase },

    #[error("already voted in round {0}")]
    AlreadyVoted(u32),

    #[error("no active participant {0}")]
    UnknownTarget(ParticipantId),

    #[error("a move is already waiting for confirmation")]
    MoveInFlight,

    #[error("room actor has stopped")]
    ActorGone,
}
