//! Room and round model shared by every mini-game.
//!
//! Plain data: who is in a room, which phase it is in, which round is current,
//! and where every participant last stood. The winner predicates and the
//! pre-generation visibility rule live here so every caller evaluates terminal
//! state the same way.

pub mod ids;
pub mod phase;
pub mod room;
pub mod round;
pub mod winner;

pub use ids::{ParticipantId, RoomId, RoundId, UserId};
pub use phase::{GameKind, Phase};
pub use room::{Participant, Room, RoundRef, Snapshot, Vote};
pub use round::{Round, RoundLedger, RoundLedgerError, RoundOutcome, RoundStatus};
pub use winner::{has_winner, winner, winner_by_rank, winner_by_survivor};
