//! What a room tells its observers.

use std::collections::BTreeMap;

use arcade_animation::Frame;
use arcade_net::MatchFinish;
use arcade_room::{ParticipantId, Room, RoundId};

/// Broadcast by a room actor to every subscriber of [`crate::RoomHandle::notices`].
#[derive(Debug, Clone, PartialEq)]
pub enum RoomNotice {
    /// The reconciled model changed.
    ModelChanged(Room),
    /// The initiator's values for a round, as sent or received.
    RoundResults {
        round_id: RoundId,
        values: BTreeMap<ParticipantId, u32>,
    },
    /// A wheel spin to animate.
    WheelSpun {
        rotation: f64,
        eliminated: ParticipantId,
    },
    /// A battle round knocked out an entry.
    RoundEliminated {
        round_number: u32,
        participant: ParticipantId,
    },
    /// One shared animation tick.
    AnimationFrame(Frame),
    /// The running walk reached its targets.
    AnimationComplete,
    /// The match is decided; sent after any running animation completes.
    MatchFinished(MatchFinish),
    /// Something the user should read, e.g. a failed request.
    Message(String),
}
