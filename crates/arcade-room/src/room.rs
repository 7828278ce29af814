//! Room, participant and ballot data as delivered by snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{ParticipantId, RoomId, RoundId, UserId};
use crate::phase::{GameKind, Phase};

// ---------------------------------------------------------------------------
// RoundRef
// ---------------------------------------------------------------------------

/// The round a room is currently in.
///
/// `number` is what staleness is judged by; `id` is what `round:results`
/// events are matched against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundRef {
    /// Opaque round token.
    pub id: RoundId,
    /// Monotonic round counter, starting at 1.
    pub number: u32,
}

impl RoundRef {
    /// Round `number` with the token an initiator would allocate for it.
    pub fn numbered(number: u32) -> Self {
        Self {
            id: RoundId::for_number(number),
            number,
        }
    }
}

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

/// One racer, movie card or wheel sector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Entity identifier.
    pub id: ParticipantId,
    /// The user who owns or contributed this entity.
    pub user_id: UserId,
    /// Cell on the track (race); unused by battle and wheel.
    #[serde(default)]
    pub position: i64,
    /// Knocked out of the game.
    #[serde(default)]
    pub is_eliminated: bool,
    /// Round in which the entity was knocked out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eliminated_at_round: Option<u32>,
    /// Finishing place once the game is decided; `Some(1)` is the winner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_rank: Option<u32>,
}

impl Participant {
    /// A fresh, active participant at position 0.
    pub fn new(id: impl Into<ParticipantId>, user_id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            position: 0,
            is_eliminated: false,
            eliminated_at_round: None,
            final_rank: None,
        }
    }

    /// Builder-style position setter.
    pub fn at(mut self, position: i64) -> Self {
        self.position = position;
        self
    }

    /// Builder-style elimination marker.
    pub fn eliminated_in(mut self, round: u32) -> Self {
        self.is_eliminated = true;
        self.eliminated_at_round = Some(round);
        self
    }

    /// Builder-style rank setter.
    pub fn ranked(mut self, rank: u32) -> Self {
        self.final_rank = Some(rank);
        self
    }
}

// ---------------------------------------------------------------------------
// Vote
// ---------------------------------------------------------------------------

/// A ballot cast in a battle round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    /// Round the ballot belongs to.
    pub round_number: u32,
    /// Who voted.
    pub user_id: UserId,
    /// The entity voted for.
    pub target_id: ParticipantId,
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// A live room as last reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    /// Room identifier.
    pub id: RoomId,
    /// Which mini-game the room runs.
    pub kind: GameKind,
    /// Current lifecycle phase.
    pub phase: Phase,
    /// Every racer / card / sector in the room.
    #[serde(default)]
    pub participants: Vec<Participant>,
    /// Round in progress, if any has started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_round: Option<RoundRef>,
    /// Capacity of the room.
    pub max_participants: u32,
    /// User who created the room.
    pub creator_id: UserId,
    /// Ballots known for the current and earlier rounds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub votes: Vec<Vote>,
    /// Race track length; the finish cell is `track_length - 1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_length: Option<i64>,
}

/// A full authoritative room fetched by request/response.
pub type Snapshot = Room;

impl Room {
    /// New empty room in [`Phase::Created`].
    pub fn new(
        id: impl Into<RoomId>,
        kind: GameKind,
        creator_id: impl Into<UserId>,
        max_participants: u32,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            phase: Phase::Created,
            participants: Vec::new(),
            current_round: None,
            max_participants,
            creator_id: creator_id.into(),
            votes: Vec::new(),
            track_length: None,
        }
    }

    /// Number of the current round, `0` before the first round opens.
    pub fn round_number(&self) -> u32 {
        self.current_round.as_ref().map_or(0, |round| round.number)
    }

    /// Look up a participant by id.
    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == id)
    }

    /// Mutable lookup by id.
    pub fn participant_mut(&mut self, id: &ParticipantId) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| &p.id == id)
    }

    /// The entity owned by `user`, if any.
    pub fn participant_of(&self, user: &UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.user_id == user)
    }

    /// Participants still in the game.
    pub fn active(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(|p| !p.is_eliminated)
    }

    /// Position of every participant keyed by id.
    pub fn positions(&self) -> BTreeMap<ParticipantId, i64> {
        self.participants
            .iter()
            .map(|p| (p.id.clone(), p.position))
            .collect()
    }

    /// Whether `user` already voted in round `round_number`.
    pub fn has_voted(&self, user: &UserId, round_number: u32) -> bool {
        self.votes
            .iter()
            .any(|v| v.round_number == round_number && &v.user_id == user)
    }

    /// Distinct users with an owned participant who have not voted in
    /// `round_number` yet.
    pub fn pending_voters(&self, round_number: u32) -> Vec<&UserId> {
        let mut pending: Vec<&UserId> = self
            .participants
            .iter()
            .map(|p| &p.user_id)
            .filter(|user| !self.has_voted(user, round_number))
            .collect();
        pending.sort();
        pending.dedup();
        pending
    }

    /// Close a race: rank `ranked` in arrival order and retire everyone but
    /// the first of them in `round_number`.
    pub fn finish_race(&mut self, ranked: &[ParticipantId], round_number: u32) {
        self.phase = Phase::Finished;
        for (rank, id) in (1u32..).zip(ranked) {
            if let Some(entry) = self.participant_mut(id) {
                entry.final_rank = Some(rank);
            }
        }
        let Some(winner) = ranked.first() else {
            return;
        };
        for entry in self
            .participants
            .iter_mut()
            .filter(|p| &p.id != winner && !p.is_eliminated)
        {
            entry.is_eliminated = true;
            entry.eliminated_at_round = Some(round_number);
        }
    }

    /// Copy of the room as `viewer` may see it.
    ///
    /// While the phase precedes generation, entries contributed by other users
    /// are withheld. This is a presentation rule; the server still holds them.
    pub fn visible_to(&self, viewer: &UserId) -> Room {
        if !self.phase.precedes_generation() {
            return self.clone();
        }
        let mut visible = self.clone();
        visible.participants.retain(|p| &p.user_id == viewer);
        visible
    }
}
