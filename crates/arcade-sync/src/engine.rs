//! Reconciliation: the only place a room model is mutated.
//!
//! Every [`Update`], whether a fetched snapshot or something derived from a
//! pushed event, is first projected onto the held model to produce a
//! candidate room. The candidate is then judged by one rule set:
//!
//! 1. A held model that already has a winner is only replaced by a candidate
//!    that also has one (the terminal-state ratchet).
//! 2. A candidate whose phase the held phase cannot reach is illegal, so a
//!    cancelled or finished room never comes back into play.
//! 3. A candidate whose round number is lower than the held one is stale.
//! 4. Anything else is merged, and the positions before and after are
//!    returned for animation.
//!
//! Consecutive rejections are counted. Once the count reaches the staleness
//! budget, [`ReconciliationEngine::needs_resync`] reports that the caller
//! should fetch a fresh snapshot.

use std::collections::BTreeMap;

use arcade_room::{
    GameKind, ParticipantId, Phase, Room, RoomId, RoundRef, Snapshot, has_winner,
    winner_by_survivor,
};

use crate::session::SessionContext;

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

/// Something that may change the held room.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Full authoritative room.
    Snapshot(Snapshot),
    /// A round was opened by its initiator.
    RoundOpened(RoundRef),
    /// The server tallied a battle round.
    RoundCompleted {
        round_number: u32,
        eliminated: ParticipantId,
        finished: bool,
    },
    /// The match service confirmed a race move.
    MoveConfirmed {
        positions: BTreeMap<ParticipantId, i64>,
        finished: bool,
        finishers: Vec<ParticipantId>,
        winner: Option<ParticipantId>,
    },
    /// A wheel spin knocked out one sector.
    Eliminated {
        round: RoundRef,
        participant: ParticipantId,
    },
}

impl Update {
    fn label(&self) -> &'static str {
        match self {
            Update::Snapshot(_) => "snapshot",
            Update::RoundOpened(_) => "round-opened",
            Update::RoundCompleted { .. } => "round-completed",
            Update::MoveConfirmed { .. } => "move-confirmed",
            Update::Eliminated { .. } => "eliminated",
        }
    }
}

// ---------------------------------------------------------------------------
// ApplyResult
// ---------------------------------------------------------------------------

/// Why an update was discarded. Never shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("held room already has a winner and the update does not")]
    TerminalRatchet,

    #[error("update would move the room to a phase it cannot reach")]
    IllegalTransition,

    #[error("update is for an older round")]
    StaleRound,

    #[error("no room loaded yet")]
    NotLoaded,

    #[error("update is for a different room")]
    WrongRoom,
}

/// Positions around a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub previous_positions: BTreeMap<ParticipantId, i64>,
    pub positions: BTreeMap<ParticipantId, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyResult {
    Applied(Applied),
    Rejected(RejectReason),
}

impl ApplyResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyResult::Applied(_))
    }
}

// ---------------------------------------------------------------------------
// ReconciliationEngine
// ---------------------------------------------------------------------------

/// Owns the model of one room.
#[derive(Debug)]
pub struct ReconciliationEngine {
    room_id: RoomId,
    session: SessionContext,
    room: Option<Room>,
    staleness_budget: u32,
    consecutive_rejections: u32,
}

impl ReconciliationEngine {
    pub fn new(room_id: RoomId, session: SessionContext, staleness_budget: u32) -> Self {
        Self {
            room_id,
            session,
            room: None,
            staleness_budget: staleness_budget.max(1),
            consecutive_rejections: 0,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// The held model, once the first snapshot arrived.
    pub fn room(&self) -> Option<&Room> {
        self.room.as_ref()
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Reconcile one update against the held model.
    pub fn apply(&mut self, update: Update) -> ApplyResult {
        let label = update.label();
        let result = match self.project(update) {
            Ok(candidate) => self.judge(candidate),
            Err(reason) => ApplyResult::Rejected(reason),
        };

        match &result {
            ApplyResult::Applied(_) => {
                self.consecutive_rejections = 0;
                tracing::debug!(room = %self.room_id, update = label, "applied");
            }
            ApplyResult::Rejected(reason) => self.record_rejection(*reason),
        }
        result
    }

    /// Count a discard made outside [`apply`](Self::apply), e.g. an event
    /// filtered before it became an update.
    pub fn record_rejection(&mut self, reason: RejectReason) {
        self.consecutive_rejections = self.consecutive_rejections.saturating_add(1);
        tracing::debug!(
            room = %self.room_id,
            %reason,
            rejections = self.consecutive_rejections,
            "update discarded"
        );
    }

    /// `true` once the staleness budget is used up.
    pub fn needs_resync(&self) -> bool {
        self.consecutive_rejections >= self.staleness_budget
    }

    /// Called when a resync snapshot has been requested.
    pub fn reset_staleness(&mut self) {
        self.consecutive_rejections = 0;
    }

    pub fn consecutive_rejections(&self) -> u32 {
        self.consecutive_rejections
    }

    // -- projection ---------------------------------------------------------

    fn project(&self, update: Update) -> Result<Room, RejectReason> {
        let mut candidate = match update {
            Update::Snapshot(room) if room.id != self.room_id => {
                return Err(RejectReason::WrongRoom);
            }
            Update::Snapshot(room) => return Ok(room),
            _ => self.room.clone().ok_or(RejectReason::NotLoaded)?,
        };
        match update {
            Update::Snapshot(_) => {}
            Update::RoundOpened(round) => {
                if candidate.phase == Phase::Created && candidate.kind != GameKind::Battle {
                    candidate.phase = Phase::Running;
                }
                candidate.current_round = Some(round);
            }
            Update::RoundCompleted {
                round_number,
                eliminated,
                finished,
            } => {
                if let Some(p) = candidate.participant_mut(&eliminated)
                    && !p.is_eliminated
                {
                    p.is_eliminated = true;
                    p.eliminated_at_round = Some(round_number);
                }
                // A completion never moves the round counter backwards.
                let reached = if finished {
                    round_number
                } else {
                    round_number.saturating_add(1)
                };
                if reached > candidate.round_number() {
                    candidate.current_round = Some(RoundRef::numbered(reached));
                }
                if finished {
                    candidate.phase = Phase::Finished;
                    crown_survivor(&mut candidate);
                }
            }
            Update::MoveConfirmed {
                positions,
                finished,
                finishers,
                winner,
            } => {
                for (id, position) in positions {
                    if let Some(p) = candidate.participant_mut(&id) {
                        p.position = position;
                    }
                }
                if candidate.phase == Phase::Created {
                    candidate.phase = Phase::Running;
                }
                if finished {
                    let ranked = arrival_order(winner.as_ref(), &finishers);
                    let round_number = candidate.round_number();
                    candidate.finish_race(&ranked, round_number);
                }
            }
            Update::Eliminated { round, participant } => {
                if let Some(p) = candidate.participant_mut(&participant) {
                    p.is_eliminated = true;
                    p.eliminated_at_round = Some(round.number);
                }
                if candidate.phase == Phase::Created {
                    candidate.phase = Phase::Running;
                }
                if round.number >= candidate.round_number() {
                    candidate.current_round = Some(round);
                }
                if candidate.active().count() == 1 {
                    candidate.phase = Phase::Finished;
                    crown_survivor(&mut candidate);
                }
            }
        }
        Ok(candidate)
    }

    // -- judgement ----------------------------------------------------------

    fn judge(&mut self, candidate: Room) -> ApplyResult {
        let merged = candidate.visible_to(self.session.user());
        let Some(current) = self.room.as_ref() else {
            let positions = merged.positions();
            self.room = Some(merged);
            return ApplyResult::Applied(Applied {
                previous_positions: BTreeMap::new(),
                positions,
            });
        };

        if has_winner(current) && !has_winner(&candidate) {
            return ApplyResult::Rejected(RejectReason::TerminalRatchet);
        }
        if candidate.phase != current.phase && !current.phase.can_reach(candidate.phase) {
            return ApplyResult::Rejected(RejectReason::IllegalTransition);
        }
        if candidate.round_number() < current.round_number() {
            return ApplyResult::Rejected(RejectReason::StaleRound);
        }

        let previous_positions = current.positions();
        let positions = merged.positions();
        self.room = Some(merged);
        ApplyResult::Applied(Applied {
            previous_positions,
            positions,
        })
    }
}

fn crown_survivor(room: &mut Room) {
    let Some(id) = winner_by_survivor(room).map(|p| p.id.clone()) else {
        return;
    };
    if let Some(p) = room.participant_mut(&id)
        && p.final_rank.is_none()
    {
        p.final_rank = Some(1);
    }
}

/// Winner first, then the other finishers in the order given.
fn arrival_order(
    winner: Option<&ParticipantId>,
    finishers: &[ParticipantId],
) -> Vec<ParticipantId> {
    winner
        .into_iter()
        .chain(finishers.iter().filter(|id| Some(*id) != winner))
        .cloned()
        .collect()
}
