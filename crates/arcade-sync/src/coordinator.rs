//! Turn coordination: who generates a round's values, what goes on the wire,
//! and how pushed events become reconciliation updates.
//!
//! The coordinator is synchronous. Every entry point takes the room's
//! [`ReconciliationEngine`] and returns a list of [`Effect`]s for the room
//! actor to carry out, so the whole protocol can be driven from a test
//! without a runtime.
//!
//! Randomness is produced only on the initiating client. Followers consume
//! the initiator's values from `round:results` and `wheel:spin`.

use std::collections::{BTreeMap, BTreeSet};

use arcade_net::{MatchFinish, RoomEvent, RoundComplete, RoundOpen, RoundResults, WheelSpin};
use arcade_room::{
    GameKind, ParticipantId, Phase, Room, RoundLedger, RoundOutcome, RoundRef, Snapshot,
    has_winner, winner,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::engine::{Applied, ApplyResult, ReconciliationEngine, RejectReason, Update};
use crate::error::TurnError;
use crate::notice::RoomNotice;
use crate::service::{MoveResult, RequestError};
use crate::wheel;

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

/// A request/response call the actor should make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Refetch the authoritative room.
    Fetch,
    /// Join the room and take its state.
    Join,
    /// Submit this client's rolls for `round`.
    ExecuteMove {
        round: RoundRef,
        roll: u32,
        all_rolls: BTreeMap<ParticipantId, u32>,
    },
    /// Cast a ballot in battle round `round_number`.
    CastVote {
        round_number: u32,
        target: ParticipantId,
    },
}

/// Which request a snapshot answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOrigin {
    Fetch,
    Join,
    Vote { round_number: u32 },
}

/// The outcome of a [`Request`].
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Snapshot {
        origin: SnapshotOrigin,
        result: Result<Snapshot, RequestError>,
    },
    Moved {
        round: RoundRef,
        result: Result<MoveResult, RequestError>,
    },
}

/// Work for the room actor.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Publish to the other clients in the room.
    Emit(RoomEvent),
    Request(Request),
    /// The model changed; animate from the previous positions.
    Applied(Applied),
    Notice(RoomNotice),
    /// The match is decided. Held back while an animation runs.
    Finish(MatchFinish),
}

// ---------------------------------------------------------------------------
// TurnCoordinator
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct TurnCoordinator {
    die_sides: u32,
    lag_tolerance: u32,
    ledger: RoundLedger,
    rng: StdRng,
    wheel_rotation: f64,
    move_in_flight: Option<RoundRef>,
    voted: BTreeSet<u32>,
    pending_finish: Option<MatchFinish>,
    finish_announced: bool,
}

impl TurnCoordinator {
    pub fn new(die_sides: u32, lag_tolerance: u32) -> Self {
        Self::with_rng(die_sides, lag_tolerance, StdRng::from_os_rng())
    }

    /// Deterministic coordinator for tests and replays.
    pub fn seeded(die_sides: u32, lag_tolerance: u32, seed: u64) -> Self {
        Self::with_rng(die_sides, lag_tolerance, StdRng::seed_from_u64(seed))
    }

    fn with_rng(die_sides: u32, lag_tolerance: u32, rng: StdRng) -> Self {
        Self {
            die_sides: die_sides.max(2),
            lag_tolerance,
            ledger: RoundLedger::new(),
            rng,
            wheel_rotation: 0.0,
            move_in_flight: None,
            voted: BTreeSet::new(),
            pending_finish: None,
            finish_announced: false,
        }
    }

    pub fn ledger(&self) -> &RoundLedger {
        &self.ledger
    }

    /// Current absolute wheel rotation in degrees.
    pub fn wheel_rotation(&self) -> f64 {
        self.wheel_rotation
    }

    /// Effects to run when the actor starts.
    pub fn start(&self) -> Vec<Effect> {
        vec![Effect::Request(Request::Join)]
    }

    /// Explicit resync.
    pub fn refresh(&self) -> Vec<Effect> {
        vec![Effect::Request(Request::Fetch)]
    }

    // -- Protocol A: authoritative roll -------------------------------------

    /// Roll for every active racer as this round's initiator.
    pub fn roll(&mut self, engine: &mut ReconciliationEngine) -> Result<Vec<Effect>, TurnError> {
        let room = engine.room().ok_or(TurnError::NotLoaded)?;
        check_kind(room, GameKind::Race)?;
        check_eligible(engine, room)?;
        if !matches!(room.phase, Phase::Created | Phase::Running) {
            return Err(TurnError::WrongPhase {
                action: "roll",
                phase: room.phase,
            });
        }
        if self.move_in_flight.is_some() {
            return Err(TurnError::MoveInFlight);
        }

        let user = engine.session().user().clone();
        let round = RoundRef::numbered(room.round_number().saturating_add(1));
        let values: BTreeMap<ParticipantId, u32> = room
            .active()
            .map(|p| (p.id.clone(), self.rng.random_range(1..=self.die_sides)))
            .collect();
        let own_roll = room
            .participant_of(&user)
            .and_then(|p| values.get(&p.id))
            .copied()
            .unwrap_or_default();

        self.ledger.open(round.clone());
        let outcome = RoundOutcome {
            values_by_participant: values.clone(),
            initiator: user.clone(),
        };
        if let Err(e) = self.ledger.resolve(&round.id, outcome) {
            tracing::warn!(room = %engine.room_id(), error = %e, "round ledger out of step");
        }
        tracing::info!(
            room = %engine.room_id(),
            round = round.number,
            rolls = values.len(),
            "rolling as initiator"
        );

        let mut effects = Vec::new();
        self.apply(engine, Update::RoundOpened(round.clone()), &mut effects);
        effects.push(Effect::Emit(RoomEvent::RoundOpen(RoundOpen {
            round_id: round.id.clone(),
            round_number: Some(round.number),
        })));
        effects.push(Effect::Emit(RoomEvent::RoundResults(RoundResults {
            round_id: round.id.clone(),
            values_by_participant: values.clone(),
            initiator_id: Some(user),
        })));
        effects.push(Effect::Notice(RoomNotice::RoundResults {
            round_id: round.id.clone(),
            values: values.clone(),
        }));
        effects.push(Effect::Request(Request::ExecuteMove {
            round: round.clone(),
            roll: own_roll,
            all_rolls: values,
        }));
        self.move_in_flight = Some(round);
        Ok(effects)
    }

    // -- Protocol A': wheel spin --------------------------------------------

    /// Spin the wheel as this round's initiator.
    pub fn spin(&mut self, engine: &mut ReconciliationEngine) -> Result<Vec<Effect>, TurnError> {
        let room = engine.room().ok_or(TurnError::NotLoaded)?;
        check_kind(room, GameKind::Wheel)?;
        check_eligible(engine, room)?;
        let active: Vec<ParticipantId> = room.active().map(|p| p.id.clone()).collect();
        if !matches!(room.phase, Phase::Created | Phase::Running) || active.len() < 2 {
            return Err(TurnError::WrongPhase {
                action: "spin",
                phase: room.phase,
            });
        }

        let round = RoundRef::numbered(room.round_number().saturating_add(1));
        let Some((spin, eliminated)) = wheel::spin(active.len(), self.wheel_rotation, &mut self.rng)
            .and_then(|spin| Some((spin, active.get(spin.index)?.clone())))
        else {
            return Err(TurnError::WrongPhase {
                action: "spin",
                phase: room.phase,
            });
        };
        self.wheel_rotation = spin.rotation;
        self.ledger.open(round.clone());
        tracing::info!(
            room = %engine.room_id(),
            round = round.number,
            rotation = spin.rotation,
            %eliminated,
            "spinning as initiator"
        );

        let mut effects = vec![
            Effect::Emit(RoomEvent::RoundOpen(RoundOpen {
                round_id: round.id.clone(),
                round_number: Some(round.number),
            })),
            Effect::Emit(RoomEvent::WheelSpin(WheelSpin {
                round_id: round.id.clone(),
                rotation: spin.rotation,
                eliminated_id: eliminated.clone(),
            })),
            Effect::Notice(RoomNotice::WheelSpun {
                rotation: spin.rotation,
                eliminated: eliminated.clone(),
            }),
        ];
        self.apply(
            engine,
            Update::Eliminated {
                round,
                participant: eliminated,
            },
            &mut effects,
        );
        Ok(effects)
    }

    // -- Protocol B: tally-and-eliminate ------------------------------------

    /// Vote for `target` in the current battle round.
    pub fn vote(
        &mut self,
        engine: &mut ReconciliationEngine,
        target: ParticipantId,
    ) -> Result<Vec<Effect>, TurnError> {
        let room = engine.room().ok_or(TurnError::NotLoaded)?;
        check_kind(room, GameKind::Battle)?;
        let user = engine.session().user();
        if room.participant_of(user).is_none() {
            return Err(TurnError::NotEligible { user: user.clone() });
        }
        if room.phase != Phase::Voting {
            return Err(TurnError::WrongPhase {
                action: "vote",
                phase: room.phase,
            });
        }
        let round_number = room.round_number();
        if room.has_voted(user, round_number) || self.voted.contains(&round_number) {
            return Err(TurnError::AlreadyVoted(round_number));
        }
        if !room.active().any(|p| p.id == target) {
            return Err(TurnError::UnknownTarget(target));
        }

        self.voted.insert(round_number);
        tracing::debug!(room = %engine.room_id(), round = round_number, %target, "casting vote");
        Ok(vec![Effect::Request(Request::CastVote {
            round_number,
            target,
        })])
    }

    // -- inbound ------------------------------------------------------------

    /// React to a pushed room event.
    pub fn on_event(&mut self, engine: &mut ReconciliationEngine, event: RoomEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        match event {
            RoomEvent::RoomUpdate(_) => effects.push(Effect::Request(Request::Fetch)),
            RoomEvent::RoomState(room) => {
                self.apply(engine, Update::Snapshot(*room), &mut effects);
            }
            RoomEvent::RoundOpen(open) => self.on_round_open(engine, open, &mut effects),
            RoomEvent::RoundResults(results) => self.on_round_results(engine, results, &mut effects),
            RoomEvent::RoundComplete(complete) => {
                self.on_round_complete(engine, complete, &mut effects);
            }
            RoomEvent::MatchFinish(finish) => self.on_match_finish(engine, finish, &mut effects),
            RoomEvent::WheelSpin(spin) => self.on_wheel_spin(engine, spin, &mut effects),
            RoomEvent::RoomJoin(_) | RoomEvent::RoomLeave => {}
        }
        effects
    }

    fn on_round_open(
        &mut self,
        engine: &mut ReconciliationEngine,
        open: RoundOpen,
        effects: &mut Vec<Effect>,
    ) {
        let current = engine.room().and_then(|room| room.current_round.clone());
        let number = match &current {
            Some(round) if round.id == open.round_id => Some(round.number),
            _ => open.round_number.or_else(|| open.round_id.number()),
        };
        let Some(number) = number else {
            tracing::debug!(
                room = %engine.room_id(),
                round = %open.round_id,
                "round open carries no number, fetching snapshot"
            );
            effects.push(Effect::Request(Request::Fetch));
            return;
        };
        let round = RoundRef {
            id: open.round_id,
            number,
        };
        self.ledger.open(round.clone());
        self.apply(engine, Update::RoundOpened(round), effects);
    }

    fn on_round_results(
        &mut self,
        engine: &mut ReconciliationEngine,
        results: RoundResults,
        effects: &mut Vec<Effect>,
    ) {
        let Some(room) = engine.room() else {
            return;
        };
        let Some(current) = room.current_round.clone().filter(|r| r.id == results.round_id) else {
            tracing::debug!(
                room = %engine.room_id(),
                round = %results.round_id,
                "ignoring results for a round that is not current"
            );
            return;
        };

        let initiator = results
            .initiator_id
            .clone()
            .unwrap_or_else(|| room.creator_id.clone());
        self.ledger.open(current.clone());
        let outcome = RoundOutcome {
            values_by_participant: results.values_by_participant.clone(),
            initiator,
        };
        if let Err(e) = self.ledger.resolve(&current.id, outcome) {
            tracing::debug!(room = %engine.room_id(), error = %e, "results not recorded");
        }
        effects.push(Effect::Notice(RoomNotice::RoundResults {
            round_id: current.id,
            values: results.values_by_participant,
        }));
    }

    fn on_round_complete(
        &mut self,
        engine: &mut ReconciliationEngine,
        complete: RoundComplete,
        effects: &mut Vec<Effect>,
    ) {
        let Some(room) = engine.room() else {
            effects.push(Effect::Request(Request::Fetch));
            return;
        };
        if complete.round_number.saturating_add(self.lag_tolerance) < room.round_number() {
            self.discard(engine, RejectReason::StaleRound, effects);
            return;
        }
        if room.participant(&complete.eliminated_id).is_none() {
            tracing::debug!(
                room = %engine.room_id(),
                eliminated = %complete.eliminated_id,
                "eliminated entry unknown locally, fetching snapshot"
            );
            effects.push(Effect::Request(Request::Fetch));
            return;
        }

        self.voted.retain(|round| *round > complete.round_number);
        let update = Update::RoundCompleted {
            round_number: complete.round_number,
            eliminated: complete.eliminated_id.clone(),
            finished: complete.is_finished,
        };
        // Notices go first so observers see the elimination before the
        // finish it may cause.
        let mut applied = Vec::new();
        if self.apply(engine, update, &mut applied) {
            effects.push(Effect::Notice(RoomNotice::RoundEliminated {
                round_number: complete.round_number,
                participant: complete.eliminated_id,
            }));
        }
        effects.extend(applied);
    }

    fn on_match_finish(
        &mut self,
        engine: &mut ReconciliationEngine,
        finish: MatchFinish,
        effects: &mut Vec<Effect>,
    ) {
        if self.finish_announced {
            return;
        }
        if engine.room().is_some_and(has_winner) {
            self.finish_announced = true;
            effects.push(Effect::Finish(finish));
        } else {
            // Held until the model itself shows the winner.
            self.pending_finish = Some(finish);
            effects.push(Effect::Request(Request::Fetch));
        }
    }

    fn on_wheel_spin(
        &mut self,
        engine: &mut ReconciliationEngine,
        spin: WheelSpin,
        effects: &mut Vec<Effect>,
    ) {
        let Some(round) = engine
            .room()
            .and_then(|room| room.current_round.clone())
            .filter(|r| r.id == spin.round_id)
        else {
            tracing::debug!(room = %engine.room_id(), round = %spin.round_id, "ignoring spin");
            return;
        };
        self.wheel_rotation = spin.rotation;
        effects.push(Effect::Notice(RoomNotice::WheelSpun {
            rotation: spin.rotation,
            eliminated: spin.eliminated_id.clone(),
        }));
        self.apply(
            engine,
            Update::Eliminated {
                round,
                participant: spin.eliminated_id,
            },
            effects,
        );
    }

    /// React to a finished request.
    pub fn on_response(
        &mut self,
        engine: &mut ReconciliationEngine,
        response: Response,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        match response {
            Response::Snapshot { origin, result } => match result {
                Ok(room) => {
                    self.apply(engine, Update::Snapshot(room), &mut effects);
                }
                Err(e) => {
                    if let SnapshotOrigin::Vote { round_number } = origin {
                        self.voted.remove(&round_number);
                    }
                    report(engine, e, &mut effects);
                }
            },
            Response::Moved { round, result } => {
                if self.move_in_flight.as_ref() == Some(&round) {
                    self.move_in_flight = None;
                }
                match result {
                    Ok(moved) => self.on_moved(engine, moved, &mut effects),
                    Err(e) => report(engine, e, &mut effects),
                }
            }
        }
        effects
    }

    fn on_moved(
        &mut self,
        engine: &mut ReconciliationEngine,
        moved: MoveResult,
        effects: &mut Vec<Effect>,
    ) {
        if moved.finished {
            let finish = MatchFinish {
                finishers: moved.finishers.clone(),
                winner_id: moved.winner_id.clone(),
            };
            effects.push(Effect::Emit(RoomEvent::MatchFinish(finish.clone())));
            self.pending_finish = Some(finish);
        }
        self.apply(
            engine,
            Update::MoveConfirmed {
                positions: moved.confirmed_positions,
                finished: moved.finished,
                finishers: moved.finishers,
                winner: moved.winner_id,
            },
            effects,
        );
    }

    // -- reconciliation -----------------------------------------------------

    fn apply(
        &mut self,
        engine: &mut ReconciliationEngine,
        update: Update,
        effects: &mut Vec<Effect>,
    ) -> bool {
        let from_snapshot = matches!(update, Update::Snapshot(_));
        match engine.apply(update) {
            ApplyResult::Applied(applied) => {
                effects.push(Effect::Applied(applied));
                let Some(room) = engine.room() else {
                    return true;
                };
                if let Some(round) = &room.current_round
                    && self.ledger.get(&round.id).is_none()
                {
                    self.ledger.open(round.clone());
                }
                effects.push(Effect::Notice(RoomNotice::ModelChanged(room.clone())));
                if room.phase == Phase::Finished && !has_winner(room) && !from_snapshot {
                    tracing::debug!(
                        room = %engine.room_id(),
                        "finished without a winner locally, fetching snapshot"
                    );
                    effects.push(Effect::Request(Request::Fetch));
                }
                if !self.finish_announced && has_winner(room) {
                    let finish = self
                        .pending_finish
                        .take()
                        .unwrap_or_else(|| finish_from(room));
                    self.finish_announced = true;
                    tracing::info!(
                        room = %engine.room_id(),
                        winner = ?finish.winner_id,
                        "match finished"
                    );
                    effects.push(Effect::Finish(finish));
                }
                true
            }
            ApplyResult::Rejected(_) => {
                self.resync_if_stale(engine, effects);
                false
            }
        }
    }

    fn discard(
        &mut self,
        engine: &mut ReconciliationEngine,
        reason: RejectReason,
        effects: &mut Vec<Effect>,
    ) {
        engine.record_rejection(reason);
        self.resync_if_stale(engine, effects);
    }

    fn resync_if_stale(&self, engine: &mut ReconciliationEngine, effects: &mut Vec<Effect>) {
        if engine.needs_resync() {
            tracing::info!(
                room = %engine.room_id(),
                rejections = engine.consecutive_rejections(),
                "staleness budget used up, fetching snapshot"
            );
            engine.reset_staleness();
            effects.push(Effect::Request(Request::Fetch));
        }
    }
}

fn check_kind(room: &Room, expected: GameKind) -> Result<(), TurnError> {
    if room.kind == expected {
        Ok(())
    } else {
        Err(TurnError::WrongGame {
            expected,
            actual: room.kind,
        })
    }
}

fn check_eligible(engine: &ReconciliationEngine, room: &Room) -> Result<(), TurnError> {
    let user = engine.session().user();
    if room.participant_of(user).is_some() || &room.creator_id == user {
        Ok(())
    } else {
        Err(TurnError::NotEligible { user: user.clone() })
    }
}

fn report(engine: &ReconciliationEngine, error: RequestError, effects: &mut Vec<Effect>) {
    match error {
        RequestError::Cancelled => {
            tracing::debug!(room = %engine.room_id(), "request cancelled");
        }
        RequestError::Failed(message) => {
            tracing::warn!(room = %engine.room_id(), %message, "request failed");
            effects.push(Effect::Notice(RoomNotice::Message(message)));
        }
    }
}

/// Finish notice built from a decided model.
fn finish_from(room: &Room) -> MatchFinish {
    let mut ranked: Vec<(u32, ParticipantId)> = room
        .participants
        .iter()
        .filter_map(|p| p.final_rank.map(|rank| (rank, p.id.clone())))
        .collect();
    ranked.sort();
    let winner_id = winner(room).map(|p| p.id.clone());
    let mut finishers: Vec<ParticipantId> = ranked.into_iter().map(|(_, id)| id).collect();
    if finishers.is_empty()
        && let Some(id) = &winner_id
    {
        finishers.push(id.clone());
    }
    MatchFinish {
        finishers,
        winner_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionContext;
    use arcade_room::{Participant, RoomId, RoundId, UserId};

    fn id(raw: &str) -> ParticipantId {
        ParticipantId::new(raw)
    }

    fn values(pairs: &[(&str, u32)]) -> BTreeMap<ParticipantId, u32> {
        pairs.iter().map(|(k, v)| (id(k), *v)).collect()
    }

    fn race_room() -> Room {
        let mut room = Room::new("R1", GameKind::Race, "u1", 4);
        room.phase = Phase::Running;
        room.track_length = Some(20);
        room.current_round = Some(RoundRef::numbered(1));
        room.participants = vec![
            Participant::new("A", "u1").at(2),
            Participant::new("B", "u2").at(2),
            Participant::new("C", "u3").at(3),
        ];
        room
    }

    fn battle_room() -> Room {
        let mut room = Room::new("R1", GameKind::Battle, "u1", 4);
        room.phase = Phase::Voting;
        room.current_round = Some(RoundRef::numbered(1));
        room.participants = vec![
            Participant::new("m1", "u1"),
            Participant::new("m2", "u2"),
            Participant::new("m3", "u3"),
        ];
        room
    }

    fn wheel_room() -> Room {
        let mut room = Room::new("R1", GameKind::Wheel, "u1", 4);
        room.participants = vec![
            Participant::new("s1", "u1"),
            Participant::new("s2", "u2"),
            Participant::new("s3", "u3"),
        ];
        room
    }

    fn setup(user: &str, room: Room) -> (TurnCoordinator, ReconciliationEngine) {
        let mut engine = ReconciliationEngine::new(RoomId::new("R1"), SessionContext::new(user), 3);
        assert!(engine.apply(Update::Snapshot(room)).is_applied());
        (TurnCoordinator::seeded(6, 1, 11), engine)
    }

    fn emitted(effects: &[Effect]) -> Vec<&RoomEvent> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Emit(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    fn requests(effects: &[Effect]) -> Vec<&Request> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Request(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    fn finishes(effects: &[Effect]) -> usize {
        effects
            .iter()
            .filter(|e| matches!(e, Effect::Finish(_)))
            .count()
    }

    #[test]
    fn test_start_joins_room() {
        let coordinator = TurnCoordinator::seeded(6, 1, 0);
        assert_eq!(coordinator.start(), [Effect::Request(Request::Join)]);
    }

    #[test]
    fn test_roll_emits_open_then_results_then_moves() {
        let (mut coordinator, mut engine) = setup("u1", race_room());
        let effects = coordinator.roll(&mut engine).unwrap();

        let events = emitted(&effects);
        assert_eq!(events.len(), 2);
        let RoomEvent::RoundOpen(open) = events[0] else {
            panic!("expected round:open first");
        };
        let RoomEvent::RoundResults(results) = events[1] else {
            panic!("expected round:results second");
        };
        assert_eq!(open.round_id, RoundId::new("r2"));
        assert_eq!(open.round_number, Some(2));
        assert_eq!(results.round_id, open.round_id);
        assert_eq!(results.values_by_participant.len(), 3);
        assert!(results.values_by_participant.values().all(|v| (1..=6).contains(v)));

        let requested = requests(&effects);
        let [Request::ExecuteMove { round, roll, all_rolls }] = requested[..] else {
            panic!("expected one move request");
        };
        assert_eq!(round.number, 2);
        assert_eq!(all_rolls, &results.values_by_participant);
        assert_eq!(*roll, all_rolls[&id("A")]);
        assert_eq!(engine.room().unwrap().round_number(), 2);
        assert!(coordinator.ledger().get(&round.id).unwrap().outcome.is_some());
    }

    #[test]
    fn test_second_roll_waits_for_confirmation() {
        let (mut coordinator, mut engine) = setup("u1", race_room());
        coordinator.roll(&mut engine).unwrap();
        assert_eq!(coordinator.roll(&mut engine), Err(TurnError::MoveInFlight));
    }

    #[test]
    fn test_follower_never_generates_values() {
        let (mut coordinator, mut engine) = setup("u2", race_room());
        let mut effects = coordinator.on_event(
            &mut engine,
            RoomEvent::RoundOpen(RoundOpen {
                round_id: RoundId::new("r2"),
                round_number: Some(2),
            }),
        );
        let sent = values(&[("A", 4), ("B", 2), ("C", 6)]);
        effects.extend(coordinator.on_event(
            &mut engine,
            RoomEvent::RoundResults(RoundResults {
                round_id: RoundId::new("r2"),
                values_by_participant: sent.clone(),
                initiator_id: Some(UserId::new("u1")),
            }),
        ));

        assert!(emitted(&effects).is_empty());
        assert!(requests(&effects).is_empty());
        assert!(effects.contains(&Effect::Notice(RoomNotice::RoundResults {
            round_id: RoundId::new("r2"),
            values: sent.clone(),
        })));
        let round = coordinator.ledger().get(&RoundId::new("r2")).unwrap();
        let outcome = round.outcome.as_ref().unwrap();
        assert_eq!(outcome.values_by_participant, sent);
        assert_eq!(outcome.initiator, UserId::new("u1"));
    }

    #[test]
    fn test_results_for_other_round_ignored_without_staleness() {
        let (mut coordinator, mut engine) = setup("u2", race_room());
        let before = engine.room().cloned();
        for round in ["r0", "r7", "x"] {
            let effects = coordinator.on_event(
                &mut engine,
                RoomEvent::RoundResults(RoundResults {
                    round_id: RoundId::new(round),
                    values_by_participant: values(&[("A", 6)]),
                    initiator_id: None,
                }),
            );
            assert!(effects.is_empty());
        }
        assert_eq!(engine.room().cloned(), before);
        assert_eq!(engine.consecutive_rejections(), 0);
    }

    #[test]
    fn test_repeated_round_open_keeps_number() {
        let (mut coordinator, mut engine) = setup("u2", race_room());
        coordinator.on_event(
            &mut engine,
            RoomEvent::RoundOpen(RoundOpen {
                round_id: RoundId::new("r1"),
                round_number: None,
            }),
        );
        assert_eq!(engine.room().unwrap().round_number(), 1);

        coordinator.on_event(
            &mut engine,
            RoomEvent::RoundOpen(RoundOpen {
                round_id: RoundId::new("r2"),
                round_number: None,
            }),
        );
        assert_eq!(engine.room().unwrap().round_number(), 2);
    }

    #[test]
    fn test_late_round_open_without_number_reads_token() {
        let mut room = race_room();
        room.current_round = Some(RoundRef::numbered(3));
        let (mut coordinator, mut engine) = setup("u2", room);

        // r2 is a late duplicate of an earlier round, not round 4.
        coordinator.on_event(
            &mut engine,
            RoomEvent::RoundOpen(RoundOpen {
                round_id: RoundId::new("r2"),
                round_number: None,
            }),
        );
        assert_eq!(engine.room().unwrap().current_round, Some(RoundRef::numbered(3)));
        assert_eq!(engine.consecutive_rejections(), 1);

        let effects = coordinator.on_event(
            &mut engine,
            RoomEvent::RoundOpen(RoundOpen {
                round_id: RoundId::new("opaque"),
                round_number: None,
            }),
        );
        assert_eq!(effects, [Effect::Request(Request::Fetch)]);
        assert_eq!(engine.room().unwrap().round_number(), 3);
    }

    #[test]
    fn test_follower_scenario_from_open_to_next_round() {
        let (mut coordinator, mut engine) = setup("u2", race_room());
        coordinator.on_event(
            &mut engine,
            RoomEvent::RoundOpen(RoundOpen {
                round_id: RoundId::new("r1"),
                round_number: None,
            }),
        );
        let effects = coordinator.on_event(
            &mut engine,
            RoomEvent::RoundResults(RoundResults {
                round_id: RoundId::new("r1"),
                values_by_participant: values(&[("A", 4), ("B", 2), ("C", 6)]),
                initiator_id: Some(UserId::new("u1")),
            }),
        );
        assert_eq!(effects.len(), 1);

        let mut confirmed = race_room();
        confirmed.participants[0].position = 6;
        confirmed.participants[1].position = 4;
        confirmed.participants[2].position = 9;
        let effects = coordinator.on_event(&mut engine, RoomEvent::RoomState(Box::new(confirmed)));
        let applied = effects
            .iter()
            .find_map(|e| match e {
                Effect::Applied(applied) => Some(applied),
                _ => None,
            })
            .unwrap();
        let plan = arcade_animation::AnimationPlan::between(
            &applied.previous_positions,
            &applied.positions,
        );
        assert_eq!(plan.steps(&id("A")), [2, 3, 4, 5, 6]);
        assert_eq!(plan.max_steps(), 7);

        coordinator.on_event(
            &mut engine,
            RoomEvent::RoundOpen(RoundOpen {
                round_id: RoundId::new("r2"),
                round_number: None,
            }),
        );
        assert_eq!(engine.room().unwrap().round_number(), 2);
    }

    #[test]
    fn test_room_update_fetches_snapshot() {
        let (mut coordinator, mut engine) = setup("u2", race_room());
        let effects = coordinator.on_event(
            &mut engine,
            RoomEvent::RoomUpdate(arcade_net::RoomUpdate { updated_at: None }),
        );
        assert_eq!(effects, [Effect::Request(Request::Fetch)]);
    }

    #[test]
    fn test_confirmed_finish_emits_and_announces_once() {
        let (mut coordinator, mut engine) = setup("u1", race_room());
        let effects = coordinator.roll(&mut engine).unwrap();
        let requested = requests(&effects);
        let [Request::ExecuteMove { round, .. }] = requested[..] else {
            panic!("expected move request");
        };
        let moved = MoveResult {
            confirmed_positions: BTreeMap::from([(id("A"), 19), (id("B"), 8), (id("C"), 9)]),
            finished: true,
            finishers: vec![id("A")],
            winner_id: Some(id("A")),
        };
        let effects = coordinator.on_response(
            &mut engine,
            Response::Moved {
                round: round.clone(),
                result: Ok(moved),
            },
        );

        assert!(matches!(emitted(&effects)[..], [RoomEvent::MatchFinish(_)]));
        assert_eq!(finishes(&effects), 1);
        assert_eq!(
            winner(engine.room().unwrap()).map(|p| p.id.clone()),
            Some(id("A"))
        );

        let mut snapshot = engine.room().cloned().unwrap();
        snapshot.participants[1].final_rank = Some(2);
        let effects = coordinator.on_event(&mut engine, RoomEvent::RoomState(Box::new(snapshot)));
        assert_eq!(finishes(&effects), 0);
    }

    #[test]
    fn test_match_finish_waits_for_winner_in_model() {
        let (mut coordinator, mut engine) = setup("u2", race_room());
        let notice = MatchFinish {
            finishers: vec![id("C")],
            winner_id: Some(id("C")),
        };
        let effects = coordinator.on_event(&mut engine, RoomEvent::MatchFinish(notice.clone()));
        assert_eq!(effects, [Effect::Request(Request::Fetch)]);

        let mut finished = race_room();
        finished.current_round = Some(RoundRef::numbered(2));
        finished.participants[2].position = 19;
        finished.finish_race(&[id("C")], 2);
        let effects = coordinator.on_event(&mut engine, RoomEvent::RoomState(Box::new(finished)));
        assert!(effects.contains(&Effect::Finish(notice)));
    }

    #[test]
    fn test_cancelled_move_is_silent_and_failure_is_reported() {
        let (mut coordinator, mut engine) = setup("u1", race_room());
        let effects = coordinator.roll(&mut engine).unwrap();
        let requested = requests(&effects);
        let [Request::ExecuteMove { round, .. }] = requested[..] else {
            panic!("expected move request");
        };
        let round = round.clone();
        let before = engine.room().cloned();

        let effects = coordinator.on_response(
            &mut engine,
            Response::Moved {
                round: round.clone(),
                result: Err(RequestError::Cancelled),
            },
        );
        assert!(effects.is_empty());
        assert_eq!(engine.room().cloned(), before);

        let effects = coordinator.on_response(
            &mut engine,
            Response::Snapshot {
                origin: SnapshotOrigin::Fetch,
                result: Err(RequestError::Failed("service unavailable".to_string())),
            },
        );
        assert_eq!(
            effects,
            [Effect::Notice(RoomNotice::Message("service unavailable".to_string()))]
        );
        assert_eq!(engine.room().cloned(), before);
        assert!(coordinator.roll(&mut engine).is_ok());
    }

    #[test]
    fn test_roll_refused_outside_race_or_when_ineligible() {
        let (mut coordinator, mut engine) = setup("u1", battle_room());
        assert!(matches!(
            coordinator.roll(&mut engine),
            Err(TurnError::WrongGame { .. })
        ));

        let (mut coordinator, mut engine) = setup("stranger", race_room());
        assert!(matches!(
            coordinator.roll(&mut engine),
            Err(TurnError::NotEligible { .. })
        ));

        let mut finished = race_room();
        finished.phase = Phase::Finished;
        let (mut coordinator, mut engine) = setup("u1", finished);
        assert!(matches!(
            coordinator.roll(&mut engine),
            Err(TurnError::WrongPhase { action: "roll", .. })
        ));
    }

    #[test]
    fn test_vote_once_per_round() {
        let (mut coordinator, mut engine) = setup("u1", battle_room());
        let effects = coordinator.vote(&mut engine, id("m2")).unwrap();
        assert_eq!(
            effects,
            [Effect::Request(Request::CastVote {
                round_number: 1,
                target: id("m2"),
            })]
        );
        assert_eq!(
            coordinator.vote(&mut engine, id("m3")),
            Err(TurnError::AlreadyVoted(1))
        );
    }

    #[test]
    fn test_failed_vote_can_be_retried() {
        let (mut coordinator, mut engine) = setup("u1", battle_room());
        coordinator.vote(&mut engine, id("m2")).unwrap();
        coordinator.on_response(
            &mut engine,
            Response::Snapshot {
                origin: SnapshotOrigin::Vote { round_number: 1 },
                result: Err(RequestError::Failed("try again".to_string())),
            },
        );
        assert!(coordinator.vote(&mut engine, id("m2")).is_ok());
    }

    #[test]
    fn test_vote_rejects_unknown_target_and_wrong_phase() {
        let (mut coordinator, mut engine) = setup("u1", battle_room());
        assert_eq!(
            coordinator.vote(&mut engine, id("nope")),
            Err(TurnError::UnknownTarget(id("nope")))
        );

        let mut collecting = battle_room();
        collecting.phase = Phase::Collecting;
        let (mut coordinator, mut engine) = setup("u1", collecting);
        assert!(matches!(
            coordinator.vote(&mut engine, id("m1")),
            Err(TurnError::WrongPhase { action: "vote", .. })
        ));
    }

    #[test]
    fn test_round_complete_within_tolerance_applies() {
        let mut room = battle_room();
        room.current_round = Some(RoundRef::numbered(2));
        let (mut coordinator, mut engine) = setup("u1", room);

        let effects = coordinator.on_event(
            &mut engine,
            RoomEvent::RoundComplete(RoundComplete {
                round_number: 1,
                eliminated_id: id("m2"),
                is_finished: false,
            }),
        );
        assert!(matches!(
            effects[0],
            Effect::Notice(RoomNotice::RoundEliminated { round_number: 1, .. })
        ));
        let room = engine.room().unwrap();
        assert!(room.participant(&id("m2")).unwrap().is_eliminated);
        assert_eq!(room.round_number(), 2);
    }

    #[test]
    fn test_round_complete_two_rounds_late_rejected() {
        let mut room = battle_room();
        room.current_round = Some(RoundRef::numbered(3));
        let (mut coordinator, mut engine) = setup("u1", room);
        let before = engine.room().cloned();

        let effects = coordinator.on_event(
            &mut engine,
            RoomEvent::RoundComplete(RoundComplete {
                round_number: 1,
                eliminated_id: id("m2"),
                is_finished: false,
            }),
        );
        assert!(effects.is_empty());
        assert_eq!(engine.room().cloned(), before);
        assert_eq!(engine.consecutive_rejections(), 1);
    }

    #[test]
    fn test_round_complete_for_unknown_entry_fetches() {
        let (mut coordinator, mut engine) = setup("u1", battle_room());
        let effects = coordinator.on_event(
            &mut engine,
            RoomEvent::RoundComplete(RoundComplete {
                round_number: 1,
                eliminated_id: id("m9"),
                is_finished: false,
            }),
        );
        assert_eq!(effects, [Effect::Request(Request::Fetch)]);
    }

    #[test]
    fn test_final_round_complete_announces_survivor() {
        let mut room = battle_room();
        room.participants[0] = Participant::new("m1", "u1").eliminated_in(1);
        room.current_round = Some(RoundRef::numbered(2));
        let (mut coordinator, mut engine) = setup("u1", room);

        let effects = coordinator.on_event(
            &mut engine,
            RoomEvent::RoundComplete(RoundComplete {
                round_number: 2,
                eliminated_id: id("m2"),
                is_finished: true,
            }),
        );
        assert!(effects.contains(&Effect::Finish(MatchFinish {
            finishers: vec![id("m3")],
            winner_id: Some(id("m3")),
        })));
    }

    #[test]
    fn test_finish_without_survivor_fetches_snapshot() {
        let (mut coordinator, mut engine) = setup("u1", battle_room());
        let effects = coordinator.on_event(
            &mut engine,
            RoomEvent::RoundComplete(RoundComplete {
                round_number: 1,
                eliminated_id: id("m2"),
                is_finished: true,
            }),
        );
        let room = engine.room().unwrap();
        assert_eq!(room.phase, Phase::Finished);
        assert!(!has_winner(room));
        assert_eq!(requests(&effects), [&Request::Fetch]);
        assert_eq!(finishes(&effects), 0);
    }

    #[test]
    fn test_round_complete_at_max_round_does_not_overflow() {
        let mut room = battle_room();
        room.current_round = Some(RoundRef::numbered(u32::MAX));
        let (mut coordinator, mut engine) = setup("u1", room);

        let effects = coordinator.on_event(
            &mut engine,
            RoomEvent::RoundComplete(RoundComplete {
                round_number: u32::MAX,
                eliminated_id: id("m2"),
                is_finished: false,
            }),
        );
        assert!(matches!(effects[0], Effect::Notice(RoomNotice::RoundEliminated { .. })));
        assert_eq!(engine.room().unwrap().round_number(), u32::MAX);

        let mut race = race_room();
        race.current_round = Some(RoundRef::numbered(u32::MAX));
        let (mut coordinator, mut engine) = setup("u1", race);
        let effects = coordinator.roll(&mut engine).unwrap();
        assert!(matches!(
            requests(&effects)[..],
            [Request::ExecuteMove { round, .. }] if round.number == u32::MAX
        ));
    }

    #[test]
    fn test_staleness_budget_triggers_fetch() {
        let mut room = battle_room();
        room.current_round = Some(RoundRef::numbered(5));
        let (mut coordinator, mut engine) = setup("u1", room);
        let late = || {
            RoomEvent::RoundComplete(RoundComplete {
                round_number: 1,
                eliminated_id: id("m2"),
                is_finished: false,
            })
        };

        assert!(coordinator.on_event(&mut engine, late()).is_empty());
        assert!(coordinator.on_event(&mut engine, late()).is_empty());
        assert_eq!(
            coordinator.on_event(&mut engine, late()),
            [Effect::Request(Request::Fetch)]
        );
        assert_eq!(engine.consecutive_rejections(), 0);
    }

    #[test]
    fn test_spin_eliminates_locally_and_broadcasts() {
        let (mut coordinator, mut engine) = setup("u1", wheel_room());
        let effects = coordinator.spin(&mut engine).unwrap();
        let events = emitted(&effects);
        let (RoomEvent::RoundOpen(open), RoomEvent::WheelSpin(spin)) = (events[0], events[1]) else {
            panic!("expected round:open then wheel:spin");
        };
        assert_eq!(open.round_id, spin.round_id);
        assert!(spin.rotation >= 1800.0);

        let room = engine.room().unwrap();
        assert_eq!(room.phase, Phase::Running);
        assert!(room.participant(&spin.eliminated_id).unwrap().is_eliminated);
        assert_eq!(room.active().count(), 2);
        assert_eq!(coordinator.wheel_rotation(), spin.rotation);
    }

    #[test]
    fn test_follower_applies_spin_for_current_round() {
        let (mut coordinator, mut engine) = setup("u2", wheel_room());
        coordinator.on_event(
            &mut engine,
            RoomEvent::RoundOpen(RoundOpen {
                round_id: RoundId::new("r1"),
                round_number: Some(1),
            }),
        );
        let spin = |eliminated: &str| {
            RoomEvent::WheelSpin(WheelSpin {
                round_id: RoundId::new("r1"),
                rotation: 1900.0,
                eliminated_id: id(eliminated),
            })
        };
        coordinator.on_event(&mut engine, spin("s3"));
        assert!(engine.room().unwrap().participant(&id("s3")).unwrap().is_eliminated);

        // A spin for the previous round is ignored.
        coordinator.on_event(
            &mut engine,
            RoomEvent::RoundOpen(RoundOpen {
                round_id: RoundId::new("r2"),
                round_number: Some(2),
            }),
        );
        coordinator.on_event(&mut engine, spin("s1"));
        assert!(!engine.room().unwrap().participant(&id("s1")).unwrap().is_eliminated);
    }

    #[test]
    fn test_last_spin_finishes_wheel() {
        let mut room = wheel_room();
        room.participants.truncate(2);
        let (mut coordinator, mut engine) = setup("u1", room);
        let effects = coordinator.spin(&mut engine).unwrap();
        assert_eq!(finishes(&effects), 1);
        assert!(has_winner(engine.room().unwrap()));
        assert!(matches!(
            coordinator.spin(&mut engine),
            Err(TurnError::WrongPhase { action: "spin", .. })
        ));
    }
}
