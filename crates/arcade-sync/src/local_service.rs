//! In-process authoritative match service.
//!
//! Holds every room behind one lock and answers requests the way a remote
//! service would: race moves on a fixed track with simultaneous finish
//! detection, ballot tallying with elimination, and joins. State changes are
//! pushed to subscribers through an optional [`MemoryHub`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use arcade_net::{MemoryHub, RoomEvent, RoomUpdate, RoundComplete};
use arcade_room::{
    GameKind, Participant, ParticipantId, Phase, Room, RoomId, RoundRef, Snapshot, UserId, Vote,
};

use crate::service::{MatchService, MoveResult, RequestError};

#[derive(Debug)]
struct Authority {
    rooms: BTreeMap<RoomId, Room>,
    fail_next: Option<RequestError>,
    track_length: i64,
}

/// Shared in-memory service; [`for_user`](Self::for_user) gives each client
/// its own view onto the same rooms.
#[derive(Debug, Clone)]
pub struct LocalMatchService {
    authority: Arc<Mutex<Authority>>,
    user: UserId,
    hub: Option<MemoryHub>,
}

impl LocalMatchService {
    /// Empty service; rooms without their own track use `track_length`.
    pub fn new(track_length: i64) -> Self {
        Self {
            authority: Arc::new(Mutex::new(Authority {
                rooms: BTreeMap::new(),
                fail_next: None,
                track_length: track_length.max(1),
            })),
            user: UserId::new("service"),
            hub: None,
        }
    }

    /// Push `room:update` and `round:complete` through `hub`.
    pub fn with_hub(mut self, hub: MemoryHub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// The same service, acting for `user`.
    pub fn for_user(&self, user: impl Into<UserId>) -> Self {
        Self {
            authority: Arc::clone(&self.authority),
            user: user.into(),
            hub: self.hub.clone(),
        }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn insert_room(&self, room: Room) -> Result<(), RequestError> {
        self.lock()?.rooms.insert(room.id.clone(), room);
        Ok(())
    }

    /// Authoritative copy of a room.
    pub fn room(&self, room_id: &RoomId) -> Option<Room> {
        self.lock().ok()?.rooms.get(room_id).cloned()
    }

    /// Make the next request from any client fail with `error`.
    pub fn fail_next(&self, error: RequestError) -> Result<(), RequestError> {
        self.lock()?.fail_next = Some(error);
        Ok(())
    }

    /// Move a battle room into its first voting round.
    pub fn start_voting(&self, room_id: &RoomId) -> Result<(), RequestError> {
        {
            let mut authority = self.lock()?;
            let room = find(&mut authority, room_id)?;
            if room.kind != GameKind::Battle || room.phase.is_terminal() {
                return Err(RequestError::Failed(format!(
                    "room {room_id} cannot start voting"
                )));
            }
            room.phase = Phase::Voting;
            if room.current_round.is_none() {
                room.current_round = Some(RoundRef::numbered(1));
            }
        }
        self.publish(room_id, RoomEvent::RoomUpdate(RoomUpdate { updated_at: None }));
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Authority>, RequestError> {
        self.authority
            .lock()
            .map_err(|_| RequestError::Failed("match service state poisoned".to_string()))
    }

    /// Lock and consume a scheduled failure, if any.
    fn begin(&self) -> Result<MutexGuard<'_, Authority>, RequestError> {
        let mut authority = self.lock()?;
        if let Some(error) = authority.fail_next.take() {
            return Err(error);
        }
        Ok(authority)
    }

    fn publish(&self, room_id: &RoomId, event: RoomEvent) {
        if let Some(hub) = &self.hub {
            hub.publish(room_id, event);
        }
    }
}

fn find<'a>(authority: &'a mut Authority, room_id: &RoomId) -> Result<&'a mut Room, RequestError> {
    authority
        .rooms
        .get_mut(room_id)
        .ok_or_else(|| RequestError::Failed(format!("room {room_id} not found")))
}

impl MatchService for LocalMatchService {
    async fn get_room_by_id(&self, room_id: &RoomId) -> Result<Snapshot, RequestError> {
        let mut authority = self.begin()?;
        find(&mut authority, room_id).map(|room| room.clone())
    }

    async fn execute_move(
        &self,
        room_id: &RoomId,
        roll: u32,
        all_rolls: &BTreeMap<ParticipantId, u32>,
    ) -> Result<MoveResult, RequestError> {
        let result = {
            let mut authority = self.begin()?;
            let default_track = authority.track_length;
            let room = find(&mut authority, room_id)?;
            if room.kind != GameKind::Race {
                return Err(RequestError::Failed(format!("room {room_id} is not a race")));
            }
            if room.phase.is_terminal() {
                return Err(RequestError::Failed("the race is already over".to_string()));
            }
            let finish = room.track_length.unwrap_or(default_track).max(1) - 1;
            tracing::debug!(room = %room_id, user = %self.user, roll, "executing move");
            move_racers(room, all_rolls, finish)
        };
        self.publish(room_id, RoomEvent::RoomUpdate(RoomUpdate { updated_at: None }));
        Ok(result)
    }

    async fn cast_vote(
        &self,
        room_id: &RoomId,
        target: &ParticipantId,
    ) -> Result<Snapshot, RequestError> {
        let (snapshot, completed) = {
            let mut authority = self.begin()?;
            let room = find(&mut authority, room_id)?;
            if room.phase != Phase::Voting {
                return Err(RequestError::Failed("voting is not open".to_string()));
            }
            if room.participant_of(&self.user).is_none() {
                return Err(RequestError::Failed(format!(
                    "{} has no entry in this room",
                    self.user
                )));
            }
            if !room.active().any(|p| &p.id == target) {
                return Err(RequestError::Failed(format!("{target} is not in the running")));
            }
            let round_number = room.round_number();
            if room.has_voted(&self.user, round_number) {
                return Err(RequestError::Failed(format!(
                    "already voted in round {round_number}"
                )));
            }
            room.votes.push(Vote {
                round_number,
                user_id: self.user.clone(),
                target_id: target.clone(),
            });
            let completed = if room.pending_voters(round_number).is_empty() {
                tally(room)
            } else {
                None
            };
            (room.clone(), completed)
        };
        match completed {
            Some(complete) => self.publish(room_id, RoomEvent::RoundComplete(complete)),
            None => self.publish(room_id, RoomEvent::RoomUpdate(RoomUpdate { updated_at: None })),
        }
        Ok(snapshot)
    }

    async fn join_room(&self, room_id: &RoomId) -> Result<Snapshot, RequestError> {
        let (snapshot, joined) = {
            let mut authority = self.begin()?;
            let room = find(&mut authority, room_id)?;
            let joinable = room.kind == GameKind::Race
                && room.phase == Phase::Created
                && room.participant_of(&self.user).is_none()
                && room.participants.len() < room.max_participants as usize;
            if joinable {
                room.participants
                    .push(Participant::new(self.user.as_str(), self.user.clone()));
            }
            (room.clone(), joinable)
        };
        if joined {
            tracing::debug!(room = %room_id, user = %self.user, "joined race");
            self.publish(room_id, RoomEvent::RoomUpdate(RoomUpdate { updated_at: None }));
        }
        Ok(snapshot)
    }
}

/// Advance every active racer by its roll, clamped to the finish cell.
///
/// Everyone who reaches the finish on this move finishes; the highest roll
/// among them wins, ties going to the lower id.
fn move_racers(
    room: &mut Room,
    rolls: &BTreeMap<ParticipantId, u32>,
    finish: i64,
) -> MoveResult {
    let mut arrived: Vec<(u32, ParticipantId)> = Vec::new();
    for racer in room.participants.iter_mut().filter(|p| !p.is_eliminated) {
        let roll = rolls.get(&racer.id).copied().unwrap_or_default();
        racer.position = (racer.position + i64::from(roll)).min(finish);
        if racer.position == finish {
            arrived.push((roll, racer.id.clone()));
        }
    }
    let round_number = room.round_number().saturating_add(1);
    room.current_round = Some(RoundRef::numbered(round_number));

    // Highest roll first, then id.
    arrived.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    let finishers: Vec<ParticipantId> = arrived.into_iter().map(|(_, id)| id).collect();
    let finished = !finishers.is_empty();
    if finished {
        room.finish_race(&finishers, round_number);
    } else {
        room.phase = Phase::Running;
    }

    MoveResult {
        confirmed_positions: room.positions(),
        finished,
        winner_id: finishers.first().cloned(),
        finishers,
    }
}

/// Eliminate the entry with the fewest votes this round; ties go to the
/// first in participant order.
fn tally(room: &mut Room) -> Option<RoundComplete> {
    let round_number = room.round_number();
    let mut counts: Vec<(ParticipantId, usize)> = room
        .active()
        .map(|p| {
            let votes = room
                .votes
                .iter()
                .filter(|v| v.round_number == round_number && v.target_id == p.id)
                .count();
            (p.id.clone(), votes)
        })
        .collect();
    // Stable: equal counts keep participant order.
    counts.sort_by_key(|(_, votes)| *votes);
    let (eliminated, _) = counts.into_iter().next()?;

    if let Some(entry) = room.participant_mut(&eliminated) {
        entry.is_eliminated = true;
        entry.eliminated_at_round = Some(round_number);
    }
    let is_finished = room.active().count() <= 1;
    if is_finished {
        room.phase = Phase::Finished;
        let survivor = room.active().next().map(|p| p.id.clone());
        if let Some(entry) = survivor.and_then(|id| room.participant_mut(&id)) {
            entry.final_rank = Some(1);
        }
    } else {
        room.current_round = Some(RoundRef::numbered(round_number.saturating_add(1)));
    }
    tracing::debug!(room = %room.id, round = round_number, %eliminated, is_finished, "round tallied");

    Some(RoundComplete {
        round_number,
        eliminated_id: eliminated,
        is_finished,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arcade_room::{has_winner, winner, winner_by_rank, winner_by_survivor};

    fn id(raw: &str) -> ParticipantId {
        ParticipantId::new(raw)
    }

    fn race() -> Room {
        let mut room = Room::new("R1", GameKind::Race, "u1", 4);
        room.track_length = Some(10);
        room.participants = vec![
            Participant::new("A", "u1").at(5),
            Participant::new("B", "u2").at(7),
            Participant::new("C", "u3").at(1),
        ];
        room
    }

    fn battle() -> Room {
        let mut room = Room::new("B1", GameKind::Battle, "u1", 4);
        room.phase = Phase::Generating;
        room.participants = vec![
            Participant::new("m1", "u1"),
            Participant::new("m2", "u2"),
            Participant::new("m3", "u3"),
        ];
        room
    }

    fn rolls(pairs: &[(&str, u32)]) -> BTreeMap<ParticipantId, u32> {
        pairs.iter().map(|(k, v)| (id(k), *v)).collect()
    }

    fn service_with(room: Room) -> LocalMatchService {
        let service = LocalMatchService::new(20);
        service.insert_room(room).unwrap();
        service
    }

    #[tokio::test]
    async fn test_move_advances_and_opens_next_round() {
        let service = service_with(race());
        let room_id = RoomId::new("R1");
        let result = service
            .execute_move(&room_id, 2, &rolls(&[("A", 2), ("B", 1), ("C", 3)]))
            .await
            .unwrap();

        assert!(!result.finished);
        assert_eq!(result.confirmed_positions[&id("A")], 7);
        assert_eq!(result.confirmed_positions[&id("C")], 4);
        let room = service.room(&room_id).unwrap();
        assert_eq!(room.phase, Phase::Running);
        assert_eq!(room.round_number(), 1);
    }

    #[tokio::test]
    async fn test_simultaneous_finish_picks_highest_roll() {
        let service = service_with(race());
        let room_id = RoomId::new("R1");
        let result = service
            .execute_move(&room_id, 6, &rolls(&[("A", 6), ("B", 3), ("C", 1)]))
            .await
            .unwrap();

        assert!(result.finished);
        assert_eq!(result.finishers, [id("A"), id("B")]);
        assert_eq!(result.winner_id, Some(id("A")));
        assert_eq!(result.confirmed_positions[&id("A")], 9);
        let room = service.room(&room_id).unwrap();
        assert!(has_winner(&room));
        assert_eq!(room.participant(&id("B")).unwrap().final_rank, Some(2));
        let c = room.participant(&id("C")).unwrap();
        assert!(c.is_eliminated);
        assert_eq!(c.eliminated_at_round, Some(1));
        assert_eq!(
            winner_by_survivor(&room).map(|p| p.id.clone()),
            winner_by_rank(&room).map(|p| p.id.clone())
        );
    }

    #[tokio::test]
    async fn test_finished_race_refuses_moves() {
        let service = service_with(race());
        let room_id = RoomId::new("R1");
        service
            .execute_move(&room_id, 6, &rolls(&[("A", 6)]))
            .await
            .unwrap();
        let err = service
            .execute_move(&room_id, 1, &rolls(&[("C", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Failed(_)));
    }

    #[tokio::test]
    async fn test_scheduled_failure_hits_next_request_only() {
        let service = service_with(race());
        let room_id = RoomId::new("R1");
        service.fail_next(RequestError::Cancelled).unwrap();
        assert_eq!(
            service.get_room_by_id(&room_id).await,
            Err(RequestError::Cancelled)
        );
        assert!(service.get_room_by_id(&room_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_room_fails() {
        let service = LocalMatchService::new(20);
        let err = service.get_room_by_id(&RoomId::new("nope")).await.unwrap_err();
        assert_eq!(err, RequestError::Failed("room nope not found".to_string()));
    }

    #[tokio::test]
    async fn test_join_adds_racer_once() {
        let mut room = race();
        room.participants.truncate(1);
        let service = service_with(room);
        let room_id = RoomId::new("R1");
        let bob = service.for_user("u2");

        let snapshot = bob.join_room(&room_id).await.unwrap();
        assert_eq!(snapshot.participants.len(), 2);
        let snapshot = bob.join_room(&room_id).await.unwrap();
        assert_eq!(snapshot.participants.len(), 2);
        assert!(snapshot.participant_of(&UserId::new("u2")).is_some());
    }

    #[tokio::test]
    async fn test_tally_eliminates_fewest_votes() {
        let service = service_with(battle());
        let room_id = RoomId::new("B1");
        service.start_voting(&room_id).unwrap();

        service.for_user("u1").cast_vote(&room_id, &id("m2")).await.unwrap();
        service.for_user("u2").cast_vote(&room_id, &id("m1")).await.unwrap();
        let snapshot = service
            .for_user("u3")
            .cast_vote(&room_id, &id("m1"))
            .await
            .unwrap();

        let m3 = snapshot.participant(&id("m3")).unwrap();
        assert!(m3.is_eliminated);
        assert_eq!(m3.eliminated_at_round, Some(1));
        assert_eq!(snapshot.round_number(), 2);
        assert_eq!(snapshot.phase, Phase::Voting);
    }

    #[tokio::test]
    async fn test_tally_tie_goes_to_first_entry() {
        let service = service_with(battle());
        let room_id = RoomId::new("B1");
        service.start_voting(&room_id).unwrap();

        service.for_user("u1").cast_vote(&room_id, &id("m3")).await.unwrap();
        service.for_user("u2").cast_vote(&room_id, &id("m3")).await.unwrap();
        let snapshot = service
            .for_user("u3")
            .cast_vote(&room_id, &id("m3"))
            .await
            .unwrap();
        assert!(snapshot.participant(&id("m1")).unwrap().is_eliminated);
    }

    #[tokio::test]
    async fn test_last_tally_finishes_battle() {
        let mut room = battle();
        room.participants.truncate(2);
        room.participants.push(Participant::new("m3", "u3").eliminated_in(1));
        let service = service_with(room);
        let room_id = RoomId::new("B1");
        service.start_voting(&room_id).unwrap();

        for user in ["u1", "u2", "u3"] {
            service.for_user(user).cast_vote(&room_id, &id("m1")).await.unwrap();
        }
        let room = service.room(&room_id).unwrap();
        assert!(has_winner(&room));
        assert_eq!(winner(&room).map(|p| p.id.clone()), Some(id("m1")));
    }

    #[tokio::test]
    async fn test_double_vote_rejected() {
        let service = service_with(battle());
        let room_id = RoomId::new("B1");
        service.start_voting(&room_id).unwrap();
        let alice = service.for_user("u1");
        alice.cast_vote(&room_id, &id("m2")).await.unwrap();
        assert!(alice.cast_vote(&room_id, &id("m3")).await.is_err());
    }

    #[tokio::test]
    async fn test_round_complete_pushed_to_room() {
        let hub = MemoryHub::new();
        let service = LocalMatchService::new(20).with_hub(hub.clone());
        service.insert_room(battle()).unwrap();
        let room_id = RoomId::new("B1");
        service.start_voting(&room_id).unwrap();

        let mut link = hub.accept().unwrap();
        let join = arcade_net::Envelope::new(
            room_id.clone(),
            RoomEvent::RoomJoin(arcade_net::RoomJoin {
                user_id: UserId::new("watcher"),
            }),
        );
        link.outbound.send(join.encode().unwrap()).await.unwrap();
        while hub.member_count(&room_id) == 0 {
            tokio::task::yield_now().await;
        }

        for user in ["u1", "u2", "u3"] {
            service.for_user(user).cast_vote(&room_id, &id("m1")).await.unwrap();
        }
        let mut kinds = Vec::new();
        while let Ok(text) = link.inbound.try_recv() {
            kinds.push(arcade_net::Envelope::decode(&text).unwrap().event);
        }
        assert!(matches!(
            kinds.last(),
            Some(RoomEvent::RoundComplete(RoundComplete { round_number: 1, .. }))
        ));
        assert_eq!(kinds.len(), 3);
    }
}
