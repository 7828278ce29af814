//! One task per room.
//!
//! The room actor owns the reconciliation engine, the turn coordinator and
//! the animation scheduler. Commands from [`RoomHandle`] and events from the
//! transport share one mailbox; match-service calls run in a [`JoinSet`]
//! whose results re-enter the same `select!` loop, as does the animation
//! step clock. Nothing else touches the room, so an update can never land
//! between two animation ticks.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use arcade_animation::{AnimationPlan, AnimationTiming, LockstepScheduler};
use arcade_config::Config;
use arcade_net::{Envelope, EventKind, HandlerId, MatchFinish, RoomEvent, TransportAdapter};
use arcade_room::{ParticipantId, Room, RoomId};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Sleep;

use crate::coordinator::{Effect, Request, Response, SnapshotOrigin, TurnCoordinator};
use crate::engine::{Applied, ReconciliationEngine};
use crate::error::TurnError;
use crate::notice::RoomNotice;
use crate::service::MatchService;
use crate::session::SessionContext;

const NOTICE_CAPACITY: usize = 256;

/// Per-room runtime settings.
#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub die_sides: u32,
    pub staleness_budget: u32,
    pub round_lag_tolerance: u32,
    pub mailbox_capacity: usize,
    pub timing: AnimationTiming,
    /// Fixed seed for the initiator's dice and wheel; OS entropy when `None`.
    pub seed: Option<u64>,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for RoomSettings {
    fn from(config: &Config) -> Self {
        Self {
            die_sides: config.race.die_sides,
            staleness_budget: config.sync.staleness_budget,
            round_lag_tolerance: config.sync.round_lag_tolerance,
            mailbox_capacity: config.sync.mailbox_capacity.max(1),
            timing: AnimationTiming::from(&config.animation),
            seed: None,
        }
    }
}

type Reply = oneshot::Sender<Result<(), TurnError>>;

enum Command {
    Roll(Reply),
    Spin(Reply),
    Vote(ParticipantId, Reply),
    Refresh,
    Event(RoomEvent),
    Snapshot(oneshot::Sender<Option<Room>>),
    Leave(oneshot::Sender<()>),
}

// ---------------------------------------------------------------------------
// RoomHandle
// ---------------------------------------------------------------------------

/// Caller side of a room actor. Cheap to clone.
#[derive(Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    commands: mpsc::Sender<Command>,
    notices: broadcast::Sender<RoomNotice>,
}

impl RoomHandle {
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Roll the dice as this round's initiator.
    pub async fn roll(&self) -> Result<(), TurnError> {
        self.ask(Command::Roll).await
    }

    /// Spin the wheel as this round's initiator.
    pub async fn spin(&self) -> Result<(), TurnError> {
        self.ask(Command::Spin).await
    }

    /// Vote for `target` in the current battle round.
    pub async fn vote(&self, target: impl Into<ParticipantId>) -> Result<(), TurnError> {
        let target = target.into();
        self.ask(|reply| Command::Vote(target, reply)).await
    }

    /// Fetch a fresh snapshot.
    pub async fn refresh(&self) -> Result<(), TurnError> {
        self.commands
            .send(Command::Refresh)
            .await
            .map_err(|_| TurnError::ActorGone)
    }

    /// The reconciled model, if loaded.
    pub async fn snapshot(&self) -> Option<Room> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Snapshot(tx)).await.ok()?;
        rx.await.ok().flatten()
    }

    /// Subscribe to model changes, animation frames and finish notices.
    pub fn notices(&self) -> broadcast::Receiver<RoomNotice> {
        self.notices.subscribe()
    }

    /// Leave the room: in-flight requests are aborted and the transport
    /// unsubscribed before this returns.
    pub async fn leave(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Leave(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn ask(&self, command: impl FnOnce(Reply) -> Command) -> Result<(), TurnError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| TurnError::ActorGone)?;
        rx.await.map_err(|_| TurnError::ActorGone)?
    }
}

/// Start the actor for `room_id` and join the room.
pub fn spawn_room<S: MatchService>(
    room_id: RoomId,
    session: SessionContext,
    transport: TransportAdapter,
    service: Arc<S>,
    settings: RoomSettings,
) -> RoomHandle {
    let (commands, mailbox) = mpsc::channel(settings.mailbox_capacity.max(1));
    let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

    let handlers = EventKind::ALL
        .into_iter()
        .map(|kind| {
            let tx = commands.clone();
            let room = room_id.clone();
            transport.on(kind, move |envelope: &Envelope| {
                if envelope.room_id != room {
                    return;
                }
                if tx.try_send(Command::Event(envelope.event.clone())).is_err() {
                    tracing::warn!(room = %room, ?kind, "room mailbox full, dropping event");
                }
            })
        })
        .collect();
    transport.subscribe(&room_id);

    let coordinator = match settings.seed {
        Some(seed) => TurnCoordinator::seeded(settings.die_sides, settings.round_lag_tolerance, seed),
        None => TurnCoordinator::new(settings.die_sides, settings.round_lag_tolerance),
    };
    let actor = RoomActor {
        room_id: room_id.clone(),
        engine: ReconciliationEngine::new(room_id.clone(), session, settings.staleness_budget),
        coordinator,
        transport,
        service,
        handlers,
        mailbox,
        notices: notices.clone(),
        requests: JoinSet::new(),
        fetch_in_flight: false,
        timing: settings.timing,
        queued: VecDeque::new(),
        scheduler: None,
        step_clock: None,
        held_finish: None,
    };
    tokio::spawn(actor.run());
    tracing::info!(room = %room_id, "room actor started");

    RoomHandle {
        room_id,
        commands,
        notices,
    }
}

// ---------------------------------------------------------------------------
// RoomActor
// ---------------------------------------------------------------------------

struct RoomActor<S> {
    room_id: RoomId,
    engine: ReconciliationEngine,
    coordinator: TurnCoordinator,
    transport: TransportAdapter,
    service: Arc<S>,
    handlers: Vec<HandlerId>,
    mailbox: mpsc::Receiver<Command>,
    notices: broadcast::Sender<RoomNotice>,
    requests: JoinSet<Response>,
    fetch_in_flight: bool,
    timing: AnimationTiming,
    queued: VecDeque<AnimationPlan>,
    scheduler: Option<LockstepScheduler>,
    step_clock: Option<Pin<Box<Sleep>>>,
    held_finish: Option<MatchFinish>,
}

impl<S: MatchService> RoomActor<S> {
    async fn run(mut self) {
        let start = self.coordinator.start();
        self.run_effects(start);

        loop {
            tokio::select! {
                command = self.mailbox.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle(command) {
                        break;
                    }
                }
                Some(joined) = self.requests.join_next(), if !self.requests.is_empty() => {
                    self.on_joined(joined);
                }
                () = next_step(&mut self.step_clock), if self.step_clock.is_some() => {
                    self.on_step();
                }
            }
        }
        tracing::info!(room = %self.room_id, "room actor stopped");
    }

    /// Returns `false` once the actor should stop.
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Roll(reply) => {
                let result = self.coordinator.roll(&mut self.engine);
                self.answer(result, reply);
            }
            Command::Spin(reply) => {
                let result = self.coordinator.spin(&mut self.engine);
                self.answer(result, reply);
            }
            Command::Vote(target, reply) => {
                let result = self.coordinator.vote(&mut self.engine, target);
                self.answer(result, reply);
            }
            Command::Refresh => {
                let effects = self.coordinator.refresh();
                self.run_effects(effects);
            }
            Command::Event(event) => {
                let effects = self.coordinator.on_event(&mut self.engine, event);
                self.run_effects(effects);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.engine.room().cloned());
            }
            Command::Leave(reply) => {
                self.shutdown();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn answer(&mut self, result: Result<Vec<Effect>, TurnError>, reply: Reply) {
        let outcome = result.map(|effects| self.run_effects(effects));
        if let Err(e) = &outcome {
            tracing::debug!(room = %self.room_id, error = %e, "turn action refused");
        }
        let _ = reply.send(outcome);
    }

    fn on_joined(&mut self, joined: Result<Response, JoinError>) {
        let response = match joined {
            Ok(response) => response,
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                tracing::error!(room = %self.room_id, error = %e, "request task panicked");
                return;
            }
        };
        if matches!(
            response,
            Response::Snapshot {
                origin: SnapshotOrigin::Fetch,
                ..
            }
        ) {
            self.fetch_in_flight = false;
        }
        let effects = self.coordinator.on_response(&mut self.engine, response);
        self.run_effects(effects);
    }

    fn run_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Emit(event) => self.transport.emit(&self.room_id, event),
                Effect::Request(request) => self.spawn_request(request),
                Effect::Applied(applied) => self.queue_animation(applied),
                Effect::Notice(notice) => self.notify(notice),
                Effect::Finish(finish) => self.finish(finish),
            }
        }
    }

    fn spawn_request(&mut self, request: Request) {
        let service = Arc::clone(&self.service);
        let room = self.room_id.clone();
        match request {
            Request::Fetch => {
                if self.fetch_in_flight {
                    return;
                }
                self.fetch_in_flight = true;
                self.requests.spawn(async move {
                    Response::Snapshot {
                        origin: SnapshotOrigin::Fetch,
                        result: service.get_room_by_id(&room).await,
                    }
                });
            }
            Request::Join => {
                self.requests.spawn(async move {
                    Response::Snapshot {
                        origin: SnapshotOrigin::Join,
                        result: service.join_room(&room).await,
                    }
                });
            }
            Request::ExecuteMove {
                round,
                roll,
                all_rolls,
            } => {
                self.requests.spawn(async move {
                    let result = service.execute_move(&room, roll, &all_rolls).await;
                    Response::Moved { round, result }
                });
            }
            Request::CastVote {
                round_number,
                target,
            } => {
                self.requests.spawn(async move {
                    Response::Snapshot {
                        origin: SnapshotOrigin::Vote { round_number },
                        result: service.cast_vote(&room, &target).await,
                    }
                });
            }
        }
    }

    fn notify(&self, notice: RoomNotice) {
        // No receivers is fine.
        let _ = self.notices.send(notice);
    }

    // -- animation ----------------------------------------------------------

    fn animating(&self) -> bool {
        self.scheduler.is_some() || !self.queued.is_empty()
    }

    fn queue_animation(&mut self, applied: Applied) {
        let plan = AnimationPlan::between(&applied.previous_positions, &applied.positions);
        if plan.is_empty() {
            return;
        }
        tracing::debug!(room = %self.room_id, steps = plan.max_steps(), "animation queued");
        self.queued.push_back(plan);
        if self.scheduler.is_none() {
            self.start_next_plan();
        }
    }

    fn start_next_plan(&mut self) {
        let Some(plan) = self.queued.pop_front() else {
            self.scheduler = None;
            self.step_clock = None;
            return;
        };
        self.scheduler = Some(LockstepScheduler::new(plan, self.timing));
        self.on_step();
    }

    fn on_step(&mut self) {
        let frame = self.scheduler.as_mut().and_then(LockstepScheduler::tick);
        match frame {
            Some(frame) => {
                self.notify(RoomNotice::AnimationFrame(frame));
                self.step_clock = Some(Box::pin(tokio::time::sleep(self.timing.dwell)));
            }
            None => {
                self.notify(RoomNotice::AnimationComplete);
                self.scheduler = None;
                self.start_next_plan();
                if !self.animating()
                    && let Some(finish) = self.held_finish.take()
                {
                    self.notify(RoomNotice::MatchFinished(finish));
                }
            }
        }
    }

    fn finish(&mut self, finish: MatchFinish) {
        if self.animating() {
            tracing::debug!(room = %self.room_id, "finish held until animation completes");
            self.held_finish = Some(finish);
        } else {
            self.notify(RoomNotice::MatchFinished(finish));
        }
    }

    fn shutdown(&mut self) {
        self.requests.abort_all();
        self.transport.unsubscribe(&self.room_id);
        for id in self.handlers.drain(..) {
            self.transport.off(id);
        }
        self.scheduler = None;
        self.step_clock = None;
        tracing::info!(room = %self.room_id, "left room");
    }
}

/// Resolve when the step clock fires; never while it is unset.
async fn next_step(clock: &mut Option<Pin<Box<Sleep>>>) {
    match clock {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
