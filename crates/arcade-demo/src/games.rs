//! The three scripted matches.

use std::sync::Arc;
use std::time::Duration;

use arcade_config::Config;
use arcade_net::{
    ConnectionState, FrameConfig, MemoryHub, ReconnectConfig, TcpConnector, TransportAdapter,
    serve_hub,
};
use arcade_room::{GameKind, Participant, Phase, Room, RoomId, RoundRef, UserId, winner};
use arcade_sync::{LocalMatchService, RoomHandle, RoomNotice, RoomSettings, SessionContext, spawn_room};
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type DemoResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const WAIT_LIMIT: Duration = Duration::from_secs(120);
const POLL_INTERVAL: Duration = Duration::from_millis(20);
const MAX_TURNS: u32 = 200;

// ---------------------------------------------------------------------------
// Wire
// ---------------------------------------------------------------------------

/// How clients reach the hub: over a TCP relay on the configured endpoint,
/// or in-process when that endpoint cannot be bound.
pub struct Wire {
    hub: MemoryHub,
    tcp: Option<TcpConnector>,
    relay: Option<JoinHandle<()>>,
}

impl Wire {
    pub async fn open(config: &Config) -> Self {
        let hub = MemoryHub::new();
        let endpoint = config.network.endpoint();
        let frames = FrameConfig::from(&config.network);
        match TcpListener::bind(&endpoint).await {
            Ok(listener) => {
                let relay_hub = hub.clone();
                let relay_frames = frames.clone();
                let relay = tokio::spawn(async move {
                    if let Err(e) = serve_hub(listener, relay_hub, relay_frames).await {
                        warn!("relay stopped: {e}");
                    }
                });
                info!(%endpoint, "clients connect over tcp");
                Self {
                    hub,
                    tcp: Some(TcpConnector::new(endpoint, frames)),
                    relay: Some(relay),
                }
            }
            Err(e) => {
                warn!(%endpoint, "cannot bind relay ({e}), clients stay in-process");
                Self {
                    hub,
                    tcp: None,
                    relay: None,
                }
            }
        }
    }

    fn transport(&self, config: &Config, user: &str) -> TransportAdapter {
        let reconnect = ReconnectConfig::from(&config.network);
        match &self.tcp {
            Some(connector) => {
                TransportAdapter::new(connector.clone(), reconnect, UserId::new(user))
            }
            None => TransportAdapter::new(self.hub.connector(), reconnect, UserId::new(user)),
        }
    }

    pub fn close(self) {
        if let Some(relay) = self.relay {
            relay.abort();
        }
    }
}

struct Seat {
    user: UserId,
    transport: TransportAdapter,
    handle: RoomHandle,
    logger: JoinHandle<()>,
}

/// Clients around one room, all talking to the same wire and service.
struct Table {
    room_id: RoomId,
    seats: Vec<Seat>,
}

impl Table {
    async fn open(
        wire: &Wire,
        service: &LocalMatchService,
        config: &Config,
        room_id: RoomId,
        users: &[&str],
    ) -> DemoResult<Self> {
        let mut seats = Vec::with_capacity(users.len());
        for (i, user) in users.iter().enumerate() {
            let transport = wire.transport(config, user);
            transport.connect();
            tokio::time::timeout(WAIT_LIMIT, transport.wait_for(ConnectionState::Connected))
                .await
                .map_err(|_| format!("{user} could not connect"))?;

            let mut settings = RoomSettings::from(config);
            settings.seed = config.debug.rng_seed.map(|seed| seed.wrapping_add(i as u64));
            let handle = spawn_room(
                room_id.clone(),
                SessionContext::new(*user),
                transport.clone(),
                Arc::new(service.for_user(*user)),
                settings,
            );
            let logger = tokio::spawn(log_notices(user.to_string(), handle.notices()));
            wait_until(&handle, |_| true).await?;
            seats.push(Seat {
                user: UserId::new(*user),
                transport,
                handle,
                logger,
            });
        }
        Ok(Self { room_id, seats })
    }

    fn initiator(&self) -> DemoResult<&RoomHandle> {
        self.seats
            .first()
            .map(|seat| &seat.handle)
            .ok_or_else(|| "table has no seats".into())
    }

    /// Wait for every client to see the match decided, then log the result.
    async fn close(self) -> DemoResult {
        for seat in &self.seats {
            let room = wait_until(&seat.handle, |room| room.phase.is_terminal()).await?;
            let champion = winner(&room).map(|p| p.id.to_string());
            info!(
                room = %self.room_id,
                user = %seat.user,
                winner = champion.as_deref().unwrap_or("none"),
                "client view settled"
            );
        }
        for seat in self.seats {
            seat.handle.leave().await;
            seat.transport.disconnect();
            seat.logger.abort();
        }
        Ok(())
    }
}

fn service_for(wire: &Wire, config: &Config) -> LocalMatchService {
    LocalMatchService::new(config.race.track_length).with_hub(wire.hub.clone())
}

// ---------------------------------------------------------------------------
// Race
// ---------------------------------------------------------------------------

/// Dice race: the creator rolls for everyone until someone crosses the line.
pub async fn play_race(wire: &Wire, config: &Config) -> DemoResult {
    info!("--- dice race ---");
    let service = service_for(wire, config);
    let room_id = RoomId::new("race-1");

    let mut room = Room::new(room_id.clone(), GameKind::Race, "ana", 4);
    room.phase = Phase::Running;
    room.current_round = Some(RoundRef::numbered(1));
    room.participants = vec![
        Participant::new("red", "ana"),
        Participant::new("blue", "ben"),
        Participant::new("green", "cleo"),
    ];
    service.insert_room(room)?;

    let table = Table::open(wire, &service, config, room_id, &["ana", "ben", "cleo"]).await?;
    let initiator = table.initiator()?;
    let mut notices = initiator.notices();

    for _ in 0..MAX_TURNS {
        initiator.roll().await?;
        let notice = next_notice(&mut notices, |notice| {
            matches!(
                notice,
                RoomNotice::AnimationComplete
                    | RoomNotice::MatchFinished(_)
                    | RoomNotice::Message(_)
            )
        })
        .await?;
        if let RoomNotice::Message(text) = notice {
            return Err(text.into());
        }
        if settled(initiator, &mut notices, notice).await? {
            break;
        }
    }
    table.close().await
}

// ---------------------------------------------------------------------------
// Battle
// ---------------------------------------------------------------------------

/// Movie battle: every client votes each round until one card survives.
pub async fn play_battle(wire: &Wire, config: &Config) -> DemoResult {
    info!("--- movie battle ---");
    let service = service_for(wire, config);
    let room_id = RoomId::new("battle-1");

    let mut room = Room::new(room_id.clone(), GameKind::Battle, "ana", 4);
    room.phase = Phase::Generating;
    room.participants = vec![
        Participant::new("heat", "ana"),
        Participant::new("alien", "ben"),
        Participant::new("jaws", "cleo"),
        Participant::new("up", "dev"),
    ];
    service.insert_room(room)?;

    let table = Table::open(wire, &service, config, room_id.clone(), &["ana", "ben", "cleo", "dev"])
        .await?;
    let initiator = table.initiator()?;
    let mut notices = initiator.notices();
    service.start_voting(&room_id)?;

    for _ in 0..MAX_TURNS {
        let round = wait_until(initiator, |room| room.phase == Phase::Voting)
            .await?
            .round_number();
        for (i, seat) in table.seats.iter().enumerate() {
            let room = wait_until(&seat.handle, |room| {
                room.phase == Phase::Voting && room.round_number() == round
            })
            .await?;
            let candidates: Vec<_> = room
                .active()
                .filter(|entry| entry.user_id != seat.user)
                .map(|entry| entry.id.clone())
                .collect();
            let Some(target) = candidates.get((i + round as usize) % candidates.len().max(1))
            else {
                continue;
            };
            if let Err(e) = seat.handle.vote(target.clone()).await {
                warn!(user = %seat.user, "vote refused: {e}");
            }
        }

        let notice = next_notice(&mut notices, |notice| {
            matches!(
                notice,
                RoomNotice::RoundEliminated { .. } | RoomNotice::MatchFinished(_)
            )
        })
        .await?;
        if settled(initiator, &mut notices, notice).await? {
            break;
        }
    }
    table.close().await
}

// ---------------------------------------------------------------------------
// Wheel
// ---------------------------------------------------------------------------

/// Wheel of elimination: the creator spins until one sector is left.
pub async fn play_wheel(wire: &Wire, config: &Config) -> DemoResult {
    info!("--- wheel spin ---");
    let service = service_for(wire, config);
    let room_id = RoomId::new("wheel-1");

    let mut room = Room::new(room_id.clone(), GameKind::Wheel, "ana", 4);
    room.participants = vec![
        Participant::new("pizza", "ana"),
        Participant::new("sushi", "ben"),
        Participant::new("tacos", "cleo"),
        Participant::new("ramen", "dev"),
    ];
    service.insert_room(room)?;

    let table = Table::open(wire, &service, config, room_id, &["ana", "ben", "cleo", "dev"]).await?;
    let initiator = table.initiator()?;
    let mut notices = initiator.notices();

    for _ in 0..MAX_TURNS {
        initiator.spin().await?;
        let notice = next_notice(&mut notices, |notice| {
            matches!(notice, RoomNotice::WheelSpun { .. })
        })
        .await?;
        if settled(initiator, &mut notices, notice).await? {
            break;
        }
        tokio::time::sleep(config.animation.step_dwell()).await;
    }
    table.close().await
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// True once the match is over, after draining its finish notice.
async fn settled(
    handle: &RoomHandle,
    notices: &mut broadcast::Receiver<RoomNotice>,
    last: RoomNotice,
) -> DemoResult<bool> {
    if matches!(last, RoomNotice::MatchFinished(_)) {
        return Ok(true);
    }
    let room = handle.snapshot().await.ok_or("room actor stopped")?;
    if !room.phase.is_terminal() {
        return Ok(false);
    }
    next_notice(notices, |notice| matches!(notice, RoomNotice::MatchFinished(_))).await?;
    Ok(true)
}

async fn next_notice(
    notices: &mut broadcast::Receiver<RoomNotice>,
    wanted: impl Fn(&RoomNotice) -> bool,
) -> DemoResult<RoomNotice> {
    let found = tokio::time::timeout(WAIT_LIMIT, async {
        loop {
            match notices.recv().await {
                Ok(notice) if wanted(&notice) => return Some(notice),
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .await
    .map_err(|_| "timed out waiting for a notice")?;
    found.ok_or_else(|| "room notices closed".into())
}

/// Poll a client's model until `check` accepts it.
async fn wait_until(handle: &RoomHandle, check: impl Fn(&Room) -> bool) -> DemoResult<Room> {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    loop {
        if let Some(room) = handle.snapshot().await
            && check(&room)
        {
            return Ok(room);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(format!("room {} never reached the expected state", handle.room_id()).into());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn log_notices(user: String, mut notices: broadcast::Receiver<RoomNotice>) {
    loop {
        match notices.recv().await {
            Ok(RoomNotice::ModelChanged(room)) => debug!(
                %user,
                phase = ?room.phase,
                round = room.round_number(),
                "model changed"
            ),
            Ok(RoomNotice::RoundResults { round_id, values }) => {
                info!(%user, %round_id, ?values, "round results")
            }
            Ok(RoomNotice::WheelSpun {
                rotation,
                eliminated,
            }) => info!(%user, rotation, %eliminated, "wheel spun"),
            Ok(RoomNotice::RoundEliminated {
                round_number,
                participant,
            }) => info!(%user, round_number, %participant, "knocked out"),
            Ok(RoomNotice::AnimationFrame(frame)) => debug!(
                %user,
                step = frame.index,
                jump_ms = frame.jump.as_millis() as u64,
                positions = ?frame.positions,
                "frame"
            ),
            Ok(RoomNotice::AnimationComplete) => debug!(%user, "animation complete"),
            Ok(RoomNotice::MatchFinished(finish)) => info!(
                %user,
                winner = ?finish.winner_id,
                finishers = ?finish.finishers,
                "match finished"
            ),
            Ok(RoomNotice::Message(text)) => warn!(%user, "{text}"),
            Err(RecvError::Lagged(skipped)) => warn!(%user, skipped, "notice log lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
