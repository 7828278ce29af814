//! The transport adapter: one logical connection per client.
//!
//! [`TransportAdapter::connect`] spawns a supervisor that asks its
//! [`Connector`] for a link, re-joins every subscribed room, pumps inbound
//! envelopes to the registered handlers, and backs off and reconnects when
//! the link drops.
//!
//! The set of joined rooms and the current outbound sender sit under one
//! lock. A room subscribed while a reconnect is in flight is therefore joined
//! exactly once: either by `subscribe` itself (link already attached) or by
//! the re-join pass that attaches the new link, never by both.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use arcade_room::{RoomId, UserId};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::connection::{ConnectionState, ConnectionStateWatch};
use crate::events::{Envelope, EventKind, RoomEvent, RoomJoin};
use crate::link::Connector;
use crate::reconnection::{ReconnectConfig, ReconnectState};
use crate::routing::{EventHandler, HandlerId, HandlerRegistry};

type Launcher = Box<dyn Fn(Arc<Shared>, watch::Receiver<bool>) -> JoinHandle<()> + Send + Sync>;

#[derive(Default)]
struct LinkSlot {
    outbound: Option<mpsc::Sender<String>>,
    rooms: BTreeSet<RoomId>,
}

struct Shared {
    user_id: UserId,
    reconnect: ReconnectConfig,
    state: ConnectionStateWatch,
    handlers: HandlerRegistry,
    slot: Mutex<LinkSlot>,
}

struct Supervisor {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Client-side pub/sub transport with automatic room re-subscription.
///
/// Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct TransportAdapter {
    shared: Arc<Shared>,
    launcher: Arc<Launcher>,
    supervisor: Arc<Mutex<Option<Supervisor>>>,
}

impl TransportAdapter {
    /// Create a disconnected adapter for `user_id`.
    pub fn new<C: Connector>(connector: C, reconnect: ReconnectConfig, user_id: UserId) -> Self {
        let connector = Arc::new(connector);
        let launcher: Launcher = Box::new(move |shared, shutdown| {
            tokio::spawn(supervise(Arc::clone(&connector), shared, shutdown))
        });
        Self {
            shared: Arc::new(Shared {
                user_id,
                reconnect,
                state: ConnectionStateWatch::new(),
                handlers: HandlerRegistry::new(),
                slot: Mutex::new(LinkSlot::default()),
            }),
            launcher: Arc::new(launcher),
            supervisor: Arc::new(Mutex::new(None)),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.shared.user_id
    }

    /// Start the supervisor. A no-op while one is already running.
    pub fn connect(&self) {
        let mut supervisor = lock(&self.supervisor);
        if supervisor.as_ref().is_some_and(|s| !s.handle.is_finished()) {
            return;
        }
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = (self.launcher)(Arc::clone(&self.shared), shutdown_rx);
        *supervisor = Some(Supervisor { shutdown, handle });
    }

    /// Stop the supervisor and drop the link. No reconnect follows.
    pub fn disconnect(&self) {
        if let Some(supervisor) = lock(&self.supervisor).take() {
            let _ = supervisor.shutdown.send(true);
        }
        lock(&self.shared.slot).outbound = None;
        self.shared.state.set(ConnectionState::Disconnected);
    }

    /// Fire-and-forget send; dropped when not connected.
    pub fn emit(&self, room_id: &RoomId, event: RoomEvent) {
        let envelope = Envelope::new(room_id.clone(), event);
        let slot = lock(&self.shared.slot);
        match &slot.outbound {
            Some(outbound) => send(outbound, &envelope),
            None => tracing::debug!(
                room = %room_id,
                event = envelope.kind().wire_name(),
                "not connected, dropping emit"
            ),
        }
    }

    /// Register `handler` for every delivered envelope of `kind`.
    pub fn on<H: EventHandler + 'static>(&self, kind: EventKind, handler: H) -> HandlerId {
        self.shared.handlers.register(kind, handler)
    }

    pub fn off(&self, id: HandlerId) -> bool {
        self.shared.handlers.deregister(id)
    }

    /// Join `room_id` now (if connected) and after every reconnect.
    pub fn subscribe(&self, room_id: &RoomId) {
        let mut slot = lock(&self.shared.slot);
        if !slot.rooms.insert(room_id.clone()) {
            return;
        }
        tracing::debug!(room = %room_id, "subscribed");
        if let Some(outbound) = &slot.outbound {
            send(outbound, &self.join_envelope(room_id));
        }
    }

    /// Leave `room_id` and stop re-joining it.
    pub fn unsubscribe(&self, room_id: &RoomId) {
        let mut slot = lock(&self.shared.slot);
        if !slot.rooms.remove(room_id) {
            return;
        }
        tracing::debug!(room = %room_id, "unsubscribed");
        if let Some(outbound) = &slot.outbound {
            send(outbound, &Envelope::new(room_id.clone(), RoomEvent::RoomLeave));
        }
    }

    pub fn subscribed_rooms(&self) -> Vec<RoomId> {
        lock(&self.shared.slot).rooms.iter().cloned().collect()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state.current()
    }

    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Resolve once the connection state equals `state`.
    pub async fn wait_for(&self, state: ConnectionState) {
        self.shared.state.wait_for(state).await;
    }

    fn join_envelope(&self, room_id: &RoomId) -> Envelope {
        self.shared.join_envelope(room_id)
    }
}

impl Shared {
    fn join_envelope(&self, room_id: &RoomId) -> Envelope {
        Envelope::new(
            room_id.clone(),
            RoomEvent::RoomJoin(RoomJoin {
                user_id: self.user_id.clone(),
            }),
        )
    }

    /// Install a fresh link and re-join every subscribed room.
    fn attach(&self, outbound: mpsc::Sender<String>) {
        let mut slot = lock(&self.slot);
        for room in &slot.rooms {
            send(&outbound, &self.join_envelope(room));
        }
        tracing::info!(rooms = slot.rooms.len(), "link up, rooms re-joined");
        slot.outbound = Some(outbound);
        self.state.set(ConnectionState::Connected);
    }

    fn detach(&self) {
        lock(&self.slot).outbound = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Slot writes are single assignments, so a poisoned lock is still consistent.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn send(outbound: &mpsc::Sender<String>, envelope: &Envelope) {
    let text = match envelope.encode() {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(room = %envelope.room_id, error = %e, "cannot encode envelope");
            return;
        }
    };
    if let Err(e) = outbound.try_send(text) {
        tracing::warn!(
            room = %envelope.room_id,
            event = envelope.kind().wire_name(),
            error = %e,
            "outbound send failed"
        );
    }
}

// ---------------------------------------------------------------------------
// Supervisor loop
// ---------------------------------------------------------------------------

enum LinkEnd {
    Closed,
    Shutdown,
}

async fn supervise<C: Connector>(
    connector: Arc<C>,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = ReconnectState::new(shared.reconnect.clone());

    loop {
        shared.state.set(ConnectionState::Connecting);
        let attempt = tokio::select! {
            result = connector.connect() => result,
            _ = stopped(&mut shutdown) => break,
        };

        match attempt {
            Ok(link) => {
                backoff.reset();
                shared.attach(link.outbound);
                let end = pump(link.inbound, &shared, &mut shutdown).await;
                shared.detach();
                if let LinkEnd::Shutdown = end {
                    break;
                }
                tracing::warn!("link closed, reconnecting");
            }
            Err(e) => tracing::warn!(error = %e, attempt = backoff.attempts(), "connect failed"),
        }

        shared.state.set(ConnectionState::Disconnected);
        let Some(delay) = backoff.next_delay() else {
            tracing::error!(attempts = backoff.attempts(), "giving up reconnecting");
            break;
        };
        tracing::info!(?delay, attempt = backoff.attempts(), "reconnecting after backoff");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stopped(&mut shutdown) => break,
        }
    }

    shared.detach();
    shared.state.set(ConnectionState::Disconnected);
}

async fn pump(
    mut inbound: mpsc::Receiver<String>,
    shared: &Shared,
    shutdown: &mut watch::Receiver<bool>,
) -> LinkEnd {
    loop {
        tokio::select! {
            message = inbound.recv() => match message {
                Some(text) => match Envelope::decode(&text) {
                    Ok(envelope) => {
                        shared.handlers.dispatch(&envelope);
                    }
                    Err(e) => tracing::warn!(error = %e, "dropping malformed event"),
                },
                None => return LinkEnd::Closed,
            },
            _ = stopped(shutdown) => return LinkEnd::Shutdown,
        }
    }
}

/// Resolve once shutdown is requested or the adapter is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
