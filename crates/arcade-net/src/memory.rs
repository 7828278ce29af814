//! In-process pub/sub broker.
//!
//! [`MemoryHub`] behaves like the real room server at the envelope level:
//! `room:join` / `room:leave` maintain per-room membership, every other
//! client-originated envelope is fanned out to the room's other members, and
//! the server side can push events of its own. It can also drop every client
//! at once or refuse new connections, which is how reconnect behaviour is
//! exercised without sockets.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arcade_room::RoomId;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::events::{Envelope, RoomEvent};
use crate::link::{Connector, Link};

type ClientId = u64;

struct HubInner {
    next_client: AtomicU64,
    reachable: AtomicBool,
    clients: DashMap<ClientId, mpsc::Sender<String>>,
    rooms: DashMap<RoomId, BTreeSet<ClientId>>,
    joins: DashMap<RoomId, usize>,
    relayed: Mutex<Vec<Envelope>>,
}

/// Shared handle to an in-process broker.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl fmt::Debug for MemoryHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryHub")
            .field("clients", &self.inner.clients.len())
            .field("rooms", &self.inner.rooms.len())
            .field("reachable", &self.inner.reachable.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                next_client: AtomicU64::new(1),
                reachable: AtomicBool::new(true),
                clients: DashMap::new(),
                rooms: DashMap::new(),
                joins: DashMap::new(),
                relayed: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A connector whose links attach to this hub.
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector { hub: self.clone() }
    }

    /// Accept a new client and start pumping its outbound messages.
    pub fn accept(&self) -> Result<Link, TransportError> {
        if !self.inner.reachable.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed {
                endpoint: "memory".to_string(),
                reason: "hub unreachable".to_string(),
            });
        }

        let id = self.inner.next_client.fetch_add(1, Ordering::Relaxed);
        let (link, mut from_client, to_client) = Link::pair();
        self.inner.clients.insert(id, to_client);
        tracing::debug!(client = id, "memory hub accepted client");

        let hub = self.clone();
        tokio::spawn(async move {
            while let Some(text) = from_client.recv().await {
                hub.route_from(id, &text);
            }
            hub.forget(id);
        });

        Ok(link)
    }

    fn route_from(&self, id: ClientId, text: &str) {
        if !self.inner.clients.contains_key(&id) {
            return;
        }
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(client = id, error = %e, "memory hub dropping malformed message");
                return;
            }
        };

        match &envelope.event {
            RoomEvent::RoomJoin(_) => {
                self.inner
                    .rooms
                    .entry(envelope.room_id.clone())
                    .or_default()
                    .insert(id);
                *self.inner.joins.entry(envelope.room_id.clone()).or_default() += 1;
            }
            RoomEvent::RoomLeave => {
                if let Some(mut members) = self.inner.rooms.get_mut(&envelope.room_id) {
                    members.remove(&id);
                }
            }
            _ => self.fan_out(&envelope.room_id, text, Some(id)),
        }

        if let Ok(mut relayed) = self.inner.relayed.lock() {
            relayed.push(envelope);
        }
    }

    fn fan_out(&self, room: &RoomId, text: &str, except: Option<ClientId>) {
        let members: Vec<ClientId> = self
            .inner
            .rooms
            .get(room)
            .map(|set| {
                set.iter()
                    .copied()
                    .filter(|m| Some(*m) != except)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        for member in members {
            let sender = self.inner.clients.get(&member).map(|tx| tx.clone());
            if let Some(tx) = sender
                && tx.try_send(text.to_string()).is_err()
            {
                tracing::warn!(client = member, room = %room, "memory hub client backlog full");
            }
        }
    }

    fn forget(&self, id: ClientId) {
        self.inner.clients.remove(&id);
        for mut members in self.inner.rooms.iter_mut() {
            members.remove(&id);
        }
    }

    /// Server push to every member of `room`.
    pub fn publish(&self, room: &RoomId, event: RoomEvent) {
        let envelope = Envelope::new(room.clone(), event);
        match envelope.encode() {
            Ok(text) => self.fan_out(room, &text, None),
            Err(e) => tracing::error!(room = %room, error = %e, "cannot encode server push"),
        }
    }

    /// Push raw text, valid or not, to every member of `room`.
    pub fn publish_raw(&self, room: &RoomId, text: &str) {
        self.fan_out(room, text, None);
    }

    /// Drop every connected client, as a server restart would.
    pub fn drop_all(&self) {
        tracing::info!(clients = self.inner.clients.len(), "memory hub dropping all clients");
        self.inner.clients.clear();
        self.inner.rooms.clear();
    }

    /// Refuse (or accept again) new connections.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Total `room:join` messages received for `room`.
    pub fn join_count(&self, room: &RoomId) -> usize {
        self.inner.joins.get(room).map_or(0, |count| *count)
    }

    /// Clients currently joined to `room`.
    pub fn member_count(&self, room: &RoomId) -> usize {
        self.inner.rooms.get(room).map_or(0, |set| set.len())
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.len()
    }

    /// Every well-formed envelope received from clients, in arrival order.
    pub fn relayed(&self) -> Vec<Envelope> {
        self.inner
            .relayed
            .lock()
            .map(|relayed| relayed.clone())
            .unwrap_or_default()
    }
}

/// [`Connector`] attaching to a [`MemoryHub`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    hub: MemoryHub,
}

impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Link, TransportError> {
        self.hub.accept()
    }
}
