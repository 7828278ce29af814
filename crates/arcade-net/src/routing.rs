//! Event routing: dispatch decoded envelopes to every handler of their kind.
//!
//! Unlike a one-handler-per-tag router, any number of handlers may listen to
//! the same [`EventKind`]; all of them fire, in registration order.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::events::{Envelope, EventKind};

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Receives every delivered envelope of the kinds it is registered for.
///
/// Called on the transport's task; implementations should hand work off
/// (e.g. into an actor mailbox) rather than block.
pub trait EventHandler: Send + Sync {
    fn handle(&self, envelope: &Envelope);
}

impl<F> EventHandler for F
where
    F: Fn(&Envelope) + Send + Sync,
{
    fn handle(&self, envelope: &Envelope) {
        self(envelope);
    }
}

/// Token returned by [`HandlerRegistry::register`], used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

type Handlers = Vec<(HandlerId, Arc<dyn EventHandler>)>;

/// Handlers keyed by event kind.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<EventKind, Handlers>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the list for `kind`.
    pub fn register<H: EventHandler + 'static>(&self, kind: EventKind, handler: H) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler; returns `false` if it was not registered.
    pub fn deregister(&self, id: HandlerId) -> bool {
        let mut removed = false;
        for mut entry in self.handlers.iter_mut() {
            let before = entry.len();
            entry.retain(|(handler_id, _)| *handler_id != id);
            removed |= entry.len() != before;
        }
        removed
    }

    /// Deliver `envelope` to every handler of its kind, in registration order.
    ///
    /// Returns the number of handlers invoked.
    pub fn dispatch(&self, envelope: &Envelope) -> usize {
        let kind = envelope.kind();
        // Clone out so handlers can (de)register without deadlocking the map.
        let targets: Vec<Arc<dyn EventHandler>> = match self.handlers.get(&kind) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => Vec::new(),
        };
        if targets.is_empty() {
            tracing::trace!(event = kind.wire_name(), room = %envelope.room_id, "no handler");
        }
        for handler in &targets {
            handler.handle(envelope);
        }
        targets.len()
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, |list| list.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::events::{RoomEvent, RoundOpen};
    use arcade_room::RoundId;

    fn round_open() -> Envelope {
        Envelope::new(
            "R1",
            RoomEvent::RoundOpen(RoundOpen {
                round_id: RoundId::new("r1"),
                round_number: None,
            }),
        )
    }

    #[test]
    fn test_all_handlers_fire_in_registration_order() {
        let registry = HandlerRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let calls = Arc::clone(&calls);
            registry.register(EventKind::RoundOpen, move |_: &Envelope| {
                calls.lock().unwrap().push(name);
            });
        }

        assert_eq!(registry.dispatch(&round_open()), 3);
        assert_eq!(*calls.lock().unwrap(), ["first", "second", "third"]);
    }

    #[test]
    fn test_other_kinds_are_not_called() {
        let registry = HandlerRegistry::new();
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        registry.register(EventKind::RoomUpdate, move |_: &Envelope| {
            *counter.lock().unwrap() += 1;
        });

        assert_eq!(registry.dispatch(&round_open()), 0);
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_deregister_removes_only_that_handler() {
        let registry = HandlerRegistry::new();
        let a = registry.register(EventKind::RoundOpen, |_: &Envelope| {});
        registry.register(EventKind::RoundOpen, |_: &Envelope| {});

        assert!(registry.deregister(a));
        assert!(!registry.deregister(a));
        assert_eq!(registry.handler_count(EventKind::RoundOpen), 1);
    }

    #[test]
    fn test_handler_may_register_during_dispatch() {
        let registry = Arc::new(HandlerRegistry::new());
        let inner = Arc::clone(&registry);
        registry.register(EventKind::RoundOpen, move |_: &Envelope| {
            inner.register(EventKind::RoomLeave, |_: &Envelope| {});
        });

        registry.dispatch(&round_open());
        assert_eq!(registry.handler_count(EventKind::RoomLeave), 1);
    }
}
