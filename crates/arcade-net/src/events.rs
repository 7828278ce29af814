//! Typed room events and their JSON envelope.
//!
//! Every message on the wire is
//!
//! ```text
//! {"event": "<name>", "roomId": "<id>", "payload": {...}}
//! ```
//!
//! Decoding is strict: the envelope must parse, the event name must be one of
//! [`EventKind`], and the payload must match that event's shape. Anything else
//! is a [`MalformedEventError`].

use std::collections::BTreeMap;

use arcade_room::{ParticipantId, Room, RoomId, RoundId, UserId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MalformedEventError;

// ---------------------------------------------------------------------------
// EventKind
// ---------------------------------------------------------------------------

/// Every event name understood on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    RoomUpdate,
    RoundOpen,
    RoundResults,
    RoundComplete,
    MatchFinish,
    RoomState,
    RoomJoin,
    RoomLeave,
    WheelSpin,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::RoomUpdate,
        EventKind::RoundOpen,
        EventKind::RoundResults,
        EventKind::RoundComplete,
        EventKind::MatchFinish,
        EventKind::RoomState,
        EventKind::RoomJoin,
        EventKind::RoomLeave,
        EventKind::WheelSpin,
    ];

    /// Name used in the envelope's `event` field.
    pub fn wire_name(self) -> &'static str {
        match self {
            EventKind::RoomUpdate => "room:update",
            EventKind::RoundOpen => "round:open",
            EventKind::RoundResults => "round:results",
            EventKind::RoundComplete => "round:complete",
            EventKind::MatchFinish => "match:finish",
            EventKind::RoomState => "room:state",
            EventKind::RoomJoin => "room:join",
            EventKind::RoomLeave => "room:leave",
            EventKind::WheelSpin => "wheel:spin",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.wire_name() == name)
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Something changed server-side; fetch a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// The initiator opened a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundOpen {
    pub round_id: RoundId,
    /// Absent from older senders; followers then assume the next round.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_number: Option<u32>,
}

/// The initiator's generated values for one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResults {
    pub round_id: RoundId,
    pub values_by_participant: BTreeMap<ParticipantId, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator_id: Option<UserId>,
}

/// Server tally of a battle round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundComplete {
    pub round_number: u32,
    pub eliminated_id: ParticipantId,
    pub is_finished: bool,
}

/// The game is decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchFinish {
    #[serde(default)]
    pub finishers: Vec<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<ParticipantId>,
}

/// A user joined the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoin {
    pub user_id: UserId,
}

/// The initiator's wheel spin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WheelSpin {
    pub round_id: RoundId,
    /// Total rotation in degrees, extra turns included.
    pub rotation: f64,
    pub eliminated_id: ParticipantId,
}

#[derive(Serialize, Deserialize)]
struct Empty {}

// ---------------------------------------------------------------------------
// RoomEvent / Envelope
// ---------------------------------------------------------------------------

/// A decoded event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    RoomUpdate(RoomUpdate),
    RoundOpen(RoundOpen),
    RoundResults(RoundResults),
    RoundComplete(RoundComplete),
    MatchFinish(MatchFinish),
    /// Full authoritative snapshot pushed by the server.
    RoomState(Box<Room>),
    RoomJoin(RoomJoin),
    RoomLeave,
    WheelSpin(WheelSpin),
}

impl RoomEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RoomEvent::RoomUpdate(_) => EventKind::RoomUpdate,
            RoomEvent::RoundOpen(_) => EventKind::RoundOpen,
            RoomEvent::RoundResults(_) => EventKind::RoundResults,
            RoomEvent::RoundComplete(_) => EventKind::RoundComplete,
            RoomEvent::MatchFinish(_) => EventKind::MatchFinish,
            RoomEvent::RoomState(_) => EventKind::RoomState,
            RoomEvent::RoomJoin(_) => EventKind::RoomJoin,
            RoomEvent::RoomLeave => EventKind::RoomLeave,
            RoomEvent::WheelSpin(_) => EventKind::WheelSpin,
        }
    }

    fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            RoomEvent::RoomUpdate(p) => serde_json::to_value(p),
            RoomEvent::RoundOpen(p) => serde_json::to_value(p),
            RoomEvent::RoundResults(p) => serde_json::to_value(p),
            RoomEvent::RoundComplete(p) => serde_json::to_value(p),
            RoomEvent::MatchFinish(p) => serde_json::to_value(p),
            RoomEvent::RoomState(room) => serde_json::to_value(room),
            RoomEvent::RoomJoin(p) => serde_json::to_value(p),
            RoomEvent::RoomLeave => serde_json::to_value(Empty {}),
            RoomEvent::WheelSpin(p) => serde_json::to_value(p),
        }
    }
}

/// An event addressed to one room.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub room_id: RoomId,
    pub event: RoomEvent,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    event: String,
    room_id: RoomId,
    #[serde(default)]
    payload: Value,
}

fn payload<T: DeserializeOwned>(kind: EventKind, value: Value) -> Result<T, MalformedEventError> {
    serde_json::from_value(value).map_err(|source| MalformedEventError::Payload {
        event: kind.wire_name(),
        source,
    })
}

impl Envelope {
    pub fn new(room_id: impl Into<RoomId>, event: RoomEvent) -> Self {
        Self {
            room_id: room_id.into(),
            event,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }

    /// Serialize to the JSON wire form.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let raw = RawEnvelope {
            event: self.kind().wire_name().to_string(),
            room_id: self.room_id.clone(),
            payload: self.event.payload()?,
        };
        serde_json::to_string(&raw)
    }

    /// Strictly decode one wire message.
    pub fn decode(text: &str) -> Result<Self, MalformedEventError> {
        let raw: RawEnvelope = serde_json::from_str(text).map_err(MalformedEventError::Envelope)?;
        let kind = EventKind::from_wire(&raw.event)
            .ok_or_else(|| MalformedEventError::UnknownEvent(raw.event.clone()))?;
        let body = match raw.payload {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other,
        };

        let event = match kind {
            EventKind::RoomUpdate => RoomEvent::RoomUpdate(payload(kind, body)?),
            EventKind::RoundOpen => RoomEvent::RoundOpen(payload(kind, body)?),
            EventKind::RoundResults => RoomEvent::RoundResults(payload(kind, body)?),
            EventKind::RoundComplete => RoomEvent::RoundComplete(payload(kind, body)?),
            EventKind::MatchFinish => RoomEvent::MatchFinish(payload(kind, body)?),
            EventKind::RoomState => RoomEvent::RoomState(Box::new(payload(kind, body)?)),
            EventKind::RoomJoin => RoomEvent::RoomJoin(payload(kind, body)?),
            EventKind::RoomLeave => {
                let Empty {} = payload(kind, body)?;
                RoomEvent::RoomLeave
            }
            EventKind::WheelSpin => RoomEvent::WheelSpin(payload(kind, body)?),
        };

        Ok(Envelope {
            room_id: raw.room_id,
            event,
        })
    }
}
