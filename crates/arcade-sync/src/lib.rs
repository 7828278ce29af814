//! Live match synchronisation for one client.
//!
//! A room runs as an actor ([`spawn_room`]) that owns its
//! [`ReconciliationEngine`] and [`TurnCoordinator`]. Pushed events and
//! fetched snapshots both become [`Update`]s judged by the same
//! terminal-state ratchet, and each applied position change is animated in
//! lock-step before a finish notice is released.

pub mod actor;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod local_service;
pub mod notice;
pub mod service;
pub mod session;
pub mod wheel;

pub use actor::{RoomHandle, RoomSettings, spawn_room};
pub use coordinator::{Effect, Request, Response, SnapshotOrigin, TurnCoordinator};
pub use engine::{Applied, ApplyResult, ReconciliationEngine, RejectReason, Update};
pub use error::TurnError;
pub use local_service::LocalMatchService;
pub use notice::RoomNotice;
pub use service::{MatchService, MoveResult, RequestError};
pub use session::SessionContext;
