//! Request/response side of the match service.
//!
//! The pub/sub transport only tells a client that something happened; the
//! authoritative room and every state-changing action go through a
//! [`MatchService`].

use std::collections::BTreeMap;
use std::future::Future;

use arcade_room::{ParticipantId, RoomId, Snapshot};
use serde::{Deserialize, Serialize};

/// Failure of one request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// Superseded or aborted by the caller; never reported to the user.
    #[error("request cancelled")]
    Cancelled,

    #[error("request failed: {0}")]
    Failed(String),
}

/// Authoritative answer to a race move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveResult {
    pub confirmed_positions: BTreeMap<ParticipantId, i64>,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub finishers: Vec<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<ParticipantId>,
}

/// The match service as seen from one signed-in client.
pub trait MatchService: Send + Sync + 'static {
    /// Fetch the full authoritative room.
    fn get_room_by_id(
        &self,
        room_id: &RoomId,
    ) -> impl Future<Output = Result<Snapshot, RequestError>> + Send;

    /// Submit the initiator's rolls for one race round.
    fn execute_move(
        &self,
        room_id: &RoomId,
        roll: u32,
        all_rolls: &BTreeMap<ParticipantId, u32>,
    ) -> impl Future<Output = Result<MoveResult, RequestError>> + Send;

    /// Cast this client's ballot in the current battle round.
    fn cast_vote(
        &self,
        room_id: &RoomId,
        target: &ParticipantId,
    ) -> impl Future<Output = Result<Snapshot, RequestError>> + Send;

    /// Join the room, returning its current state.
    fn join_room(
        &self,
        room_id: &RoomId,
    ) -> impl Future<Output = Result<Snapshot, RequestError>> + Send;
}
