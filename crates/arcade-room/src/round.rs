//! Per-room round bookkeeping.
//!
//! A [`RoundLedger`] remembers every round a client has seen: opened by a
//! `round:open`, resolved by the initiator's outcome, retired when a higher
//! round supersedes it. Retired rounds are kept so that a late outcome for an
//! old round can be recognised and ignored rather than misapplied.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{ParticipantId, RoundId, UserId};
use crate::room::RoundRef;

/// Lifecycle of one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundStatus {
    /// Opened, outcome not yet known.
    Open,
    /// Outcome attached.
    Resolved,
    /// Superseded by a higher round.
    Retired,
}

/// Values produced once by the initiator for one round.
///
/// Dice rolls in the race. Followers only ever consume this map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundOutcome {
    /// Rolled (or otherwise generated) value per participant.
    pub values_by_participant: BTreeMap<ParticipantId, u32>,
    /// The user whose client generated the values.
    pub initiator: UserId,
}

/// One round as tracked by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Round {
    pub round: RoundRef,
    pub status: RoundStatus,
    pub outcome: Option<RoundOutcome>,
}

/// Errors from [`RoundLedger`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoundLedgerError {
    #[error("round {0} is unknown")]
    UnknownRound(RoundId),

    #[error("round {0} was superseded")]
    Retired(RoundId),

    #[error("round {0} already has an outcome")]
    AlreadyResolved(RoundId),
}

/// Every round seen in one room, keyed by round number.
#[derive(Debug, Default, Clone)]
pub struct RoundLedger {
    rounds: BTreeMap<u32, Round>,
}

impl RoundLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `round` as open and retire every lower round.
    ///
    /// Re-opening a known round is a no-op; opening a round lower than the
    /// highest known one records it as already retired.
    pub fn open(&mut self, round: RoundRef) -> &Round {
        let highest = self.highest_number();
        let number = round.number;
        let status = match highest {
            Some(h) if number < h => RoundStatus::Retired,
            _ => RoundStatus::Open,
        };
        if status == RoundStatus::Open {
            for older in self.rounds.range_mut(..number).map(|(_, r)| r) {
                older.status = RoundStatus::Retired;
            }
        }
        self.rounds.entry(number).or_insert(Round {
            round,
            status,
            outcome: None,
        })
    }

    /// Attach the initiator's outcome to the open round `id`.
    pub fn resolve(&mut self, id: &RoundId, outcome: RoundOutcome) -> Result<(), RoundLedgerError> {
        let round = self
            .rounds
            .values_mut()
            .find(|r| &r.round.id == id)
            .ok_or_else(|| RoundLedgerError::UnknownRound(id.clone()))?;
        match round.status {
            RoundStatus::Retired => Err(RoundLedgerError::Retired(id.clone())),
            RoundStatus::Resolved => Err(RoundLedgerError::AlreadyResolved(id.clone())),
            RoundStatus::Open => {
                round.status = RoundStatus::Resolved;
                round.outcome = Some(outcome);
                Ok(())
            }
        }
    }

    /// The highest-numbered round seen.
    pub fn current(&self) -> Option<&Round> {
        self.rounds.values().next_back()
    }

    /// Look up a round by token.
    pub fn get(&self, id: &RoundId) -> Option<&Round> {
        self.rounds.values().find(|r| &r.round.id == id)
    }

    fn highest_number(&self) -> Option<u32> {
        self.rounds.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(pairs: &[(&str, u32)]) -> RoundOutcome {
        RoundOutcome {
            values_by_participant: pairs
                .iter()
                .map(|(id, v)| (ParticipantId::new(*id), *v))
                .collect(),
            initiator: UserId::new("u1"),
        }
    }

    #[test]
    fn test_open_retires_lower_rounds() {
        let mut ledger = RoundLedger::new();
        ledger.open(RoundRef::numbered(1));
        ledger.open(RoundRef::numbered(2));

        assert_eq!(
            ledger.get(&RoundId::for_number(1)).map(|r| r.status),
            Some(RoundStatus::Retired)
        );
        assert_eq!(ledger.current().map(|r| r.round.number), Some(2));
        assert_eq!(ledger.current().map(|r| r.status), Some(RoundStatus::Open));
    }

    #[test]
    fn test_late_open_is_recorded_retired() {
        let mut ledger = RoundLedger::new();
        ledger.open(RoundRef::numbered(3));
        let late = ledger.open(RoundRef::numbered(2));
        assert_eq!(late.status, RoundStatus::Retired);
        assert_eq!(ledger.current().map(|r| r.round.number), Some(3));
    }

    #[test]
    fn test_resolve_attaches_outcome_once() {
        let mut ledger = RoundLedger::new();
        ledger.open(RoundRef::numbered(1));
        let id = RoundId::for_number(1);
        ledger.resolve(&id, outcome(&[("A", 4), ("B", 2)])).unwrap();

        let round = ledger.get(&id).unwrap();
        assert_eq!(round.status, RoundStatus::Resolved);
        assert_eq!(
            round.outcome.as_ref().map(|o| o.values_by_participant.len()),
            Some(2)
        );
        assert_eq!(
            ledger.resolve(&id, outcome(&[("A", 1)])),
            Err(RoundLedgerError::AlreadyResolved(id))
        );
    }

    #[test]
    fn test_resolve_retired_round_rejected() {
        let mut ledger = RoundLedger::new();
        ledger.open(RoundRef::numbered(1));
        ledger.open(RoundRef::numbered(2));
        let old = RoundId::for_number(1);
        assert_eq!(
            ledger.resolve(&old, outcome(&[("A", 6)])),
            Err(RoundLedgerError::Retired(old))
        );
    }

    #[test]
    fn test_resolve_unknown_round() {
        let mut ledger = RoundLedger::new();
        let id = RoundId::new("ghost");
        assert_eq!(
            ledger.resolve(&id, outcome(&[])),
            Err(RoundLedgerError::UnknownRound(id))
        );
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_outcome_wire_shape() {
        let json = serde_json::to_value(outcome(&[("A", 4)])).unwrap();
        assert_eq!(json["valuesByParticipant"]["A"], 4);
        assert_eq!(json["initiator"], "u1");
    }
}
