//! Shared-index stepping over an [`AnimationPlan`].
//!
//! The scheduler is a pure state machine: each [`LockstepScheduler::tick`]
//! advances the one shared index and reports where everybody stands. The
//! owner decides when to tick (the room actor does so on a dwell-length
//! timer), which keeps it on the same serialized context as model updates.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use arcade_config::AnimationConfig;
use arcade_room::ParticipantId;

use crate::plan::AnimationPlan;

/// Dwell per shared step and the "in motion" part of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationTiming {
    pub dwell: Duration,
    pub jump: Duration,
}

impl Default for AnimationTiming {
    fn default() -> Self {
        Self {
            dwell: Duration::from_millis(500),
            jump: Duration::from_millis(400),
        }
    }
}

impl From<&AnimationConfig> for AnimationTiming {
    fn from(config: &AnimationConfig) -> Self {
        Self {
            dwell: config.step_dwell(),
            jump: config.jump().min(config.step_dwell()),
        }
    }
}

/// What to show after one shared tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Shared step index this frame shows.
    pub index: usize,
    /// Displayed position of every participant.
    pub positions: BTreeMap<ParticipantId, i64>,
    /// Participants that jumped on this tick.
    pub in_motion: BTreeSet<ParticipantId>,
    /// How long the jump of each mover lasts; the rest of the dwell is rest.
    pub jump: Duration,
}

/// Walks a plan one shared index at a time.
#[derive(Debug, Clone)]
pub struct LockstepScheduler {
    plan: AnimationPlan,
    jump: Duration,
    displayed: BTreeMap<ParticipantId, i64>,
    next_index: usize,
}

impl LockstepScheduler {
    pub fn new(plan: AnimationPlan, timing: AnimationTiming) -> Self {
        let displayed = plan.start().clone();
        Self {
            plan,
            jump: timing.jump.min(timing.dwell),
            displayed,
            next_index: 0,
        }
    }

    /// Advance the shared index; `None` once every path is exhausted.
    pub fn tick(&mut self) -> Option<Frame> {
        if self.is_complete() {
            return None;
        }
        let k = self.next_index;
        let mut in_motion = BTreeSet::new();
        for id in self.plan.movers() {
            if let Some(position) = self.plan.step_at(id, k) {
                self.displayed.insert(id.clone(), position);
                in_motion.insert(id.clone());
            }
        }
        self.next_index += 1;
        tracing::trace!(k, moving = in_motion.len(), "animation tick");

        Some(Frame {
            index: k,
            positions: self.displayed.clone(),
            in_motion,
            jump: self.jump,
        })
    }

    /// `true` once `max_steps` ticks have run.
    pub fn is_complete(&self) -> bool {
        self.next_index >= self.plan.max_steps()
    }

    /// Ticks still to run.
    pub fn remaining(&self) -> usize {
        self.plan.max_steps().saturating_sub(self.next_index)
    }

    pub fn displayed(&self) -> &BTreeMap<ParticipantId, i64> {
        &self.displayed
    }

    pub fn plan(&self) -> &AnimationPlan {
        &self.plan
    }
}
