//! Lock-stepped movement animation.
//!
//! An [`AnimationPlan`] turns the before/after positions of an applied update
//! into per-participant step paths. A [`LockstepScheduler`] walks every path
//! on one shared step index, so no participant runs ahead of the others and
//! the whole walk takes `max_steps` dwells regardless of how many move.

pub mod plan;
pub mod scheduler;

pub use plan::{AnimationPlan, steps_between};
pub use scheduler::{AnimationTiming, Frame, LockstepScheduler};
