//! Step paths derived from a position delta.

use std::collections::BTreeMap;
use std::time::Duration;

use arcade_room::ParticipantId;

/// Every cell from `previous` to `new`, both ends included.
///
/// No movement, or movement backwards, yields no steps.
pub fn steps_between(previous: i64, new: i64) -> Vec<i64> {
    if new <= previous {
        return Vec::new();
    }
    (previous..=new).collect()
}

/// Derived, ephemeral walk for one applied update.
///
/// Never the source of truth: the model already holds `targets` by the time
/// a plan exists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnimationPlan {
    paths: BTreeMap<ParticipantId, Vec<i64>>,
    start: BTreeMap<ParticipantId, i64>,
    targets: BTreeMap<ParticipantId, i64>,
    max_steps: usize,
}

impl AnimationPlan {
    /// Plan the walk from `previous` to `current`.
    ///
    /// Participants without a previous position appear directly at their
    /// current one.
    pub fn between(
        previous: &BTreeMap<ParticipantId, i64>,
        current: &BTreeMap<ParticipantId, i64>,
    ) -> Self {
        let mut paths = BTreeMap::new();
        let mut start = BTreeMap::new();

        for (id, &to) in current {
            let from = previous.get(id).copied().unwrap_or(to);
            let steps = steps_between(from, to);
            if steps.is_empty() {
                start.insert(id.clone(), to);
            } else {
                start.insert(id.clone(), from);
                paths.insert(id.clone(), steps);
            }
        }

        let max_steps = paths.values().map(Vec::len).max().unwrap_or(0);
        Self {
            paths,
            start,
            targets: current.clone(),
            max_steps,
        }
    }

    /// Steps for one participant; empty if it does not move.
    pub fn steps(&self, id: &ParticipantId) -> &[i64] {
        self.paths.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Length of the longest path, i.e. the number of shared ticks.
    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn is_empty(&self) -> bool {
        self.max_steps == 0
    }

    /// Participants that move at all.
    pub fn movers(&self) -> impl Iterator<Item = &ParticipantId> {
        self.paths.keys()
    }

    /// Positions shown before the first tick.
    pub fn start(&self) -> &BTreeMap<ParticipantId, i64> {
        &self.start
    }

    /// Positions shown once the walk completes.
    pub fn targets(&self) -> &BTreeMap<ParticipantId, i64> {
        &self.targets
    }

    /// Wall time of the whole walk: one dwell per shared tick.
    pub fn total_duration(&self, dwell: Duration) -> Duration {
        dwell * u32::try_from(self.max_steps).unwrap_or(u32::MAX)
    }

    /// Entry at shared index `k` for `id`, if its path is that long.
    pub(crate) fn step_at(&self, id: &ParticipantId, k: usize) -> Option<i64> {
        self.paths.get(id).and_then(|steps| steps.get(k)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions(pairs: &[(&str, i64)]) -> BTreeMap<ParticipantId, i64> {
        pairs
            .iter()
            .map(|(id, pos)| (ParticipantId::new(*id), *pos))
            .collect()
    }

    #[test]
    fn test_steps_include_both_ends() {
        assert_eq!(steps_between(2, 5), [2, 3, 4, 5]);
        assert_eq!(steps_between(2, 5).len(), 4);
    }

    #[test]
    fn test_zero_distance_has_no_steps() {
        assert!(steps_between(3, 3).is_empty());
    }

    #[test]
    fn test_backwards_move_has_no_steps() {
        assert!(steps_between(7, 4).is_empty());
    }

    #[test]
    fn test_plan_uses_longest_path() {
        let plan = AnimationPlan::between(
            &positions(&[("A", 0), ("B", 0), ("C", 4)]),
            &positions(&[("A", 2), ("B", 5), ("C", 4)]),
        );
        assert_eq!(plan.steps(&ParticipantId::new("A")), [0, 1, 2]);
        assert_eq!(plan.steps(&ParticipantId::new("B")), [0, 1, 2, 3, 4, 5]);
        assert!(plan.steps(&ParticipantId::new("C")).is_empty());
        assert_eq!(plan.max_steps(), 6);
        assert_eq!(plan.movers().count(), 2);
    }

    #[test]
    fn test_total_duration_is_longest_path_not_sum() {
        let plan = AnimationPlan::between(
            &positions(&[("A", 0), ("B", 0)]),
            &positions(&[("A", 2), ("B", 5)]),
        );
        let dwell = Duration::from_millis(500);
        assert_eq!(plan.total_duration(dwell), Duration::from_millis(3000));
    }

    #[test]
    fn test_new_participant_appears_in_place() {
        let plan = AnimationPlan::between(&positions(&[]), &positions(&[("A", 3)]));
        assert!(plan.is_empty());
        assert_eq!(plan.start()[&ParticipantId::new("A")], 3);
    }

    #[test]
    fn test_start_holds_previous_positions_of_movers() {
        let plan = AnimationPlan::between(
            &positions(&[("A", 2), ("B", 2)]),
            &positions(&[("A", 6), ("B", 2)]),
        );
        assert_eq!(plan.start(), &positions(&[("A", 2), ("B", 2)]));
        assert_eq!(plan.targets(), &positions(&[("A", 6), ("B", 2)]));
    }
}
