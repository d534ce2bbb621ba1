//! Placement Scorer.
//!
//! Ranks candidate slots inside free windows against a task's duration,
//! deadline, and preferred hours. Pure and deterministic.

mod scorer;

pub use scorer::Scorer;
pub(crate) use scorer::ceil_to;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::{DeferReason, RationaleTag, TaskId, TimeRange};

/// Weight of each score term. Must be ordered
/// `deadline > preferred > earliness > 0` so a lower term never overturns a
/// higher one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub deadline: f64,
    pub preferred: f64,
    pub earliness: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            deadline: 1000.0,
            preferred: 100.0,
            earliness: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacementCandidate {
    pub task_id: TaskId,
    pub slot: TimeRange,
    pub score: f64,
    pub rationale: Vec<RationaleTag>,
}

/// Why no candidate was selected.
#[derive(Debug, Clone, PartialEq)]
pub enum NoPlacement {
    /// No slot can finish before the task's deadline.
    DeadlineUnreachable,
    /// Free time exists, but no window holds the task.
    NoWindowLongEnough,
    BelowThreshold { best: f64, min: f64 },
    NoFreeTime,
}

impl fmt::Display for NoPlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&DeferReason::from(self.clone()), f)
    }
}

impl From<NoPlacement> for DeferReason {
    fn from(value: NoPlacement) -> Self {
        match value {
            NoPlacement::DeadlineUnreachable => DeferReason::DeadlineUnreachable,
            NoPlacement::NoWindowLongEnough => DeferReason::NoWindowLongEnough,
            NoPlacement::BelowThreshold { best, min } => DeferReason::BelowThreshold {
                best_score: best,
                min_score: min,
            },
            NoPlacement::NoFreeTime => DeferReason::NoFreeTime,
        }
    }
}

/// Highest score at or above `min_score`; ties go to the earliest start, then
/// the lowest task id.
pub fn select_best(candidates: &[PlacementCandidate], min_score: f64) -> Option<PlacementCandidate> {
    candidates
        .iter()
        .filter(|c| c.score >= min_score)
        .min_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.slot.start.cmp(&b.slot.start))
                .then_with(|| a.task_id.cmp(&b.task_id))
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone, Utc};

    fn candidate(task: &str, hour: u32, score: f64) -> PlacementCandidate {
        let start = Utc.with_ymd_and_hms(2025, 3, 10, hour, 0, 0).unwrap();
        PlacementCandidate {
            task_id: TaskId::new(task),
            slot: TimeRange::starting_at(start, TimeDelta::minutes(30)),
            score,
            rationale: vec![],
        }
    }

    #[test]
    fn highest_score_wins() {
        let best = select_best(&[candidate("a", 9, 1.0), candidate("a", 10, 2.0)], 0.0).unwrap();
        assert_eq!(best.score, 2.0);
    }

    #[test]
    fn ties_break_on_start_then_task_id() {
        let best = select_best(&[candidate("a", 10, 1.0), candidate("a", 9, 1.0)], 0.0).unwrap();
        assert_eq!(best.slot.start.format("%H").to_string(), "09");

        let best = select_best(&[candidate("b", 9, 1.0), candidate("a", 9, 1.0)], 0.0).unwrap();
        assert_eq!(best.task_id, TaskId::new("a"));
    }

    #[test]
    fn nothing_below_min_score() {
        assert!(select_best(&[candidate("a", 9, 1.0)], 1.5).is_none());
        assert!(select_best(&[], 0.0).is_none());
    }

    #[test]
    fn no_placement_maps_to_defer_reason() {
        assert_eq!(
            NoPlacement::DeadlineUnreachable.to_string(),
            "deadline unreachable"
        );
        assert_eq!(
            DeferReason::from(NoPlacement::NoFreeTime),
            DeferReason::NoFreeTime
        );
    }
}
