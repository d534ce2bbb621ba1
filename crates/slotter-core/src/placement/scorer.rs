//! Candidate generation and scoring.

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;

use super::{NoPlacement, PlacementCandidate, ScoringWeights, select_best};
use crate::availability::{day_range, merge_busy};
use crate::domain::{AvailabilityWindow, RationaleTag, Task, TimeRange};

/// Fraction treated as "entirely inside preferred hours".
const FULL_MATCH: f64 = 1.0 - 1e-9;

#[derive(Debug, Clone)]
pub struct Scorer {
    weights: ScoringWeights,
    granularity: TimeDelta,
    /// Timezone preferred hours are read in.
    tz: Tz,
}

impl Scorer {
    pub fn new(weights: ScoringWeights, granularity: TimeDelta, tz: Tz) -> Self {
        Self {
            weights,
            granularity: granularity.max(TimeDelta::seconds(1)),
            tz,
        }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// One candidate per window that can hold the task (and finish before its
    /// deadline, if any).
    pub fn candidates(
        &self,
        windows: &[AvailabilityWindow],
        task: &Task,
        horizon: TimeRange,
    ) -> Vec<PlacementCandidate> {
        let preferred = self.preferred_within(task, span_of(windows, horizon));

        let mut out: Vec<PlacementCandidate> = windows
            .iter()
            .filter_map(|w| self.choose_slot(&w.range, task, &preferred))
            .map(|slot| {
                let fraction = preferred_fraction(&slot, task, &preferred);
                let score = self.combine(fraction, earliness(&slot, &horizon));
                PlacementCandidate {
                    task_id: task.id.clone(),
                    slot,
                    score,
                    rationale: rationale(task, fraction),
                }
            })
            .collect();

        if let Some(first) = out.iter_mut().min_by_key(|c| c.slot.start) {
            first.rationale.push(RationaleTag::Earliest);
        }
        out
    }

    /// Score of placing `task` at `slot`. Assumes the slot is admissible
    /// (fits before the deadline).
    pub fn score(&self, slot: &TimeRange, task: &Task, horizon: &TimeRange) -> f64 {
        let preferred = self.preferred_within(task, *slot);
        self.combine(preferred_fraction(slot, task, &preferred), earliness(slot, horizon))
    }

    /// Choose the best slot among `windows`, or say why there is none.
    pub fn place(
        &self,
        windows: &[AvailabilityWindow],
        task: &Task,
        horizon: TimeRange,
        min_score: f64,
    ) -> Result<PlacementCandidate, NoPlacement> {
        let candidates = self.candidates(windows, task, horizon);
        if candidates.is_empty() {
            return Err(if task.deadline.is_some() {
                NoPlacement::DeadlineUnreachable
            } else if windows.is_empty() {
                NoPlacement::NoFreeTime
            } else {
                NoPlacement::NoWindowLongEnough
            });
        }

        select_best(&candidates, min_score).ok_or_else(|| NoPlacement::BelowThreshold {
            best: candidates
                .iter()
                .map(|c| c.score)
                .fold(f64::NEG_INFINITY, f64::max),
            min: min_score,
        })
    }

    fn combine(&self, preferred: f64, earliness: f64) -> f64 {
        // every admissible candidate meets its deadline (or has none)
        let deadline = 1.0;
        self.weights.deadline * deadline
            + self.weights.preferred * preferred
            + self.weights.earliness * earliness
    }

    /// Sub-slot of `window` for `task`.
    ///
    /// Starts at the window start unless preferred hours say otherwise, in
    /// which case the earliest start whose slot intersects a preferred range
    /// wins. Inside a preferred range that is the range start clamped to the
    /// window.
    ///
    /// Starts are rounded up to the slot granularity only when the rounded
    /// slot still fits before `usable_end`; otherwise the unaligned start is
    /// kept.
    fn choose_slot(
        &self,
        window: &TimeRange,
        task: &Task,
        preferred: &[TimeRange],
    ) -> Option<TimeRange> {
        let usable_end = match task.deadline {
            Some(deadline) => window.end.min(deadline),
            None => window.end,
        };
        let latest = usable_end.checked_sub_signed(task.duration)?;
        if window.start > latest {
            return None;
        }
        let fit = |t: DateTime<Utc>| {
            let aligned = ceil_to(t, self.granularity);
            if aligned <= latest { aligned } else { t.min(latest) }
        };
        let earliest = fit(window.start);

        for p in preferred {
            if p.end <= window.start {
                continue;
            }
            if p.start >= usable_end {
                break;
            }
            let start = fit(window.start.max(p.start));
            let slot = TimeRange::starting_at(start, task.duration);
            if slot.overlaps(p) {
                return Some(slot);
            }
        }
        Some(TimeRange::starting_at(earliest, task.duration))
    }

    /// The task's preferred hours as absolute, merged ranges covering `span`.
    fn preferred_within(&self, task: &Task, span: TimeRange) -> Vec<TimeRange> {
        if task.preferred_hours.is_empty() {
            return Vec::new();
        }
        // a range may start on the local day before `span` begins
        let first = (span.start - TimeDelta::days(1)).with_timezone(&self.tz).date_naive();
        let last = span.end.with_timezone(&self.tz).date_naive();

        let ranges = first
            .iter_days()
            .take_while(|d| *d <= last)
            .flat_map(|date| {
                task.preferred_hours
                    .iter()
                    .filter_map(move |h| day_range(self.tz, date, h))
            })
            .collect();
        merge_busy(ranges)
    }
}

fn span_of(windows: &[AvailabilityWindow], horizon: TimeRange) -> TimeRange {
    windows.iter().fold(horizon, |acc, w| {
        TimeRange::new(acc.start.min(w.range.start), acc.end.max(w.range.end))
    })
}

/// Share of `slot` inside preferred hours; 1 when the task has none.
fn preferred_fraction(slot: &TimeRange, task: &Task, preferred: &[TimeRange]) -> f64 {
    if task.preferred_hours.is_empty() {
        return 1.0;
    }
    let total = slot.duration().num_seconds();
    if total <= 0 {
        return 0.0;
    }
    let inside: i64 = preferred
        .iter()
        .filter_map(|p| p.intersect(slot))
        .map(|r| r.duration().num_seconds())
        .sum();
    (inside as f64 / total as f64).clamp(0.0, 1.0)
}

/// 1 at the horizon start, falling linearly to 0 at its end.
fn earliness(slot: &TimeRange, horizon: &TimeRange) -> f64 {
    let length = horizon.duration().num_seconds();
    if length <= 0 {
        return 1.0;
    }
    let offset = (slot.start - horizon.start).num_seconds();
    (1.0 - offset as f64 / length as f64).clamp(0.0, 1.0)
}

fn rationale(task: &Task, preferred_fraction: f64) -> Vec<RationaleTag> {
    let deadline = if task.deadline.is_some() {
        RationaleTag::MeetsDeadline
    } else {
        RationaleTag::NoDeadline
    };
    let preference = if task.preferred_hours.is_empty() {
        RationaleTag::NoPreference
    } else if preferred_fraction >= FULL_MATCH {
        RationaleTag::PreferredHours
    } else if preferred_fraction > 0.0 {
        RationaleTag::PartlyPreferredHours
    } else {
        RationaleTag::OutsidePreferredHours
    };
    vec![deadline, preference]
}

/// Round up to a multiple of `step` since the Unix epoch.
pub(crate) fn ceil_to(t: DateTime<Utc>, step: TimeDelta) -> DateTime<Utc> {
    let step_ms = step.num_milliseconds().max(1);
    let ms = t.timestamp_millis();
    let rem = ms.rem_euclid(step_ms);
    let extra_nanos = t.timestamp_subsec_nanos() % 1_000_000;
    if rem == 0 && extra_nanos == 0 {
        return t;
    }
    DateTime::from_timestamp_millis(ms - rem + step_ms).unwrap_or(t)
}
