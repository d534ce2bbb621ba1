//! Decision model: the engine's single authoritative answer per attempt.
//!
//! A `Decision` is immutable once emitted and is consumed exactly once by the
//! action executor.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::ErrorKind;
use super::ids::{AttemptId, CalendarId, TaskId};
use super::interval::TimeRange;
use super::task::{Priority, StatusKind};

/// Why a candidate scored the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RationaleTag {
    MeetsDeadline,
    NoDeadline,
    PreferredHours,
    PartlyPreferredHours,
    OutsidePreferredHours,
    NoPreference,
    Earliest,
}

/// The placement chosen for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub slot: TimeRange,
    /// Calendar the event is created on.
    pub calendar_id: CalendarId,
    /// Event title.
    pub title: String,
    pub score: f64,
    pub rationale: Vec<RationaleTag>,
    /// Task status observed under the lock; the executor's status update is
    /// conditional on it.
    pub prior_status: StatusKind,
}

/// "No decision now, safe to retry later".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DeferReason {
    ConcurrentDecision,
    DeadlineUnreachable,
    NoWindowLongEnough,
    NoFreeTime,
    BelowThreshold { best_score: f64, min_score: f64 },
    CalendarUnavailable { detail: String },
    TaskStoreUnavailable { detail: String },
    LeaseExpired,
    Internal { detail: String },
}

impl fmt::Display for DeferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeferReason::ConcurrentDecision => f.write_str("concurrent decision in progress"),
            DeferReason::DeadlineUnreachable => f.write_str("deadline unreachable"),
            DeferReason::NoWindowLongEnough => f.write_str("no free slot long enough"),
            DeferReason::NoFreeTime => f.write_str("no free time in range"),
            DeferReason::BelowThreshold {
                best_score,
                min_score,
            } => write!(
                f,
                "no candidate reached minimum score (best {best_score:.3} < {min_score:.3})"
            ),
            DeferReason::CalendarUnavailable { detail } => {
                write!(f, "calendar unavailable: {detail}")
            }
            DeferReason::TaskStoreUnavailable { detail } => {
                write!(f, "task store unavailable: {detail}")
            }
            DeferReason::LeaseExpired => f.write_str("lease expired during evaluation"),
            DeferReason::Internal { detail } => write!(f, "internal failure: {detail}"),
        }
    }
}

/// "This attempt's input is structurally invalid" (or excluded by policy).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    BlankTaskId,
    NonPositiveDuration,
    DurationTooLong { minutes: i64, max_minutes: i64 },
    UnknownScope { scope: String },
    ManualScheduling,
    AutoScheduleDisabled { scope: String },
    PriorityBelowThreshold { priority: Priority, min: Priority },
}

impl DeferReason {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeferReason::ConcurrentDecision | DeferReason::LeaseExpired => ErrorKind::LockBusy,
            DeferReason::DeadlineUnreachable
            | DeferReason::NoWindowLongEnough
            | DeferReason::NoFreeTime
            | DeferReason::BelowThreshold { .. } => ErrorKind::NoViableSlot,
            DeferReason::CalendarUnavailable { .. } | DeferReason::TaskStoreUnavailable { .. } => {
                ErrorKind::TransientIo
            }
            DeferReason::Internal { .. } => ErrorKind::PersistentIo,
        }
    }
}

impl RejectReason {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::BlankTaskId => f.write_str("task id is blank"),
            RejectReason::NonPositiveDuration => f.write_str("duration must be positive"),
            RejectReason::DurationTooLong {
                minutes,
                max_minutes,
            } => write!(f, "duration {minutes}m exceeds maximum {max_minutes}m"),
            RejectReason::UnknownScope { scope } => write!(f, "unknown calendar scope '{scope}'"),
            RejectReason::ManualScheduling => f.write_str("task is manually scheduled"),
            RejectReason::AutoScheduleDisabled { scope } => {
                write!(f, "auto-scheduling disabled for scope '{scope}'")
            }
            RejectReason::PriorityBelowThreshold { priority, min } => {
                write!(f, "priority {priority} below auto-scheduling threshold {min}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Placed {
        task_id: TaskId,
        attempt_id: AttemptId,
        placement: Placement,
    },
    Deferred {
        task_id: TaskId,
        attempt_id: AttemptId,
        reason: DeferReason,
    },
    Rejected {
        task_id: TaskId,
        attempt_id: AttemptId,
        reason: RejectReason,
    },
}

impl Decision {
    pub fn task_id(&self) -> &TaskId {
        match self {
            Decision::Placed { task_id, .. }
            | Decision::Deferred { task_id, .. }
            | Decision::Rejected { task_id, .. } => task_id,
        }
    }

    pub fn attempt_id(&self) -> AttemptId {
        match self {
            Decision::Placed { attempt_id, .. }
            | Decision::Deferred { attempt_id, .. }
            | Decision::Rejected { attempt_id, .. } => *attempt_id,
        }
    }

    pub fn is_placed(&self) -> bool {
        matches!(self, Decision::Placed { .. })
    }

    /// Failure class of a non-placement.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Decision::Placed { .. } => None,
            Decision::Deferred { reason, .. } => Some(reason.kind()),
            Decision::Rejected { reason, .. } => Some(reason.kind()),
        }
    }

    /// Human-readable reason for non-placements.
    pub fn reason(&self) -> Option<String> {
        match self {
            Decision::Placed { .. } => None,
            Decision::Deferred { reason, .. } => Some(reason.to_string()),
            Decision::Rejected { reason, .. } => Some(reason.to_string()),
        }
    }
}
