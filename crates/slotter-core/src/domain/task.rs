//! Task model.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::decision::RejectReason;
use super::hours::HourRange;
use super::ids::TaskId;
use super::interval::TimeRange;

/// Ordered priority. `Low < Medium < High < Urgent`.
///
/// Accepts names (`"high"`) or the task store's numeric levels
/// (1 = low … 4 = urgent).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase", try_from = "PriorityRepr")]
pub enum Priority {
    #[default]
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(Priority::Low),
            2 => Some(Priority::Medium),
            3 => Some(Priority::High),
            4 => Some(Priority::Urgent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PriorityRepr {
    Level(u8),
    Name(String),
}

impl TryFrom<PriorityRepr> for Priority {
    type Error = String;

    fn try_from(repr: PriorityRepr) -> Result<Self, Self::Error> {
        match repr {
            PriorityRepr::Level(level) => {
                Priority::from_level(level).ok_or_else(|| format!("unknown priority level {level}"))
            }
            PriorityRepr::Name(name) => match name.to_ascii_lowercase().as_str() {
                "low" => Ok(Priority::Low),
                "medium" | "normal" => Ok(Priority::Medium),
                "high" => Ok(Priority::High),
                "urgent" => Ok(Priority::Urgent),
                other => Err(format!("unknown priority '{other}'")),
            },
        }
    }
}

/// Who put a task on the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledBy {
    Engine,
    Manual,
}

/// Task lifecycle as recorded by the task store.
///
/// Only the action executor moves a task to `Scheduled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Scheduled {
        slot: TimeRange,
        scheduled_by: ScheduledBy,
    },
    Failed {
        reason: String,
    },
}

impl TaskStatus {
    pub fn kind(&self) -> StatusKind {
        match self {
            TaskStatus::Pending => StatusKind::Pending,
            TaskStatus::Scheduled { .. } => StatusKind::Scheduled,
            TaskStatus::Failed { .. } => StatusKind::Failed,
        }
    }

    pub fn scheduled_slot(&self) -> Option<TimeRange> {
        match self {
            TaskStatus::Scheduled { slot, .. } => Some(*slot),
            _ => None,
        }
    }
}

/// Discriminant of [`TaskStatus`], used as the expected value of a
/// compare-and-set status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Pending,
    Scheduled,
    Failed,
}

/// Labels recognised on tasks. Matching ignores case, spaces and underscores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskLabel {
    /// A human owns this task's placement.
    ManualScheduled,
    /// Ignore the scope's activity hours for this task.
    OverrideActivityHours,
}

impl TaskLabel {
    fn canonical(&self) -> &'static str {
        match self {
            TaskLabel::ManualScheduled => "manualscheduled",
            TaskLabel::OverrideActivityHours => "overrideactivityhours",
        }
    }

    pub fn matches(&self, label: &str) -> bool {
        let folded: String = label
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        folded == self.canonical()
    }
}

/// A task to be placed on the calendar.
///
/// Built from an inbound event once duration and category are resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: Option<String>,
    pub duration: TimeDelta,
    pub priority: Priority,
    pub deadline: Option<DateTime<Utc>>,
    pub category: Option<String>,
    /// Soft preference, interpreted in the reference timezone.
    pub preferred_hours: Vec<HourRange>,
    pub labels: Vec<String>,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, title: impl Into<String>, duration: TimeDelta) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            duration,
            priority: Priority::default(),
            deadline: None,
            category: None,
            preferred_hours: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_preferred_hours(mut self, hours: Vec<HourRange>) -> Self {
        self.preferred_hours = hours;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn has_label(&self, label: TaskLabel) -> bool {
        self.labels.iter().any(|l| label.matches(l))
    }

    /// Structural checks that no amount of recomputing availability can fix.
    pub fn validate(&self, max_duration: TimeDelta) -> Result<(), RejectReason> {
        if self.id.is_blank() {
            return Err(RejectReason::BlankTaskId);
        }
        if self.duration <= TimeDelta::zero() {
            return Err(RejectReason::NonPositiveDuration);
        }
        if self.duration > max_duration {
            return Err(RejectReason::DurationTooLong {
                minutes: self.duration.num_minutes(),
                max_minutes: max_duration.num_minutes(),
            });
        }
        Ok(())
    }
}
