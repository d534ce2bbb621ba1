//! Inbound event: the structured payload forwarded by the webhook layer.
//!
//! Deliveries may be duplicated; `task_id` is the idempotency key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::hours::HourRange;
use super::ids::TaskId;
use super::task::Priority;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    #[serde(alias = "taskId", alias = "taskID")]
    pub task_id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Estimated duration in minutes. Absent means "ask the classifier, then
    /// fall back to the configured default".
    #[serde(default, alias = "durationEstimate")]
    pub duration_minutes: Option<i64>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(alias = "calendarScope")]
    pub calendar_scope: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub preferred_hours: Vec<HourRange>,
}

impl InboundEvent {
    pub fn new(task_id: impl Into<TaskId>, title: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            title: title.into(),
            description: None,
            duration_minutes: None,
            priority: Priority::default(),
            deadline: None,
            category: None,
            calendar_scope: scope.into(),
            labels: Vec::new(),
            preferred_hours: Vec::new(),
        }
    }

    pub fn with_duration_minutes(mut self, minutes: i64) -> Self {
        self.duration_minutes = Some(minutes);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn with_preferred_hours(mut self, hours: Vec<HourRange>) -> Self {
        self.preferred_hours = hours;
        self
    }

    /// Text handed to the classifier.
    pub fn classification_text(&self) -> String {
        match self.description.as_deref().map(str::trim) {
            Some(desc) if !desc.is_empty() => format!("{}\n\n{}", self.title, desc),
            _ => self.title.clone(),
        }
    }
}
