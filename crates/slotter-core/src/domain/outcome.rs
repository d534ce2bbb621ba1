//! Outcome model: what happened after a decision was applied.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AttemptId, TaskId};

/// Terminal result of the action executor for one decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplyOutcome {
    Committed,
    Failed { retryable: bool, reason: String },
}

impl ApplyOutcome {
    pub fn failed(retryable: bool, reason: impl Into<String>) -> Self {
        ApplyOutcome::Failed {
            retryable,
            reason: reason.into(),
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, ApplyOutcome::Committed)
    }
}

/// Classification recorded in the feedback sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedbackOutcome {
    /// Placement written to calendar and task store.
    Committed,
    /// Task was already placed; nothing done.
    AlreadyScheduled,
    Deferred,
    Rejected,
    Failed,
    /// A created calendar event could not be cancelled after a failed task
    /// update. Needs operator attention.
    CompensationFailed,
}

/// Append-only record for the downstream learning collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub task_id: TaskId,
    pub attempt_id: AttemptId,
    pub outcome: FeedbackOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Extra structured context (slot, retry counts, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    pub recorded_at: DateTime<Utc>,
}

impl FeedbackRecord {
    pub fn new(
        task_id: TaskId,
        attempt_id: AttemptId,
        outcome: FeedbackOutcome,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            attempt_id,
            outcome,
            reason: None,
            context: None,
            recorded_at,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}
