//! Action Executor.
//!
//! Applies a `Placed` decision to the outside world: calendar event first,
//! then the task status. The two writes are not atomic, so a failed status
//! update is followed by a compensating cancel of the event.
//!
//! Every mutation is preceded by a commit-fence check against the lock store
//! and runs under a timeout with bounded retries for transient failures.

mod retry;

pub use retry::RetryPolicy;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::domain::{
    ApplyOutcome, AttemptId, ClientError, Decision, ErrorKind, EventId, FeedbackOutcome,
    FeedbackRecord, Placement, ScheduledBy, SchedulerError, TaskId, TaskStatus,
};
use crate::lock::{CommitFence, LockManager};
use crate::ports::{CalendarClient, Clock, FeedbackSink, NewCalendarEvent, TaskStore};

#[derive(Debug)]
enum CallError {
    /// The fence no longer holds; a newer attempt owns the task.
    Superseded,
    Client(ClientError),
}

impl From<CallError> for SchedulerError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Superseded => {
                SchedulerError::new(ErrorKind::LockBusy, "superseded by a newer attempt")
            }
            CallError::Client(e) => e.into(),
        }
    }
}

/// Failed outcome whose retry flag follows the error's kind.
fn failed(context: &str, err: CallError) -> ApplyOutcome {
    let err = SchedulerError::from(err);
    tracing::debug!(kind = ?err.kind(), "apply failure classified");
    ApplyOutcome::failed(err.kind().is_retryable(), format!("{context}: {}", err.message()))
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::Superseded => f.write_str("superseded by a newer attempt"),
            CallError::Client(e) => e.fmt(f),
        }
    }
}

pub struct ActionExecutor {
    calendar: Arc<dyn CalendarClient>,
    tasks: Arc<dyn TaskStore>,
    feedback: Arc<dyn FeedbackSink>,
    locks: LockManager,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl ActionExecutor {
    pub fn new(
        calendar: Arc<dyn CalendarClient>,
        tasks: Arc<dyn TaskStore>,
        feedback: Arc<dyn FeedbackSink>,
        locks: LockManager,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            calendar,
            tasks,
            feedback,
            locks,
            clock,
            retry,
            call_timeout,
        }
    }

    /// Apply `decision`. Deferred and rejected decisions need no external
    /// writes and are reported as committed.
    pub async fn apply(&self, decision: &Decision, fence: &CommitFence) -> ApplyOutcome {
        match decision {
            Decision::Placed {
                task_id,
                attempt_id,
                placement,
            } => self.commit(task_id, *attempt_id, placement, fence).await,
            Decision::Deferred { .. } | Decision::Rejected { .. } => ApplyOutcome::Committed,
        }
    }

    async fn commit(
        &self,
        task_id: &TaskId,
        attempt_id: AttemptId,
        placement: &Placement,
        fence: &CommitFence,
    ) -> ApplyOutcome {
        let event = NewCalendarEvent::new(
            placement.calendar_id.clone(),
            task_id.clone(),
            attempt_id,
            placement.title.clone(),
            placement.slot,
        );
        let event_id = match self
            .call("create_event", Some(fence), || {
                self.calendar.create_event(event.clone())
            })
            .await
        {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(%task_id, %attempt_id, error = %err, "calendar event not created");
                return failed("calendar event creation failed", err);
            }
        };

        let status = TaskStatus::Scheduled {
            slot: placement.slot,
            scheduled_by: ScheduledBy::Engine,
        };
        let updated = self
            .call("update_status", Some(fence), || {
                self.tasks
                    .update_status(task_id, placement.prior_status, status.clone())
            })
            .await;

        match updated {
            Ok(()) => {
                tracing::info!(%task_id, %attempt_id, %event_id, slot = %placement.slot, "placement committed");
                ApplyOutcome::Committed
            }
            Err(CallError::Client(ClientError::Conflict))
                if self.already_applied(task_id, placement).await =>
            {
                // an earlier try went through but its response was lost
                tracing::info!(%task_id, %attempt_id, %event_id, "placement committed (confirmed on re-read)");
                ApplyOutcome::Committed
            }
            Err(err) => {
                tracing::warn!(%task_id, %attempt_id, %event_id, error = %err, "task update failed; cancelling event");
                self.compensate(task_id, attempt_id, placement, &event_id)
                    .await;
                failed("task update failed", err)
            }
        }
    }

    async fn already_applied(&self, task_id: &TaskId, placement: &Placement) -> bool {
        matches!(
            self.tasks.status(task_id).await,
            Ok(Some(TaskStatus::Scheduled { slot, .. })) if slot == placement.slot
        )
    }

    /// Best-effort cancel of an event whose task update failed.
    async fn compensate(
        &self,
        task_id: &TaskId,
        attempt_id: AttemptId,
        placement: &Placement,
        event_id: &EventId,
    ) {
        let cancelled = self
            .call("cancel_event", None, || {
                self.calendar.cancel_event(&placement.calendar_id, event_id)
            })
            .await;
        let Err(err) = cancelled else {
            tracing::info!(%task_id, %attempt_id, %event_id, "orphaned event cancelled");
            return;
        };

        tracing::error!(
            %task_id,
            %attempt_id,
            %event_id,
            calendar_id = %placement.calendar_id,
            error = %err,
            "compensation failed: calendar event left without a scheduled task"
        );
        let record = FeedbackRecord::new(
            task_id.clone(),
            attempt_id,
            FeedbackOutcome::CompensationFailed,
            self.clock.now(),
        )
        .with_reason(format!("could not cancel event {event_id}: {err}"))
        .with_context(json!({
            "calendar_id": placement.calendar_id,
            "event_id": event_id,
            "slot": placement.slot,
        }));
        if let Err(err) = self.feedback.record(record).await {
            tracing::error!(%task_id, %attempt_id, %event_id, error = %err, "compensation failure could not be recorded");
        }
    }

    /// Run `op` with fence check, timeout, and retry.
    async fn call<T, F, Fut>(
        &self,
        op: &'static str,
        fence: Option<&CommitFence>,
        mut f: F,
    ) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            if let Some(fence) = fence
                && !self.locks.fence_holds(fence).await
            {
                tracing::warn!(op, %fence, "commit fence lost; not mutating");
                return Err(CallError::Superseded);
            }

            let result = match tokio::time::timeout(self.call_timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::Timeout),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && self.retry.should_retry(attempts) => {
                    let delay = self.retry.delay_for(attempts, err.retry_after());
                    tracing::warn!(op, attempts, ?delay, error = %err, "transient failure; retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(CallError::Client(err)),
            }
        }
    }
}
