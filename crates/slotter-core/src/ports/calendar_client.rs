//! CalendarClient port - カレンダープロバイダ
//!
//! 読み取り（busy 取得）と書き込み（イベント作成 / 取り消し）の両方を持つ。
//! 書き込みは action executor だけが行う。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{
    AttemptId, CalendarId, CalendarRef, ClientError, EventId, LocalRange, TaskId, TimeRange,
};

/// Event to create for a placed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCalendarEvent {
    pub calendar_id: CalendarId,
    pub task_id: TaskId,
    pub title: String,
    pub range: TimeRange,
    /// Same key on a retried create must not produce a second event.
    pub idempotency_key: String,
}

impl NewCalendarEvent {
    pub fn new(
        calendar_id: CalendarId,
        task_id: TaskId,
        attempt_id: AttemptId,
        title: impl Into<String>,
        range: TimeRange,
    ) -> Self {
        let idempotency_key = format!("{task_id}:{attempt_id}");
        Self {
            calendar_id,
            task_id,
            title: title.into(),
            range,
            idempotency_key,
        }
    }
}

#[async_trait]
pub trait CalendarClient: Send + Sync {
    /// Busy intervals of `calendar` overlapping `range`, in the calendar's own
    /// wall-clock time.
    async fn fetch_busy_intervals(
        &self,
        calendar: &CalendarRef,
        range: TimeRange,
    ) -> Result<Vec<LocalRange>, ClientError>;

    async fn create_event(&self, event: NewCalendarEvent) -> Result<EventId, ClientError>;

    async fn cancel_event(
        &self,
        calendar_id: &CalendarId,
        event_id: &EventId,
    ) -> Result<(), ClientError>;
}
