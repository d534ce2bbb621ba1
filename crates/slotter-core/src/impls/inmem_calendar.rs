//! InMemoryCalendar - カレンダープロバイダのテスト用実装
//!
//! 作成したイベントは以後の busy 取得にも現れる（実プロバイダと同じ）。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::Mutex;

use super::faults::FaultInjector;
use crate::domain::{CalendarId, CalendarRef, ClientError, EventId, LocalRange, TaskId, TimeRange};
use crate::ports::{CalendarClient, NewCalendarEvent};

/// An event created through [`CalendarClient::create_event`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedEvent {
    pub id: EventId,
    pub calendar_id: CalendarId,
    pub task_id: TaskId,
    pub title: String,
    pub range: TimeRange,
}

#[derive(Default)]
struct CalendarState {
    busy: HashMap<CalendarId, Vec<LocalRange>>,
    events: Vec<CreatedEvent>,
    by_idempotency_key: HashMap<String, EventId>,
    next_event: u64,
}

#[derive(Default)]
pub struct InMemoryCalendar {
    state: Mutex<CalendarState>,
    faults: FaultInjector,
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripted failures for `"fetch_busy_intervals"`,
    /// `"fetch_busy_intervals:<calendar id>"`, `"create_event"` and
    /// `"cancel_event"`.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Make `calendar` known, with no busy time.
    pub async fn add_calendar(&self, calendar: impl Into<CalendarId>) {
        self.state
            .lock()
            .await
            .busy
            .entry(calendar.into())
            .or_default();
    }

    pub async fn add_busy(&self, calendar: impl Into<CalendarId>, range: LocalRange) {
        self.state
            .lock()
            .await
            .busy
            .entry(calendar.into())
            .or_default()
            .push(range);
    }

    pub async fn events(&self) -> Vec<CreatedEvent> {
        self.state.lock().await.events.clone()
    }
}

fn to_local(range: &TimeRange, tz: Tz) -> LocalRange {
    LocalRange::new(
        range.start.with_timezone(&tz).naive_local(),
        range.end.with_timezone(&tz).naive_local(),
    )
}

#[async_trait]
impl CalendarClient for InMemoryCalendar {
    async fn fetch_busy_intervals(
        &self,
        calendar: &CalendarRef,
        range: TimeRange,
    ) -> Result<Vec<LocalRange>, ClientError> {
        self.faults.check("fetch_busy_intervals").await?;
        self.faults
            .check(&format!("fetch_busy_intervals:{}", calendar.id))
            .await?;

        let state = self.state.lock().await;
        let Some(busy) = state.busy.get(&calendar.id) else {
            return Err(ClientError::NotFound(calendar.id.to_string()));
        };
        let window = to_local(&range, calendar.timezone);
        let mut out: Vec<LocalRange> = busy
            .iter()
            .filter(|b| b.start < window.end && window.start < b.end)
            .copied()
            .collect();
        out.extend(
            state
                .events
                .iter()
                .filter(|e| e.calendar_id == calendar.id && e.range.overlaps(&range))
                .map(|e| to_local(&e.range, calendar.timezone)),
        );
        Ok(out)
    }

    async fn create_event(&self, event: NewCalendarEvent) -> Result<EventId, ClientError> {
        self.faults.check("create_event").await?;

        let mut state = self.state.lock().await;
        if !state.busy.contains_key(&event.calendar_id) {
            return Err(ClientError::NotFound(event.calendar_id.to_string()));
        }
        if let Some(existing) = state.by_idempotency_key.get(&event.idempotency_key) {
            return Ok(existing.clone());
        }
        state.next_event += 1;
        let id = EventId::new(format!("evt-{}", state.next_event));
        state
            .by_idempotency_key
            .insert(event.idempotency_key.clone(), id.clone());
        state.events.push(CreatedEvent {
            id: id.clone(),
            calendar_id: event.calendar_id,
            task_id: event.task_id,
            title: event.title,
            range: event.range,
        });
        Ok(id)
    }

    async fn cancel_event(
        &self,
        calendar_id: &CalendarId,
        event_id: &EventId,
    ) -> Result<(), ClientError> {
        self.faults.check("cancel_event").await?;

        let mut state = self.state.lock().await;
        state
            .events
            .retain(|e| !(&e.calendar_id == calendar_id && &e.id == event_id));
        state.by_idempotency_key.retain(|_, id| id != event_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AttemptId, TaskId};
    use chrono::{NaiveDate, TimeZone, Utc};
    use chrono_tz::UTC;
    use ulid::Ulid;

    fn utc(h: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn created_events_show_up_as_busy_time() {
        let cal = InMemoryCalendar::new();
        let work = CalendarRef::new("work", UTC);
        cal.add_busy(
            "work",
            LocalRange::new(
                NaiveDate::from_ymd_opt(2025, 3, 10).unwrap().and_hms_opt(9, 0, 0).unwrap(),
                NaiveDate::from_ymd_opt(2025, 3, 10).unwrap().and_hms_opt(10, 0, 0).unwrap(),
            ),
        )
        .await;

        let event = NewCalendarEvent::new(
            work.id.clone(),
            TaskId::new("t1"),
            AttemptId::from_ulid(Ulid::new()),
            "Write report",
            TimeRange::new(utc(11), utc(12)),
        );
        let first = cal.create_event(event.clone()).await.unwrap();
        // same idempotency key: no second event
        let again = cal.create_event(event).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(cal.events().await.len(), 1);

        let busy = cal
            .fetch_busy_intervals(&work, TimeRange::new(utc(8), utc(18)))
            .await
            .unwrap();
        assert_eq!(busy.len(), 2);

        cal.cancel_event(&work.id, &first).await.unwrap();
        assert!(cal.events().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_calendar_is_not_found() {
        let cal = InMemoryCalendar::new();
        let err = cal
            .fetch_busy_intervals(&CalendarRef::new("nope", UTC), TimeRange::new(utc(8), utc(9)))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotFound(_)));
    }
}
