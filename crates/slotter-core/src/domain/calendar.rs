//! Calendar-side data: sources of busy time and derived free windows.

use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::ids::CalendarId;
use super::interval::{LocalRange, TimeRange};

/// A calendar the engine must respect, and the timezone its busy times are
/// reported in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarRef {
    pub id: CalendarId,
    pub timezone: Tz,
}

impl CalendarRef {
    pub fn new(id: impl Into<CalendarId>, timezone: Tz) -> Self {
        Self {
            id: id.into(),
            timezone,
        }
    }
}

/// Busy time of one calendar for one decision. Read-only input.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarSource {
    pub id: CalendarId,
    pub timezone: Tz,
    pub busy: Vec<LocalRange>,
}

impl CalendarSource {
    pub fn new(calendar: &CalendarRef, busy: Vec<LocalRange>) -> Self {
        Self {
            id: calendar.id.clone(),
            timezone: calendar.timezone,
            busy,
        }
    }
}

/// A window free across every relevant calendar. Ephemeral; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityWindow {
    pub range: TimeRange,
    /// Reference timezone the window was computed for.
    pub timezone: Tz,
}

impl AvailabilityWindow {
    pub fn new(range: TimeRange, timezone: Tz) -> Self {
        Self { range, timezone }
    }

    pub fn local_start(&self) -> DateTime<Tz> {
        self.range.start.with_timezone(&self.timezone)
    }

    pub fn local_end(&self) -> DateTime<Tz> {
        self.range.end.with_timezone(&self.timezone)
    }
}
