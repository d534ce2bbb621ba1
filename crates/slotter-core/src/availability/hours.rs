//! Activity hours: a hard per-weekday restriction on free windows.

use chrono::{Datelike, NaiveDate, NaiveTime};
use chrono_tz::Tz;

use super::{local_start_to_utc, local_end_to_utc};
use crate::domain::{AvailabilityWindow, HourRange, TimeRange, WeeklyHours};

/// Intersect each window with the allowed hours of every local day it spans.
///
/// Windows are split at local midnight, so a result never crosses a day
/// boundary in `tz`.
pub fn restrict_to_hours(
    windows: &[AvailabilityWindow],
    weekly: &WeeklyHours,
    tz: Tz,
) -> Vec<AvailabilityWindow> {
    let mut out = Vec::new();
    for window in windows {
        let first = window.range.start.with_timezone(&tz).date_naive();
        let last = window.range.end.with_timezone(&tz).date_naive();

        for date in first.iter_days().take_while(|d| *d <= last) {
            for hours in weekly.ranges_for(date.weekday()) {
                let Some(allowed) = day_range(tz, date, hours) else {
                    continue;
                };
                if let Some(range) = window.range.intersect(&allowed) {
                    out.push(AvailabilityWindow::new(range, tz));
                }
            }
        }
    }
    out.sort_by_key(|w| w.range);
    out
}

/// Absolute range covered by `hours` on local `date`.
pub(crate) fn day_range(tz: Tz, date: NaiveDate, hours: &HourRange) -> Option<TimeRange> {
    let start = local_start_to_utc(tz, date.and_time(hours.start_time()))?;
    let end = match hours.end_time() {
        Some(end) => local_end_to_utc(tz, date.and_time(end))?,
        // 24:00 is the next day's midnight; resolve it like a start so
        // consecutive days never overlap.
        None => local_start_to_utc(tz, date.succ_opt()?.and_time(NaiveTime::MIN))?,
    };
    let range = TimeRange::new(start, end);
    (!range.is_empty()).then_some(range)
}
