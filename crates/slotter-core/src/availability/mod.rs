//! Calendar Availability Engine.
//!
//! Turns the busy intervals of several calendars, each in its own timezone,
//! into one ordered list of free windows on the absolute timeline.
//! Everything here is pure and synchronous.

mod hours;

pub use hours::restrict_to_hours;
pub(crate) use hours::day_range;

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;

use crate::domain::{AvailabilityWindow, CalendarSource, TimeRange};

/// Longest DST gap we walk across when resolving a non-existent local time.
const MAX_GAP_MINUTES: i64 = 24 * 60;

/// Resolve a local wall-clock start time.
///
/// Ambiguous times (fall-back) take the earliest instant; non-existent times
/// (spring-forward) move to the first valid instant after the gap.
pub fn local_start_to_utc(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    resolve(tz, local, |earliest, _| earliest)
}

/// Like [`local_start_to_utc`] but ambiguous times take the latest instant,
/// so an interval ending in a repeated hour covers all of it.
pub fn local_end_to_utc(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    resolve(tz, local, |_, latest| latest)
}

fn resolve(
    tz: Tz,
    local: NaiveDateTime,
    pick: fn(DateTime<Tz>, DateTime<Tz>) -> DateTime<Tz>,
) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(t) => Some(t.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, latest) => Some(pick(earliest, latest).with_timezone(&Utc)),
        LocalResult::None => (1..=MAX_GAP_MINUTES).find_map(|m| {
            let shifted = local.checked_add_signed(TimeDelta::minutes(m))?;
            match tz.from_local_datetime(&shifted) {
                LocalResult::Single(t) => Some(t.with_timezone(&Utc)),
                LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
                LocalResult::None => None,
            }
        }),
    }
}

/// Busy intervals of one calendar on the absolute timeline.
/// Intervals that are empty or inverted after conversion are dropped.
pub fn normalize(source: &CalendarSource) -> Vec<TimeRange> {
    source
        .busy
        .iter()
        .filter_map(|local| {
            let start = local_start_to_utc(source.timezone, local.start)?;
            let end = local_end_to_utc(source.timezone, local.end)?;
            let range = TimeRange::new(start, end);
            (!range.is_empty()).then_some(range)
        })
        .collect()
}

/// Union of busy intervals as maximal, non-overlapping, non-touching blocks
/// in start order.
pub fn merge_busy(mut ranges: Vec<TimeRange>) -> Vec<TimeRange> {
    ranges.retain(|r| !r.is_empty());
    ranges.sort_by_key(|r| (r.start, r.end));

    let mut merged: Vec<TimeRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Complement of `busy` (merged, sorted) within `[start, end)`.
fn complement(busy: &[TimeRange], start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<TimeRange> {
    let mut free = Vec::new();
    let mut cursor = start;
    for block in busy {
        if block.end <= cursor {
            continue;
        }
        if block.start >= end {
            break;
        }
        if block.start > cursor {
            free.push(TimeRange::new(cursor, block.start));
        }
        cursor = cursor.max(block.end);
    }
    if cursor < end {
        free.push(TimeRange::new(cursor, end));
    }
    free
}

/// Free windows across every calendar within `[range_start, range_end)`.
///
/// Zero calendars or an empty range yield no windows.
pub fn compute_free_windows(
    calendars: &[CalendarSource],
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
    reference_tz: Tz,
) -> Vec<AvailabilityWindow> {
    if calendars.is_empty() || range_start >= range_end {
        return Vec::new();
    }

    let busy = merge_busy(calendars.iter().flat_map(normalize).collect());
    complement(&busy, range_start, range_end)
        .into_iter()
        .map(|range| AvailabilityWindow::new(range, reference_tz))
        .collect()
}

/// `windows` minus every range in `taken`.
pub fn subtract_ranges(windows: &[AvailabilityWindow], taken: &[TimeRange]) -> Vec<AvailabilityWindow> {
    if taken.is_empty() {
        return windows.to_vec();
    }
    let taken = merge_busy(taken.to_vec());
    windows
        .iter()
        .flat_map(|w| {
            complement(&taken, w.range.start, w.range.end)
                .into_iter()
                .map(move |range| AvailabilityWindow::new(range, w.timezone))
        })
        .collect()
}
