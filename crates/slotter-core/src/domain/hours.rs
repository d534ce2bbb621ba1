//! Hour-of-day ranges and weekly activity hours.

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

const MINUTES_PER_DAY: u16 = 24 * 60;

/// `[start, end)` within one local day, in minutes from midnight.
///
/// Serialized as `{ "start": "HH:MM", "end": "HH:MM" }`; `end` may be
/// `"24:00"` to mean end of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawHourRange", into = "RawHourRange")]
pub struct HourRange {
    start_min: u16,
    end_min: u16,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HourRangeError {
    #[error("invalid time of day '{0}', expected HH:MM")]
    Malformed(String),

    #[error("hour range {start}..{end} is empty or inverted")]
    Inverted { start: String, end: String },
}

impl HourRange {
    pub fn new(start_min: u16, end_min: u16) -> Result<Self, HourRangeError> {
        if start_min >= end_min || end_min > MINUTES_PER_DAY {
            return Err(HourRangeError::Inverted {
                start: format_hhmm(start_min),
                end: format_hhmm(end_min),
            });
        }
        Ok(Self { start_min, end_min })
    }

    /// Parse `"09:00"`, `"17:30"`.
    pub fn parse(start: &str, end: &str) -> Result<Self, HourRangeError> {
        Self::new(parse_hhmm(start)?, parse_hhmm(end)?)
    }

    pub fn start_minutes(&self) -> u16 {
        self.start_min
    }

    pub fn end_minutes(&self) -> u16 {
        self.end_min
    }

    pub fn start_time(&self) -> NaiveTime {
        minutes_to_time(self.start_min)
    }

    /// `None` when the range runs to the end of the day.
    pub fn end_time(&self) -> Option<NaiveTime> {
        (self.end_min < MINUTES_PER_DAY).then(|| minutes_to_time(self.end_min))
    }

    pub fn whole_day() -> Self {
        Self {
            start_min: 0,
            end_min: MINUTES_PER_DAY,
        }
    }
}

impl fmt::Display for HourRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", format_hhmm(self.start_min), format_hhmm(self.end_min))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawHourRange {
    start: String,
    end: String,
}

impl TryFrom<RawHourRange> for HourRange {
    type Error = HourRangeError;

    fn try_from(raw: RawHourRange) -> Result<Self, Self::Error> {
        HourRange::parse(&raw.start, &raw.end)
    }
}

impl From<HourRange> for RawHourRange {
    fn from(range: HourRange) -> Self {
        Self {
            start: format_hhmm(range.start_min),
            end: format_hhmm(range.end_min),
        }
    }
}

fn parse_hhmm(value: &str) -> Result<u16, HourRangeError> {
    let malformed = || HourRangeError::Malformed(value.to_string());
    let (h, m) = value.trim().split_once(':').ok_or_else(malformed)?;
    let h: u16 = h.parse().map_err(|_| malformed())?;
    let m: u16 = m.parse().map_err(|_| malformed())?;
    if m >= 60 || h > 24 || (h == 24 && m != 0) {
        return Err(malformed());
    }
    Ok(h * 60 + m)
}

fn format_hhmm(minutes: u16) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

fn minutes_to_time(minutes: u16) -> NaiveTime {
    NaiveTime::from_hms_opt(u32::from(minutes / 60), u32::from(minutes % 60), 0)
        .unwrap_or(NaiveTime::MIN)
}

/// Allowed hour ranges per weekday.
///
/// A weekday with no ranges allows nothing. [`WeeklyHours::any_hour`] is the
/// unrestricted schedule.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WeeklyHours {
    days: [Vec<HourRange>; 7],
}

impl WeeklyHours {
    pub fn any_hour() -> Self {
        Self::every_day(vec![HourRange::whole_day()])
    }

    pub fn every_day(ranges: Vec<HourRange>) -> Self {
        Self {
            days: std::array::from_fn(|_| ranges.clone()),
        }
    }

    pub fn with_day(mut self, day: Weekday, ranges: Vec<HourRange>) -> Self {
        self.days[day.num_days_from_monday() as usize] = ranges;
        self
    }

    pub fn ranges_for(&self, day: Weekday) -> &[HourRange] {
        &self.days[day.num_days_from_monday() as usize]
    }

    /// True when no weekday has any range.
    pub fn is_empty(&self) -> bool {
        self.days.iter().all(Vec::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn parses_and_displays() {
        let r = HourRange::parse("09:00", "17:30").unwrap();
        assert_eq!(r.start_minutes(), 540);
        assert_eq!(r.end_minutes(), 1050);
        assert_eq!(r.to_string(), "09:00-17:30");
    }

    #[test]
    fn end_of_day_is_allowed() {
        let r = HourRange::parse("22:00", "24:00").unwrap();
        assert_eq!(r.end_time(), None);
    }

    #[rstest]
    #[case("9", "10:00")]
    #[case("09:60", "10:00")]
    #[case("25:00", "26:00")]
    #[case("24:30", "24:45")]
    fn malformed_times_are_rejected(#[case] start: &str, #[case] end: &str) {
        assert!(matches!(
            HourRange::parse(start, end),
            Err(HourRangeError::Malformed(_))
        ));
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(matches!(
            HourRange::parse("17:00", "09:00"),
            Err(HourRangeError::Inverted { .. })
        ));
    }

    #[test]
    fn deserializes_from_json() {
        let r: HourRange = serde_json::from_str(r#"{"start":"08:15","end":"12:00"}"#).unwrap();
        assert_eq!(r.start_minutes(), 8 * 60 + 15);

        let bad = serde_json::from_str::<HourRange>(r#"{"start":"12:00","end":"08:00"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn weekly_hours_per_day() {
        let work = HourRange::parse("09:00", "17:00").unwrap();
        let hours = WeeklyHours::default().with_day(Weekday::Mon, vec![work]);

        assert_eq!(hours.ranges_for(Weekday::Mon), &[work]);
        assert!(hours.ranges_for(Weekday::Sun).is_empty());
        assert!(!hours.is_empty());
        assert!(WeeklyHours::default().is_empty());
    }
}
