//! Scheduler configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file is a valid (if useless)
//! configuration: it has no scopes, and every event is rejected as
//! "unknown calendar scope".

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{TimeDelta, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{CalendarId, CalendarRef, HourRange, Priority, WeeklyHours};
use crate::executor::RetryPolicy;
use crate::placement::ScoringWeights;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Root of the TOML document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub lock: LockSection,
    #[serde(default)]
    pub scoring: ScoringSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub timeouts: TimeoutsSection,
    #[serde(default)]
    pub scopes: BTreeMap<String, ScopeConfig>,
}

/// [engine] 段
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// IANA name. Preferred hours and activity hours are read in this zone.
    #[serde(default = "default_reference_timezone")]
    pub reference_timezone: String,
    #[serde(default = "default_lookahead_days")]
    pub lookahead_days: u32,
    #[serde(default = "default_slot_granularity_minutes")]
    pub slot_granularity_minutes: u32,
    #[serde(default = "default_duration_minutes")]
    pub default_duration_minutes: i64,
    #[serde(default = "default_max_duration_minutes")]
    pub max_duration_minutes: i64,
    #[serde(default)]
    pub min_score: f64,
    /// Place around a calendar that cannot be fetched instead of deferring.
    #[serde(default)]
    pub skip_unavailable_calendars: bool,
    #[serde(default = "default_max_concurrent_attempts")]
    pub max_concurrent_attempts: usize,
}

fn default_reference_timezone() -> String {
    "UTC".to_string()
}

fn default_lookahead_days() -> u32 {
    7
}

fn default_slot_granularity_minutes() -> u32 {
    5
}

fn default_duration_minutes() -> i64 {
    30
}

fn default_max_duration_minutes() -> i64 {
    12 * 60
}

fn default_max_concurrent_attempts() -> usize {
    16
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            reference_timezone: default_reference_timezone(),
            lookahead_days: default_lookahead_days(),
            slot_granularity_minutes: default_slot_granularity_minutes(),
            default_duration_minutes: default_duration_minutes(),
            max_duration_minutes: default_max_duration_minutes(),
            min_score: 0.0,
            skip_unavailable_calendars: false,
            max_concurrent_attempts: default_max_concurrent_attempts(),
        }
    }
}

impl EngineSection {
    pub fn reference_tz(&self) -> Result<Tz, ConfigError> {
        parse_tz(&self.reference_timezone)
    }

    pub fn lookahead(&self) -> TimeDelta {
        TimeDelta::days(i64::from(self.lookahead_days))
    }

    pub fn slot_granularity(&self) -> TimeDelta {
        TimeDelta::minutes(i64::from(self.slot_granularity_minutes.max(1)))
    }

    pub fn default_duration(&self) -> TimeDelta {
        TimeDelta::minutes(self.default_duration_minutes)
    }

    pub fn max_duration(&self) -> TimeDelta {
        TimeDelta::minutes(self.max_duration_minutes)
    }
}

/// [lock] 段
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSection {
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    /// 0 disables the post-release cooldown.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Also lock the calendar scope while deciding.
    #[serde(default = "default_true")]
    pub use_resource_lock: bool,
}

fn default_lease_secs() -> u64 {
    60
}

fn default_cooldown_secs() -> u64 {
    3
}

fn default_true() -> bool {
    true
}

impl Default for LockSection {
    fn default() -> Self {
        Self {
            lease_secs: default_lease_secs(),
            cooldown_secs: default_cooldown_secs(),
            use_resource_lock: true,
        }
    }
}

impl LockSection {
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// [scoring] 段
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringSection {
    #[serde(default = "default_deadline_weight")]
    pub deadline_weight: f64,
    #[serde(default = "default_preferred_weight")]
    pub preferred_weight: f64,
    #[serde(default = "default_earliness_weight")]
    pub earliness_weight: f64,
}

fn default_deadline_weight() -> f64 {
    1000.0
}

fn default_preferred_weight() -> f64 {
    100.0
}

fn default_earliness_weight() -> f64 {
    10.0
}

impl Default for ScoringSection {
    fn default() -> Self {
        Self {
            deadline_weight: default_deadline_weight(),
            preferred_weight: default_preferred_weight(),
            earliness_weight: default_earliness_weight(),
        }
    }
}

impl ScoringSection {
    pub fn weights(&self) -> ScoringWeights {
        ScoringWeights {
            deadline: self.deadline_weight,
            preferred: self.preferred_weight,
            earliness: self.earliness_weight,
        }
    }
}

/// [retry] 段
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter: true,
        }
    }
}

impl RetrySection {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
        }
    }
}

/// [timeouts] 段
///
/// Each must be strictly shorter than the lock lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsSection {
    #[serde(default = "default_fetch_secs")]
    pub fetch_secs: u64,
    #[serde(default = "default_action_secs")]
    pub action_secs: u64,
    #[serde(default = "default_classify_secs")]
    pub classify_secs: u64,
}

fn default_fetch_secs() -> u64 {
    10
}

fn default_action_secs() -> u64 {
    15
}

fn default_classify_secs() -> u64 {
    5
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            fetch_secs: default_fetch_secs(),
            action_secs: default_action_secs(),
            classify_secs: default_classify_secs(),
        }
    }
}

impl TimeoutsSection {
    pub fn fetch(&self) -> Duration {
        Duration::from_secs(self.fetch_secs)
    }

    pub fn action(&self) -> Duration {
        Duration::from_secs(self.action_secs)
    }

    pub fn classify(&self) -> Duration {
        Duration::from_secs(self.classify_secs)
    }
}

/// [scopes.<name>] 段: the calendars one inbound `calendar_scope` stands for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeConfig {
    #[serde(default)]
    pub calendars: Vec<CalendarRef>,
    /// Calendar that receives created events. Defaults to the first calendar.
    #[serde(default)]
    pub target_calendar: Option<CalendarId>,
    #[serde(default)]
    pub activity_hours: ActivityHours,
    #[serde(default)]
    pub auto_schedule: AutoSchedule,
}

impl ScopeConfig {
    pub fn target_calendar(&self) -> Option<CalendarId> {
        self.target_calendar
            .clone()
            .or_else(|| self.calendars.first().map(|c| c.id.clone()))
    }
}

/// Per-weekday allowed local hours. A scope with no day configured allows any
/// hour; once any day is configured, unconfigured days allow none.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityHours {
    #[serde(default, alias = "mon")]
    pub monday: Option<HourRange>,
    #[serde(default, alias = "tue")]
    pub tuesday: Option<HourRange>,
    #[serde(default, alias = "wed")]
    pub wednesday: Option<HourRange>,
    #[serde(default, alias = "thu")]
    pub thursday: Option<HourRange>,
    #[serde(default, alias = "fri")]
    pub friday: Option<HourRange>,
    #[serde(default, alias = "sat")]
    pub saturday: Option<HourRange>,
    #[serde(default, alias = "sun")]
    pub sunday: Option<HourRange>,
}

impl ActivityHours {
    fn day(&self, day: Weekday) -> Option<HourRange> {
        match day {
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
            Weekday::Sun => self.sunday,
        }
    }

    /// `None` means no restriction.
    pub fn weekly(&self) -> Option<WeeklyHours> {
        const DAYS: [Weekday; 7] = [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ];
        if DAYS.iter().all(|d| self.day(*d).is_none()) {
            return None;
        }
        let weekly = DAYS.iter().fold(WeeklyHours::default(), |acc, d| {
            acc.with_day(*d, self.day(*d).into_iter().collect())
        });
        Some(weekly)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoSchedule {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub min_priority: Priority,
}

impl Default for AutoSchedule {
    fn default() -> Self {
        Self {
            enabled: true,
            min_priority: Priority::Low,
        }
    }
}

impl SchedulerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SchedulerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn scope(&self, name: &str) -> Option<&ScopeConfig> {
        self.scopes.get(name)
    }

    /// Upper bound on how long applying one decision keeps external writes
    /// in flight: the event creation and the task update, each retried with
    /// the full per-call timeout and the longest backoff.
    pub fn commit_budget(&self) -> Duration {
        let r = &self.retry;
        let per_call = self
            .timeouts
            .action()
            .saturating_mul(r.max_attempts)
            .saturating_add(
                Duration::from_millis(r.max_delay_ms).saturating_mul(r.max_attempts.saturating_sub(1)),
            );
        per_call.saturating_mul(2)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.reference_tz()?;

        let e = &self.engine;
        if e.lookahead_days == 0 {
            return invalid("engine.lookahead_days must be positive");
        }
        if !(1..=60).contains(&e.slot_granularity_minutes) {
            return invalid("engine.slot_granularity_minutes must be within 1..=60");
        }
        if e.max_duration_minutes <= 0 {
            return invalid("engine.max_duration_minutes must be positive");
        }
        if e.default_duration_minutes <= 0 || e.default_duration_minutes > e.max_duration_minutes {
            return invalid("engine.default_duration_minutes must be within 1..=max_duration_minutes");
        }
        if !e.min_score.is_finite() {
            return invalid("engine.min_score must be finite");
        }
        if e.max_concurrent_attempts == 0 {
            return invalid("engine.max_concurrent_attempts must be positive");
        }

        let lease = self.lock.lease_secs;
        if lease == 0 {
            return invalid("lock.lease_secs must be positive");
        }
        for (name, secs) in [
            ("fetch_secs", self.timeouts.fetch_secs),
            ("action_secs", self.timeouts.action_secs),
            ("classify_secs", self.timeouts.classify_secs),
        ] {
            if secs == 0 || secs >= lease {
                return invalid(format!(
                    "timeouts.{name} = {secs} must be positive and shorter than lock.lease_secs = {lease}"
                ));
            }
        }

        let w = &self.scoring;
        if !(w.deadline_weight > w.preferred_weight
            && w.preferred_weight > w.earliness_weight
            && w.earliness_weight > 0.0)
        {
            return invalid(
                "scoring weights must satisfy deadline_weight > preferred_weight > earliness_weight > 0",
            );
        }

        let r = &self.retry;
        if r.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if !(r.multiplier >= 1.0) {
            return invalid("retry.multiplier must be >= 1.0");
        }
        if r.base_delay_ms > r.max_delay_ms {
            return invalid("retry.base_delay_ms must not exceed retry.max_delay_ms");
        }

        for (name, scope) in &self.scopes {
            if scope.calendars.is_empty() {
                return invalid(format!("scope '{name}' has no calendars"));
            }
            if let Some(target) = &scope.target_calendar
                && !scope.calendars.iter().any(|c| &c.id == target)
            {
                return invalid(format!(
                    "scope '{name}' target_calendar '{target}' is not one of its calendars"
                ));
            }
        }

        Ok(())
    }
}

fn parse_tz(name: &str) -> Result<Tz, ConfigError> {
    name.parse::<Tz>()
        .map_err(|_| ConfigError::Invalid(format!("unknown timezone '{name}'")))
}

fn invalid<T>(message: impl Into<String>) -> Result<T, ConfigError> {
    Err(ConfigError::Invalid(message.into()))
}
