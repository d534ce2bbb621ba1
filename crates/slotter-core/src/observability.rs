//! Status views: outcome counters and lock state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{FeedbackOutcome, FeedbackRecord, HolderToken};
use crate::ports::{LockPhase, LockRecord};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub committed: usize,
    pub already_scheduled: usize,
    pub deferred: usize,
    pub rejected: usize,
    pub failed: usize,
    pub compensation_failed: usize,
}

impl OutcomeCounts {
    pub fn add(&mut self, outcome: FeedbackOutcome) {
        match outcome {
            FeedbackOutcome::Committed => self.committed += 1,
            FeedbackOutcome::AlreadyScheduled => self.already_scheduled += 1,
            FeedbackOutcome::Deferred => self.deferred += 1,
            FeedbackOutcome::Rejected => self.rejected += 1,
            FeedbackOutcome::Failed => self.failed += 1,
            FeedbackOutcome::CompensationFailed => self.compensation_failed += 1,
        }
    }

    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a FeedbackRecord>) -> Self {
        let mut counts = Self::default();
        for record in records {
            counts.add(record.outcome);
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.committed
            + self.already_scheduled
            + self.deferred
            + self.rejected
            + self.failed
            + self.compensation_failed
    }
}

/// What the lock store says about one key right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LockStatus {
    Free,
    Held {
        holder: HolderToken,
        expires_at: DateTime<Utc>,
    },
    CoolingDown {
        last_holder: HolderToken,
        until: DateTime<Utc>,
    },
}

impl LockStatus {
    pub fn at(record: Option<&LockRecord>, now: DateTime<Utc>) -> Self {
        match record {
            Some(r) if r.blocks_at(now) => match r.phase {
                LockPhase::Held => LockStatus::Held {
                    holder: r.holder,
                    expires_at: r.expires_at,
                },
                LockPhase::Cooling { until } => LockStatus::CoolingDown {
                    last_holder: r.holder,
                    until,
                },
            },
            _ => LockStatus::Free,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AttemptId, TaskId};
    use crate::ports::LockKey;
    use chrono::{TimeDelta, TimeZone};
    use ulid::Ulid;

    #[test]
    fn counts_by_outcome() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        let rec = |outcome| {
            FeedbackRecord::new(TaskId::new("t"), AttemptId::from_ulid(Ulid::new()), outcome, now)
        };
        let records = vec![
            rec(FeedbackOutcome::Committed),
            rec(FeedbackOutcome::Committed),
            rec(FeedbackOutcome::Deferred),
            rec(FeedbackOutcome::CompensationFailed),
        ];

        let counts = OutcomeCounts::from_records(&records);
        assert_eq!(counts.committed, 2);
        assert_eq!(counts.deferred, 1);
        assert_eq!(counts.compensation_failed, 1);
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn expired_lease_reads_as_free() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        let holder = HolderToken::from_ulid(Ulid::new());
        let rec = LockRecord::held(
            LockKey::Task(TaskId::new("t")),
            holder,
            t0,
            t0 + TimeDelta::seconds(30),
        );

        assert_eq!(
            LockStatus::at(Some(&rec), t0),
            LockStatus::Held {
                holder,
                expires_at: t0 + TimeDelta::seconds(30)
            }
        );
        assert_eq!(LockStatus::at(Some(&rec), t0 + TimeDelta::seconds(30)), LockStatus::Free);
        assert_eq!(LockStatus::at(None, t0), LockStatus::Free);
    }
}
