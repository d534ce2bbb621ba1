//! LockStore port - lock レコードの共有ストア
//!
//! 複数のエンジンインスタンスが同じストアを見る前提。
//! 排他の正しさはすべて `compare_and_set` の原子性に依存する。

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{HolderToken, LockStoreError, TaskId, TimeRange};

/// What a lease protects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum LockKey {
    /// One task: at most one decision in flight per task id.
    Task(TaskId),
    /// A shared calendar scope: serialises decisions that read the same
    /// calendars so two tasks are not placed into the same slot.
    Resource(String),
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::Task(id) => write!(f, "task:{id}"),
            LockKey::Resource(scope) => write!(f, "resource:{scope}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum LockPhase {
    /// Lease is owned until `expires_at`.
    Held,
    /// Released by its holder; new acquisitions wait until `until`.
    Cooling { until: DateTime<Utc> },
}

/// A slot promised to an attempt whose calendar write may still be in
/// flight. Later holders of the same resource key treat it as busy until
/// `until` or until the attempt clears it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotReservation {
    pub slot: TimeRange,
    pub holder: HolderToken,
    pub until: DateTime<Utc>,
}

/// Stored state of one key.
///
/// A released lease is kept as a `Cooling` tombstone that still names its
/// last holder. That is what lets a commit fence tell "released by me" from
/// "taken over by someone else".
///
/// Resource keys also carry the slot reservations of recent holders; they
/// survive later acquisitions until they expire or are cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub key: LockKey,
    pub holder: HolderToken,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub phase: LockPhase,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reservations: Vec<SlotReservation>,
}

impl LockRecord {
    pub fn held(
        key: LockKey,
        holder: HolderToken,
        acquired_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            holder,
            acquired_at,
            expires_at,
            phase: LockPhase::Held,
            reservations: Vec::new(),
        }
    }

    pub fn with_reservations(mut self, reservations: Vec<SlotReservation>) -> Self {
        self.reservations = reservations;
        self
    }

    /// Reservations still in force at `now`.
    pub fn reservations_at(&self, now: DateTime<Utc>) -> Vec<SlotReservation> {
        self.reservations
            .iter()
            .filter(|r| now < r.until)
            .cloned()
            .collect()
    }

    /// Could this record be dropped from the store at `now` without changing
    /// any decision? True once it no longer blocks, has no live reservation,
    /// and has been idle for `grace` (so an in-flight commit fence still
    /// finds its tombstone).
    pub fn is_reapable_at(&self, now: DateTime<Utc>, grace: TimeDelta) -> bool {
        let settled = match self.phase {
            LockPhase::Held => self.expires_at,
            LockPhase::Cooling { until } => until,
        };
        !self.blocks_at(now)
            && self.reservations.iter().all(|r| r.until <= now)
            && settled.checked_add_signed(grace).is_some_and(|t| t <= now)
    }

    pub fn is_held(&self) -> bool {
        matches!(self.phase, LockPhase::Held)
    }

    /// Does this record stop a new acquisition at `now`?
    pub fn blocks_at(&self, now: DateTime<Utc>) -> bool {
        match self.phase {
            LockPhase::Held => now < self.expires_at,
            LockPhase::Cooling { until } => now < until,
        }
    }

    /// Held and not yet expired.
    pub fn is_live_lease_at(&self, now: DateTime<Utc>) -> bool {
        self.is_held() && now < self.expires_at
    }
}

/// Shared, linearizable key/record store.
#[async_trait]
pub trait LockStore: Send + Sync {
    async fn get(&self, key: &LockKey) -> Result<Option<LockRecord>, LockStoreError>;

    /// Atomically replace the record for `key` iff the current record equals
    /// `expected` (`None` = absent). `new = None` deletes the key.
    ///
    /// Returns `Ok(false)` when the current record did not match.
    async fn compare_and_set(
        &self,
        key: &LockKey,
        expected: Option<&LockRecord>,
        new: Option<LockRecord>,
    ) -> Result<bool, LockStoreError>;

    /// Delete every record that [`LockRecord::is_reapable_at`] `now` with
    /// `grace`. Returns how many were deleted.
    async fn reap(&self, now: DateTime<Utc>, grace: TimeDelta) -> Result<usize, LockStoreError>;
}
