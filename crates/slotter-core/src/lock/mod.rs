//! Agent Lock Manager.
//!
//! Grants leased, exclusive ownership of a task id (and optionally a calendar
//! scope) on top of a [`LockStore`]. All state lives in the store; the
//! manager itself is stateless and can be cloned freely.
//!
//! # Lifecycle of a key
//! - absent / expired / cooled down → `acquire` writes a `Held` record
//! - `Held` → `release` rewrites it as a `Cooling` tombstone naming the
//!   same holder; acquisitions are refused until the cooldown ends
//! - a new `acquire` overwrites the tombstone, which is what invalidates the
//!   previous holder's [`CommitFence`]
//! - resource keys carry slot reservations across acquisitions: a holder that
//!   decided on a slot leaves it reserved on release, and the next holder
//!   sees it as busy until the first attempt's commit finishes
//!
//! Store failures never grant a lock.

mod guard;

pub use guard::LeaseGuard;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

use crate::domain::{HolderToken, LockStoreError, TaskId, TimeRange};
use crate::ports::{Clock, IdGenerator, LockKey, LockPhase, LockRecord, LockStore, SlotReservation};

/// Compare-and-set retries before giving up on a contended key.
const MAX_CAS_ROUNDS: usize = 3;

/// Proof of a granted lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub key: LockKey,
    pub holder: HolderToken,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub lease: Duration,
    /// Slots other attempts had reserved under this key when it was granted.
    pub reserved: Vec<TimeRange>,
}

impl LockHandle {
    /// Time left on the lease at `now`.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> TimeDelta {
        (self.expires_at - now).max(TimeDelta::zero())
    }
}

/// A slot left reserved on a resource key by [`LockManager::release_reserving`].
/// Hand it back to [`LockManager::clear_reservation`] once the commit is over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationTicket {
    pub key: LockKey,
    pub holder: HolderToken,
    pub slot: TimeRange,
}

/// Why an acquisition was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Busy {
    #[error("{key} is held by {holder} until {until}")]
    Held {
        key: LockKey,
        holder: HolderToken,
        until: DateTime<Utc>,
    },

    #[error("{key} is cooling down until {until}")]
    CoolingDown { key: LockKey, until: DateTime<Utc> },

    /// Fail-closed: the store could not be consulted.
    #[error("lock store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<LockStoreError> for Busy {
    fn from(err: LockStoreError) -> Self {
        match err {
            LockStoreError::Unavailable(detail) => Busy::StoreUnavailable(detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenewError {
    #[error("lease expired or taken over")]
    Expired,

    #[error("lock store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<LockStoreError> for RenewError {
    fn from(err: LockStoreError) -> Self {
        match err {
            LockStoreError::Unavailable(detail) => RenewError::StoreUnavailable(detail),
        }
    }
}

/// The (key, holder) pairs a decision was made under.
///
/// Checked by the executor right before every external mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitFence {
    entries: Vec<(LockKey, HolderToken)>,
}

impl CommitFence {
    pub fn new(entries: Vec<(LockKey, HolderToken)>) -> Self {
        Self { entries }
    }

    pub fn for_handle(handle: &LockHandle) -> Self {
        Self::new(vec![(handle.key.clone(), handle.holder)])
    }

    pub fn entries(&self) -> &[(LockKey, HolderToken)] {
        &self.entries
    }
}

impl fmt::Display for CommitFence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|(key, holder)| format!("{key}@{holder}"))
            .collect();
        f.write_str(&parts.join(","))
    }
}

#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    cooldown: Duration,
}

impl LockManager {
    pub fn new(
        store: Arc<dyn LockStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        cooldown: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            ids,
            cooldown,
        }
    }

    /// Try to take the task lock. Never waits.
    pub async fn acquire(&self, task_id: &TaskId, lease: Duration) -> Result<LockHandle, Busy> {
        self.acquire_key(LockKey::Task(task_id.clone()), lease).await
    }

    /// Task lock first, then the resource lock. If the resource is busy the
    /// task lock is abandoned without cooldown.
    pub async fn acquire_with_resource(
        &self,
        task_id: &TaskId,
        resource: &str,
        lease: Duration,
    ) -> Result<Vec<LockHandle>, Busy> {
        let task = self.acquire(task_id, lease).await?;
        match self
            .acquire_key(LockKey::Resource(resource.to_string()), lease)
            .await
        {
            Ok(res) => Ok(vec![task, res]),
            Err(busy) => {
                self.abandon(&task).await;
                Err(busy)
            }
        }
    }

    async fn acquire_key(&self, key: LockKey, lease: Duration) -> Result<LockHandle, Busy> {
        for _ in 0..MAX_CAS_ROUNDS {
            let now = self.clock.now();
            let current = self.store.get(&key).await?;

            if let Some(record) = &current
                && record.blocks_at(now)
            {
                let busy = match record.phase {
                    LockPhase::Held => Busy::Held {
                        key: key.clone(),
                        holder: record.holder,
                        until: record.expires_at,
                    },
                    LockPhase::Cooling { until } => Busy::CoolingDown {
                        key: key.clone(),
                        until,
                    },
                };
                tracing::debug!(%key, reason = %busy, "lock busy");
                return Err(busy);
            }

            let carried = current
                .as_ref()
                .map(|r| r.reservations_at(now))
                .unwrap_or_default();
            let reserved = carried.iter().map(|r| r.slot).collect();
            let holder = self.ids.generate_holder_token();
            let record = LockRecord::held(key.clone(), holder, now, add(now, lease))
                .with_reservations(carried);
            if self
                .store
                .compare_and_set(&key, current.as_ref(), Some(record.clone()))
                .await?
            {
                tracing::debug!(%key, %holder, expires_at = %record.expires_at, "lock acquired");
                return Ok(LockHandle {
                    key,
                    holder,
                    acquired_at: now,
                    expires_at: record.expires_at,
                    lease,
                    reserved,
                });
            }
            // lost a race; the next round sees the winner's record
        }
        Err(Busy::StoreUnavailable(format!("{key}: contended")))
    }

    /// Extend the lease by its original length from now.
    pub async fn renew(&self, handle: &LockHandle) -> Result<LockHandle, RenewError> {
        // a reservation being cleared concurrently changes the record
        // without changing its holder, so a lost CAS is retried
        for _ in 0..MAX_CAS_ROUNDS {
            let now = self.clock.now();
            let current = self.store.get(&handle.key).await?;
            let Some(record) =
                current.filter(|r| r.holder == handle.holder && r.is_live_lease_at(now))
            else {
                return Err(RenewError::Expired);
            };

            let renewed = LockRecord {
                expires_at: add(now, handle.lease),
                ..record.clone()
            };
            if self
                .store
                .compare_and_set(&handle.key, Some(&record), Some(renewed.clone()))
                .await?
            {
                tracing::debug!(key = %handle.key, holder = %handle.holder, expires_at = %renewed.expires_at, "lease renewed");
                return Ok(LockHandle {
                    expires_at: renewed.expires_at,
                    ..handle.clone()
                });
            }
        }
        Err(RenewError::Expired)
    }

    /// Release `handle`. Idempotent; a lock now owned by someone else is
    /// left alone. Task locks enter the cooldown; resource locks do not.
    pub async fn release(&self, handle: &LockHandle) {
        self.tombstone(handle, self.cooldown_for(&handle.key), None)
            .await;
    }

    /// Release `handle` and leave `slot` reserved on its key for `ttl`.
    ///
    /// Returns `None` when the lease was no longer ours, in which case
    /// nothing was reserved.
    pub async fn release_reserving(
        &self,
        handle: &LockHandle,
        slot: TimeRange,
        ttl: Duration,
    ) -> Option<ReservationTicket> {
        let reservation = SlotReservation {
            slot,
            holder: handle.holder,
            until: add(self.clock.now(), ttl),
        };
        self.tombstone(handle, self.cooldown_for(&handle.key), Some(reservation))
            .await
            .then(|| ReservationTicket {
                key: handle.key.clone(),
                holder: handle.holder,
                slot,
            })
    }

    /// Drop the reservation behind `ticket`. Best-effort: a reservation that
    /// cannot be cleared still lapses at its expiry.
    pub async fn clear_reservation(&self, ticket: &ReservationTicket) {
        for _ in 0..MAX_CAS_ROUNDS {
            let current = match self.store.get(&ticket.key).await {
                Ok(Some(record)) => record,
                Ok(None) => return,
                Err(err) => {
                    tracing::warn!(key = %ticket.key, error = %err, "reservation not cleared; it will lapse");
                    return;
                }
            };
            if !current.reservations.iter().any(|r| r.holder == ticket.holder) {
                return;
            }
            let mut cleared = current.clone();
            cleared.reservations.retain(|r| r.holder != ticket.holder);
            match self
                .store
                .compare_and_set(&ticket.key, Some(&current), Some(cleared))
                .await
            {
                Ok(true) => {
                    tracing::debug!(key = %ticket.key, slot = %ticket.slot, "reservation cleared");
                    return;
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(key = %ticket.key, error = %err, "reservation not cleared; it will lapse");
                    return;
                }
            }
        }
    }

    /// Remove settled records (see [`LockRecord::is_reapable_at`]).
    pub async fn reap(&self, grace: Duration) -> Result<usize, LockStoreError> {
        let grace = TimeDelta::from_std(grace).unwrap_or(TimeDelta::MAX);
        let reaped = self.store.reap(self.clock.now(), grace).await?;
        if reaped > 0 {
            tracing::debug!(reaped, "settled lock records removed");
        }
        Ok(reaped)
    }

    fn cooldown_for(&self, key: &LockKey) -> Duration {
        match key {
            LockKey::Task(_) => self.cooldown,
            LockKey::Resource(_) => Duration::ZERO,
        }
    }

    async fn abandon(&self, handle: &LockHandle) {
        self.tombstone(handle, Duration::ZERO, None).await;
    }

    /// Rewrite our `Held` record as a `Cooling` tombstone, optionally adding
    /// a reservation. Returns whether the tombstone was written.
    async fn tombstone(
        &self,
        handle: &LockHandle,
        cooldown: Duration,
        reservation: Option<SlotReservation>,
    ) -> bool {
        for _ in 0..MAX_CAS_ROUNDS {
            let now = self.clock.now();
            let current = match self.store.get(&handle.key).await {
                Ok(current) => current,
                Err(err) => {
                    tracing::warn!(key = %handle.key, error = %err, "release failed; lease will expire");
                    return false;
                }
            };
            let Some(record) = current.filter(|r| r.holder == handle.holder && r.is_held()) else {
                return false;
            };

            // an expired lease is already free; no cooldown for it
            let until = if record.expires_at <= now {
                now
            } else {
                add(now, cooldown)
            };
            let mut reservations = record.reservations_at(now);
            reservations.extend(reservation.clone());
            let cooling = LockRecord {
                phase: LockPhase::Cooling { until },
                reservations,
                ..record.clone()
            };
            match self
                .store
                .compare_and_set(&handle.key, Some(&record), Some(cooling))
                .await
            {
                Ok(true) => {
                    tracing::debug!(key = %handle.key, holder = %handle.holder, %until, "lock released");
                    return true;
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(key = %handle.key, error = %err, "release failed; lease will expire");
                    return false;
                }
            }
        }
        false
    }

    /// Is `handle` still an unexpired lease at its holder?
    pub async fn is_valid(&self, handle: &LockHandle) -> bool {
        let now = self.clock.now();
        matches!(
            self.store.get(&handle.key).await,
            Ok(Some(r)) if r.holder == handle.holder && r.is_live_lease_at(now)
        )
    }

    /// Has nobody acquired any of the fence's keys since?
    ///
    /// Holds while each key's latest record names our holder and is not an
    /// expired lease. Store errors count as "does not hold".
    pub async fn fence_holds(&self, fence: &CommitFence) -> bool {
        let now = self.clock.now();
        for (key, holder) in fence.entries() {
            let holds = match self.store.get(key).await {
                Ok(Some(r)) => &r.holder == holder && !(r.is_held() && r.expires_at <= now),
                Ok(None) => false,
                Err(err) => {
                    tracing::warn!(%key, error = %err, "fence check failed");
                    false
                }
            };
            if !holds {
                return false;
            }
        }
        true
    }

    /// Current record for `key`, for status views.
    pub async fn inspect(&self, key: &LockKey) -> Result<Option<LockRecord>, LockStoreError> {
        self.store.get(key).await
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

fn add(at: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(d)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ClientError;
    use crate::impls::{FaultPlan, InMemoryLockStore};
    use crate::ports::{FixedClock, UlidGenerator};
    use chrono::TimeZone;

    struct Fixture {
        clock: Arc<FixedClock>,
        store: Arc<InMemoryLockStore>,
        locks: LockManager,
    }

    fn fixture(cooldown_secs: u64) -> Fixture {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        let clock = Arc::new(FixedClock::new(t0));
        let store = Arc::new(InMemoryLockStore::new());
        let locks = LockManager::new(
            store.clone(),
            clock.clone(),
            Arc::new(UlidGenerator::new(clock.clone())),
            Duration::from_secs(cooldown_secs),
        );
        Fixture {
            clock,
            store,
            locks,
        }
    }

    fn task() -> TaskId {
        TaskId::new("task-1")
    }

    const LEASE: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn second_acquire_is_busy_until_lease_expires() {
        let f = fixture(3);

        let a = f.locks.acquire(&task(), LEASE).await.unwrap();

        f.clock.advance(TimeDelta::seconds(5));
        let b = f.locks.acquire(&task(), LEASE).await;
        assert!(matches!(b, Err(Busy::Held { holder, .. }) if holder == a.holder));

        f.clock.advance(TimeDelta::seconds(26)); // t = 31s
        let c = f.locks.acquire(&task(), LEASE).await.unwrap();
        assert_ne!(c.holder, a.holder);
    }

    #[tokio::test]
    async fn concurrent_acquires_grant_exactly_one() {
        let f = fixture(3);

        let attempts = (0..16).map(|_| {
            let locks = f.locks.clone();
            tokio::spawn(async move { locks.acquire(&task(), LEASE).await })
        });
        let results = futures::future::join_all(attempts).await;

        let granted = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();
        assert_eq!(granted, 1);
    }

    #[tokio::test]
    async fn release_starts_cooldown() {
        let f = fixture(3);

        let a = f.locks.acquire(&task(), LEASE).await.unwrap();
        f.locks.release(&a).await;
        assert!(!f.locks.is_valid(&a).await);

        f.clock.advance(TimeDelta::seconds(2));
        assert!(matches!(
            f.locks.acquire(&task(), LEASE).await,
            Err(Busy::CoolingDown { .. })
        ));

        f.clock.advance(TimeDelta::seconds(1));
        assert!(f.locks.acquire(&task(), LEASE).await.is_ok());
    }

    #[tokio::test]
    async fn zero_cooldown_allows_immediate_reacquire() {
        let f = fixture(0);

        let a = f.locks.acquire(&task(), LEASE).await.unwrap();
        f.locks.release(&a).await;
        assert!(f.locks.acquire(&task(), LEASE).await.is_ok());
    }

    #[tokio::test]
    async fn release_is_idempotent_and_never_frees_another_holder() {
        let f = fixture(0);

        let a = f.locks.acquire(&task(), LEASE).await.unwrap();
        f.locks.release(&a).await;
        f.locks.release(&a).await;

        let b = f.locks.acquire(&task(), LEASE).await.unwrap();
        f.locks.release(&a).await;
        assert!(f.locks.is_valid(&b).await);
    }

    #[tokio::test]
    async fn renew_extends_a_live_lease() {
        let f = fixture(3);

        let a = f.locks.acquire(&task(), LEASE).await.unwrap();
        f.clock.advance(TimeDelta::seconds(20));
        let renewed = f.locks.renew(&a).await.unwrap();
        assert_eq!(renewed.expires_at, f.clock.now() + TimeDelta::seconds(30));

        f.clock.advance(TimeDelta::seconds(20)); // past the original expiry
        assert!(f.locks.is_valid(&renewed).await);
    }

    #[tokio::test]
    async fn renew_after_expiry_fails() {
        let f = fixture(3);

        let a = f.locks.acquire(&task(), LEASE).await.unwrap();
        f.clock.advance(TimeDelta::seconds(31));
        assert_eq!(f.locks.renew(&a).await, Err(RenewError::Expired));
    }

    #[tokio::test]
    async fn unavailable_store_fails_closed() {
        let f = fixture(3);
        f.store.faults().script("get", FaultPlan::always(ClientError::Unavailable));

        assert!(matches!(
            f.locks.acquire(&task(), LEASE).await,
            Err(Busy::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn fence_survives_release_but_not_takeover() {
        let f = fixture(0);

        let a = f.locks.acquire(&task(), LEASE).await.unwrap();
        let fence = CommitFence::for_handle(&a);
        assert!(f.locks.fence_holds(&fence).await);

        f.locks.release(&a).await;
        assert!(f.locks.fence_holds(&fence).await);

        let _b = f.locks.acquire(&task(), LEASE).await.unwrap();
        assert!(!f.locks.fence_holds(&fence).await);
    }

    #[tokio::test]
    async fn fence_breaks_when_lease_expires_unreleased() {
        let f = fixture(3);

        let a = f.locks.acquire(&task(), LEASE).await.unwrap();
        let fence = CommitFence::for_handle(&a);

        f.clock.advance(TimeDelta::seconds(31));
        assert!(!f.locks.fence_holds(&fence).await);
    }

    #[tokio::test]
    async fn busy_resource_drops_the_task_lock() {
        let f = fixture(3);

        let other = TaskId::new("task-2");
        let held = f
            .locks
            .acquire_with_resource(&other, "work", LEASE)
            .await
            .unwrap();
        assert_eq!(held.len(), 2);

        let res = f.locks.acquire_with_resource(&task(), "work", LEASE).await;
        assert!(matches!(res, Err(Busy::Held { key: LockKey::Resource(_), .. })));

        // task-1 was abandoned without cooldown
        for h in &held {
            f.locks.release(h).await;
        }
        assert!(f.locks.acquire(&task(), LEASE).await.is_ok());
    }

    #[tokio::test]
    async fn reservation_lapses_after_its_ttl() {
        let f = fixture(0);
        let slot = TimeRange::new(f.clock.now(), f.clock.now() + TimeDelta::hours(1));

        let held = f.locks.acquire_with_resource(&task(), "work", LEASE).await.unwrap();
        f.locks.release(&held[0]).await;
        assert!(
            f.locks
                .release_reserving(&held[1], slot, Duration::from_secs(60))
                .await
                .is_some()
        );

        f.clock.advance(TimeDelta::seconds(59));
        let next = f
            .locks
            .acquire_with_resource(&TaskId::new("task-2"), "work", LEASE)
            .await
            .unwrap();
        assert_eq!(next[1].reserved, vec![slot]);
        for h in next.iter().rev() {
            f.locks.release(h).await;
        }

        f.clock.advance(TimeDelta::seconds(1));
        let later = f
            .locks
            .acquire_with_resource(&TaskId::new("task-3"), "work", LEASE)
            .await
            .unwrap();
        assert!(later[1].reserved.is_empty());
    }

    #[tokio::test]
    async fn reserving_a_lost_lease_reserves_nothing() {
        let f = fixture(0);
        let slot = TimeRange::new(f.clock.now(), f.clock.now() + TimeDelta::hours(1));

        let held = f.locks.acquire_with_resource(&task(), "work", LEASE).await.unwrap();
        f.clock.advance(TimeDelta::seconds(31));
        let _other = f
            .locks
            .acquire_with_resource(&TaskId::new("task-2"), "work", LEASE)
            .await
            .unwrap();

        assert_eq!(
            f.locks
                .release_reserving(&held[1], slot, Duration::from_secs(60))
                .await,
            None
        );
    }

    #[tokio::test]
    async fn reap_removes_settled_tombstones() {
        let f = fixture(3);
        let grace = Duration::from_secs(60);

        let a = f.locks.acquire(&task(), LEASE).await.unwrap();
        f.locks.release(&a).await;
        assert_eq!(f.locks.reap(grace).await.unwrap(), 0);

        f.clock.advance(TimeDelta::seconds(63));
        assert_eq!(f.locks.reap(grace).await.unwrap(), 1);
        assert!(f.store.snapshot().await.is_empty());
    }
}
