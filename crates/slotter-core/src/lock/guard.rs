//! LeaseGuard - 取得した lease の後始末
//!
//! 正常系では `release().await` を呼ぶ。呼ばれずに drop された場合
//! （panic など）は、tokio runtime 上で release を spawn する（best-effort）。
//! それも出来なければ lease の期限切れに任せる。

use std::time::Duration;

use super::{CommitFence, LockHandle, LockManager, RenewError, ReservationTicket};
use crate::domain::TimeRange;
use crate::ports::LockKey;

pub struct LeaseGuard {
    manager: LockManager,
    handles: Vec<LockHandle>,
}

impl LeaseGuard {
    /// `handles` must be in acquisition order; they are released in reverse.
    pub fn new(manager: LockManager, handles: Vec<LockHandle>) -> Self {
        Self { manager, handles }
    }

    pub fn handles(&self) -> &[LockHandle] {
        &self.handles
    }

    /// Fence over the task lock (the first handle).
    pub fn fence(&self) -> CommitFence {
        CommitFence::new(
            self.handles
                .iter()
                .take(1)
                .map(|h| (h.key.clone(), h.holder))
                .collect(),
        )
    }

    /// Shortest remaining lease among the held handles.
    pub fn min_remaining(&self) -> Duration {
        let now = self.manager.now();
        self.handles
            .iter()
            .map(|h| h.remaining_at(now).to_std().unwrap_or(Duration::ZERO))
            .min()
            .unwrap_or(Duration::ZERO)
    }

    /// Renew every handle. On failure the guard keeps the old handles so
    /// they are still released.
    pub async fn renew(&mut self) -> Result<(), RenewError> {
        let mut renewed = Vec::with_capacity(self.handles.len());
        for handle in &self.handles {
            renewed.push(self.manager.renew(handle).await?);
        }
        self.handles = renewed;
        Ok(())
    }

    /// Slots reserved on the held resource keys by earlier attempts.
    pub fn reserved_slots(&self) -> Vec<TimeRange> {
        self.handles
            .iter()
            .flat_map(|h| h.reserved.iter().copied())
            .collect()
    }

    pub async fn release(mut self) {
        let handles = std::mem::take(&mut self.handles);
        for handle in handles.iter().rev() {
            self.manager.release(handle).await;
        }
    }

    /// Release everything, leaving `slot` reserved on the resource key (if
    /// one is held) for `ttl`.
    pub async fn release_reserving(
        mut self,
        slot: Option<TimeRange>,
        ttl: Duration,
    ) -> Option<ReservationTicket> {
        let handles = std::mem::take(&mut self.handles);
        let mut ticket = None;
        for handle in handles.iter().rev() {
            match (slot, &handle.key) {
                (Some(slot), LockKey::Resource(_)) => {
                    ticket = self.manager.release_reserving(handle, slot, ttl).await;
                }
                _ => self.manager.release(handle).await,
            }
        }
        ticket
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        let handles = std::mem::take(&mut self.handles);
        let manager = self.manager.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                tracing::warn!(count = handles.len(), "lease guard dropped without release; releasing in background");
                rt.spawn(async move {
                    for handle in handles.iter().rev() {
                        manager.release(handle).await;
                    }
                });
            }
            Err(_) => {
                tracing::warn!(count = handles.len(), "lease guard dropped outside a runtime; leases will expire");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskId;
    use crate::impls::InMemoryLockStore;
    use crate::ports::{FixedClock, UlidGenerator};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn manager() -> LockManager {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap(),
        ));
        LockManager::new(
            Arc::new(InMemoryLockStore::new()),
            clock.clone(),
            Arc::new(UlidGenerator::new(clock)),
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn explicit_release_frees_the_lock() {
        let locks = manager();
        let task = TaskId::new("t1");
        let handle = locks.acquire(&task, Duration::from_secs(30)).await.unwrap();

        let guard = LeaseGuard::new(locks.clone(), vec![handle.clone()]);
        assert_eq!(guard.min_remaining(), Duration::from_secs(30));
        guard.release().await;

        assert!(!locks.is_valid(&handle).await);
    }

    #[tokio::test]
    async fn dropped_guard_releases_in_background() {
        let locks = manager();
        let task = TaskId::new("t1");
        let handle = locks.acquire(&task, Duration::from_secs(30)).await.unwrap();

        drop(LeaseGuard::new(locks.clone(), vec![handle.clone()]));
        // let the spawned release run
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(!locks.is_valid(&handle).await);
    }

    #[tokio::test]
    async fn reserved_slot_outlives_release_until_cleared() {
        let locks = manager();
        let lease = Duration::from_secs(30);
        let slot = TimeRange::new(
            Utc.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 10, 11, 0, 0).unwrap(),
        );

        let first = locks
            .acquire_with_resource(&TaskId::new("t1"), "work", lease)
            .await
            .unwrap();
        let ticket = LeaseGuard::new(locks.clone(), first)
            .release_reserving(Some(slot), Duration::from_secs(120))
            .await
            .unwrap();

        let second = locks
            .acquire_with_resource(&TaskId::new("t2"), "work", lease)
            .await
            .unwrap();
        let guard = LeaseGuard::new(locks.clone(), second);
        assert_eq!(guard.reserved_slots(), vec![slot]);
        guard.release().await;

        locks.clear_reservation(&ticket).await;
        let third = locks
            .acquire_with_resource(&TaskId::new("t3"), "work", lease)
            .await
            .unwrap();
        let guard = LeaseGuard::new(locks.clone(), third);
        assert!(guard.reserved_slots().is_empty());
        guard.release().await;
    }

    #[tokio::test]
    async fn panicking_attempt_does_not_leak_the_lock() {
        let locks = manager();
        let task = TaskId::new("t1");
        let handle = locks.acquire(&task, Duration::from_secs(30)).await.unwrap();

        let guard = LeaseGuard::new(locks.clone(), vec![handle.clone()]);
        let joined = tokio::spawn(async move {
            let _guard = guard;
            panic!("evaluation blew up");
        })
        .await;
        assert!(joined.is_err());

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(locks.acquire(&task, Duration::from_secs(30)).await.is_ok());
    }
}
