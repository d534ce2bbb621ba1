//! InMemoryLockStore - 開発用・テスト用の lock ストア
//!
//! 1 プロセス内の Mutex で compare-and-set の原子性を実現する。
//! 複数プロセスで共有するには外部ストア（Redis など）の実装が必要。
//! 落ち着いたレコードは `reap` で消える（dispatcher が定期的に呼ぶ）。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;

use super::faults::FaultInjector;
use crate::domain::LockStoreError;
use crate::ports::{LockKey, LockRecord, LockStore};

#[derive(Default)]
pub struct InMemoryLockStore {
    records: Mutex<HashMap<LockKey, LockRecord>>,
    faults: FaultInjector,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripted failures for `"get"`, `"compare_and_set"` and `"reap"`.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub async fn snapshot(&self) -> Vec<LockRecord> {
        let records = self.records.lock().await;
        let mut out: Vec<LockRecord> = records.values().cloned().collect();
        out.sort_by_key(|r| r.key.to_string());
        out
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn get(&self, key: &LockKey) -> Result<Option<LockRecord>, LockStoreError> {
        self.faults
            .check("get")
            .await
            .map_err(|e| LockStoreError::Unavailable(e.to_string()))?;
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn compare_and_set(
        &self,
        key: &LockKey,
        expected: Option<&LockRecord>,
        new: Option<LockRecord>,
    ) -> Result<bool, LockStoreError> {
        self.faults
            .check("compare_and_set")
            .await
            .map_err(|e| LockStoreError::Unavailable(e.to_string()))?;

        let mut records = self.records.lock().await;
        if records.get(key) != expected {
            return Ok(false);
        }
        match new {
            Some(record) => {
                records.insert(key.clone(), record);
            }
            None => {
                records.remove(key);
            }
        }
        Ok(true)
    }

    async fn reap(&self, now: DateTime<Utc>, grace: TimeDelta) -> Result<usize, LockStoreError> {
        self.faults
            .check("reap")
            .await
            .map_err(|e| LockStoreError::Unavailable(e.to_string()))?;

        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, record| !record.is_reapable_at(now, grace));
        Ok(before - records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HolderToken, TaskId};
    use crate::ports::LockPhase;
    use chrono::TimeZone;
    use ulid::Ulid;

    fn record(holder: HolderToken) -> LockRecord {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        LockRecord::held(
            LockKey::Task(TaskId::new("t1")),
            holder,
            t0,
            t0 + TimeDelta::seconds(30),
        )
    }

    #[tokio::test]
    async fn cas_only_swaps_on_expected_value() {
        let store = InMemoryLockStore::new();
        let key = LockKey::Task(TaskId::new("t1"));
        let a = record(HolderToken::from_ulid(Ulid::new()));
        let b = record(HolderToken::from_ulid(Ulid::new()));

        assert!(store.compare_and_set(&key, None, Some(a.clone())).await.unwrap());
        // stale expectation
        assert!(!store.compare_and_set(&key, None, Some(b.clone())).await.unwrap());
        assert!(!store.compare_and_set(&key, Some(&b), None).await.unwrap());

        assert!(store.compare_and_set(&key, Some(&a), Some(b.clone())).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), Some(b.clone()));

        assert!(store.compare_and_set(&key, Some(&b), None).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn reap_drops_only_settled_records() {
        let store = InMemoryLockStore::new();
        let t0 = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        let grace = TimeDelta::seconds(60);

        let mut settled = record(HolderToken::from_ulid(Ulid::new()));
        settled.phase = LockPhase::Cooling {
            until: t0 + TimeDelta::seconds(3),
        };
        let live = LockRecord::held(
            LockKey::Task(TaskId::new("t2")),
            HolderToken::from_ulid(Ulid::new()),
            t0 + TimeDelta::seconds(50),
            t0 + TimeDelta::seconds(80),
        );
        store
            .compare_and_set(&settled.key.clone(), None, Some(settled))
            .await
            .unwrap();
        store
            .compare_and_set(&live.key.clone(), None, Some(live.clone()))
            .await
            .unwrap();

        let reaped = store.reap(t0 + TimeDelta::seconds(70), grace).await.unwrap();
        assert_eq!(reaped, 1);
        assert_eq!(store.snapshot().await, vec![live]);
    }
}
