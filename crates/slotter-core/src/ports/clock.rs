//! Clock port - 時刻の抽象化
//!
//! エンジンは「今」を直接読まない。必ず Clock 経由で取得する。
//! テストでは FixedClock を使い、時刻を手で進める。

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeDelta, Utc};

/// Clock は現在時刻を提供
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// 本番用: システム時刻
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// テスト用: 固定時刻（`set` / `advance` で動かせる）
///
/// ミリ秒精度。内部は AtomicI64 なので `&self` から更新できる。
#[derive(Debug)]
pub struct FixedClock {
    millis: AtomicI64,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(at.timestamp_millis()),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: TimeDelta) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.load(Ordering::SeqCst);
        DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_clock_can_be_moved() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap();
        let clock = FixedClock::new(t0);
        assert_eq!(clock.now(), t0);

        clock.advance(TimeDelta::seconds(90));
        assert_eq!(clock.now(), t0 + TimeDelta::seconds(90));

        clock.set(t0);
        assert_eq!(clock.now(), t0);
    }

    #[test]
    fn shared_clock_sees_updates() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap();
        let clock = Arc::new(FixedClock::new(t0));
        let shared: Arc<dyn Clock> = clock.clone();

        clock.advance(TimeDelta::minutes(5));
        assert_eq!(shared.now(), t0 + TimeDelta::minutes(5));
    }
}
