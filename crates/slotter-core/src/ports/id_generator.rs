//! IdGenerator port - ID 生成の抽象化
//!
//! エンジンが自分で採番するのは lock holder の token と attempt id だけ。
//! task id / calendar id は上流が採番する。

use crate::domain::ids::{AttemptId, HolderToken};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は ULID ベースの ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数の attempt から同時に使われる）
pub trait IdGenerator: Send + Sync {
    /// Lock holder token を生成（acquire ごとに新しいものを使う）
    fn generate_holder_token(&self) -> HolderToken;

    /// Attempt ID を生成
    fn generate_attempt_id(&self) -> AttemptId;
}

/// UlidGenerator は Clock の時刻をタイムスタンプ部に使う
///
/// FixedClock と組み合わせるとタイムスタンプ部が決定的になる。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_holder_token(&self) -> HolderToken {
        HolderToken::from(self.next_ulid())
    }

    fn generate_attempt_id(&self) -> AttemptId {
        AttemptId::from(self.next_ulid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_tokens() {
        let id_gen = UlidGenerator::new(SystemClock);

        let t1 = id_gen.generate_holder_token();
        let t2 = id_gen.generate_holder_token();
        let t3 = id_gen.generate_holder_token();

        assert_ne!(t1, t2);
        assert_ne!(t2, t3);
        assert_ne!(t1, t3);
    }

    #[test]
    fn fixed_clock_pins_timestamp_part() {
        let fixed_time = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let a1 = id_gen.generate_attempt_id();
        let a2 = id_gen.generate_attempt_id();

        // ランダム部分があるので ID 自体は異なる
        assert_ne!(a1, a2);
        assert_eq!(a1.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
        assert_eq!(a2.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }

    #[test]
    fn display_prefixes_differ() {
        let id_gen = UlidGenerator::new(SystemClock);

        assert!(id_gen.generate_holder_token().to_string().starts_with("holder-"));
        assert!(id_gen.generate_attempt_id().to_string().starts_with("attempt-"));
    }
}
