//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。外部システム（lock ストア、
//! カレンダー、タスクストア、classifier、feedback 先）はすべて
//! ここの trait 越しに扱い、実装の詳細を隠蔽する。
//!
//! 実装は `impls`（in-memory / テスト用）にある。

pub mod calendar_client;
pub mod classifier;
pub mod clock;
pub mod feedback_sink;
pub mod id_generator;
pub mod lock_store;
pub mod task_store;

pub use self::calendar_client::{CalendarClient, NewCalendarEvent};
pub use self::classifier::{Classification, Classifier};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::feedback_sink::FeedbackSink;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::lock_store::{LockKey, LockPhase, LockRecord, LockStore, SlotReservation};
pub use self::task_store::TaskStore;
