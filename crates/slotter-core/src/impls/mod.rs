//! Impls - 実装（開発用・テスト用）
//!
//! ports の in-memory 実装。すべて 1 プロセス内で完結し、
//! `FaultInjector` で失敗を注入できる。
//!
//! # 含まれる実装
//! - **InMemoryLockStore**: LockStore
//! - **InMemoryTaskStore**: TaskStore
//! - **InMemoryCalendar**: CalendarClient
//! - **MemoryFeedbackSink**: FeedbackSink
//! - **StaticClassifier**: Classifier

pub mod faults;
pub mod inmem_calendar;
pub mod inmem_lock_store;
pub mod inmem_task_store;
pub mod memory_feedback;
pub mod static_classifier;

pub use self::faults::{FaultInjector, FaultPlan};
pub use self::inmem_calendar::{CreatedEvent, InMemoryCalendar};
pub use self::inmem_lock_store::InMemoryLockStore;
pub use self::inmem_task_store::InMemoryTaskStore;
pub use self::memory_feedback::MemoryFeedbackSink;
pub use self::static_classifier::StaticClassifier;
