//! slotter-core
//!
//! Scheduling decision engine: places incoming tasks onto free calendar time
//! without letting concurrent triggers double-book a task or a slot.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, interval, calendar, decision, outcome, state, errors）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, LockStore, CalendarClient, TaskStore, Classifier, FeedbackSink）
//! - **availability**: busy interval の統合と free window 計算
//! - **placement**: 候補スロットの採点と選択
//! - **lock**: lease 付きの排他（task / calendar scope）
//! - **executor**: 決定の適用（retry / 補償）
//! - **app**: エンジン本体、admission、dispatcher、builder
//! - **impls**: in-memory 実装（テスト・CLI 用）
//! - **config**: TOML 設定
//! - **observability**: outcome 集計と lock 状態

pub mod app;
pub mod availability;
pub mod config;
pub mod domain;
pub mod executor;
pub mod impls;
pub mod lock;
pub mod observability;
pub mod placement;
pub mod ports;

pub use app::{AttemptReport, EngineBuilder, EventDispatcher, SchedulingEngine, Verdict};
pub use config::{ConfigError, SchedulerConfig};
pub use domain::{Decision, InboundEvent};
