//! App - アプリケーション層
//!
//! ports と各エンジン部品を組み合わせて、1 イベント分の決定試行を実装します。
//!
//! # 主要コンポーネント
//! - **EngineBuilder**: collaborator のワイヤリングと起動時検証
//! - **SchedulingEngine**: lock → 評価 → 決定 → unlock → 適用 の状態機械
//! - **EventDispatcher**: イベントを独立した attempt として並行実行
//! - **admission**: lock 前の構造的な却下

pub mod admission;
pub mod builder;
pub mod dispatcher;
pub mod engine;

pub use self::builder::{BuildError, EngineBuilder};
pub use self::dispatcher::{DispatchError, EventDispatcher};
pub use self::engine::{AttemptReport, EnginePorts, SchedulingEngine, Verdict};
