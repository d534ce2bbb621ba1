//! EngineBuilder - エンジンの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - 必須の collaborator（calendar / task store / feedback）が揃っているか
//!   `build()` 時にチェック
//! - 設定は `build()` 時に検証
//! - clock / id generator / lock store は省略可（SystemClock / ULID /
//!   in-memory lock store）

use std::sync::Arc;

use super::engine::{EnginePorts, SchedulingEngine};
use crate::config::{ConfigError, SchedulerConfig};
use crate::impls::InMemoryLockStore;
use crate::ports::{
    CalendarClient, Classifier, Clock, FeedbackSink, IdGenerator, LockStore, SystemClock,
    TaskStore, UlidGenerator,
};

/// Wires collaborators into a [`SchedulingEngine`].
///
/// # 使用例
/// ```ignore
/// let engine = EngineBuilder::new(config)
///     .calendar(calendar)
///     .task_store(tasks)
///     .feedback(sink)
///     .build()?;
/// ```
pub struct EngineBuilder {
    config: SchedulerConfig,
    lock_store: Option<Arc<dyn LockStore>>,
    calendar: Option<Arc<dyn CalendarClient>>,
    tasks: Option<Arc<dyn TaskStore>>,
    feedback: Option<Arc<dyn FeedbackSink>>,
    classifier: Option<Arc<dyn Classifier>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing collaborators: {0:?}. These ports must be provided before build().")]
    MissingPorts(Vec<&'static str>),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineBuilder {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            lock_store: None,
            calendar: None,
            tasks: None,
            feedback: None,
            classifier: None,
            clock: None,
            ids: None,
        }
    }

    pub fn lock_store(mut self, store: Arc<dyn LockStore>) -> Self {
        self.lock_store = Some(store);
        self
    }

    pub fn calendar(mut self, client: Arc<dyn CalendarClient>) -> Self {
        self.calendar = Some(client);
        self
    }

    pub fn task_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.tasks = Some(store);
        self
    }

    pub fn feedback(mut self, sink: Arc<dyn FeedbackSink>) -> Self {
        self.feedback = Some(sink);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Validate the configuration and check every required port is set.
    pub fn build(self) -> Result<SchedulingEngine, BuildError> {
        let mut missing = Vec::new();
        if self.calendar.is_none() {
            missing.push("calendar");
        }
        if self.tasks.is_none() {
            missing.push("task_store");
        }
        if self.feedback.is_none() {
            missing.push("feedback");
        }
        let (Some(calendar), Some(tasks), Some(feedback)) = (self.calendar, self.tasks, self.feedback)
        else {
            return Err(BuildError::MissingPorts(missing));
        };

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        let lock_store = self
            .lock_store
            .unwrap_or_else(|| Arc::new(InMemoryLockStore::new()));

        let ports = EnginePorts {
            lock_store,
            calendar,
            tasks,
            feedback,
            classifier: self.classifier,
            clock,
            ids,
        };
        Ok(SchedulingEngine::new(self.config, ports)?)
    }
}
