//! Classifier port - カテゴリと所要時間の推定
//!
//! best-effort。失敗してもエンジンはデフォルト値で続行する。

use async_trait::async_trait;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::domain::ClientError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Option<String>,
    #[serde(default)]
    pub duration_hint_minutes: Option<i64>,
}

impl Classification {
    pub fn duration_hint(&self) -> Option<TimeDelta> {
        self.duration_hint_minutes.map(TimeDelta::minutes)
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Classification, ClientError>;
}
