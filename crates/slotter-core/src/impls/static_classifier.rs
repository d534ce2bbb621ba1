//! StaticClassifier - キーワード一致だけの classifier
//!
//! 本物の言語モデルの代わりに、テストと CLI で使う。

use async_trait::async_trait;

use super::faults::FaultInjector;
use crate::domain::ClientError;
use crate::ports::{Classification, Classifier};

#[derive(Default)]
pub struct StaticClassifier {
    rules: Vec<(String, Classification)>,
    faults: FaultInjector,
}

impl StaticClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Texts containing `keyword` (case-insensitive) get `classification`.
    /// The first matching rule wins.
    pub fn with_rule(mut self, keyword: impl Into<String>, classification: Classification) -> Self {
        self.rules.push((keyword.into().to_lowercase(), classification));
        self
    }

    /// Scripted failures for `"classify"`.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }
}

#[async_trait]
impl Classifier for StaticClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, ClientError> {
        self.faults.check("classify").await?;
        let text = text.to_lowercase();
        Ok(self
            .rules
            .iter()
            .find(|(keyword, _)| text.contains(keyword.as_str()))
            .map(|(_, c)| c.clone())
            .unwrap_or_default())
    }
}
