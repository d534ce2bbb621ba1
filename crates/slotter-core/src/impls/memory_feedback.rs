//! MemoryFeedbackSink - feedback をメモリに溜めるだけの実装

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::faults::FaultInjector;
use crate::domain::{ClientError, FeedbackRecord};
use crate::observability::OutcomeCounts;
use crate::ports::FeedbackSink;

#[derive(Default)]
pub struct MemoryFeedbackSink {
    records: Mutex<Vec<FeedbackRecord>>,
    faults: FaultInjector,
}

impl MemoryFeedbackSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripted failures for `"record"`.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub async fn records(&self) -> Vec<FeedbackRecord> {
        self.records.lock().await.clone()
    }

    pub async fn counts(&self) -> OutcomeCounts {
        OutcomeCounts::from_records(self.records.lock().await.iter())
    }
}

#[async_trait]
impl FeedbackSink for MemoryFeedbackSink {
    async fn record(&self, record: FeedbackRecord) -> Result<(), ClientError> {
        self.faults.check("record").await?;
        self.records.lock().await.push(record);
        Ok(())
    }
}
