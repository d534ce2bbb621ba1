//! FeedbackSink port - 結果の記録先（append-only）

use async_trait::async_trait;

use crate::domain::{ClientError, FeedbackRecord};

#[async_trait]
pub trait FeedbackSink: Send + Sync {
    async fn record(&self, record: FeedbackRecord) -> Result<(), ClientError>;
}
