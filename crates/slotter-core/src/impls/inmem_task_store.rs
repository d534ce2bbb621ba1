//! InMemoryTaskStore - テスト用のタスク状態の正本

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::faults::FaultInjector;
use crate::domain::{ClientError, StatusKind, TaskId, TaskStatus};
use crate::ports::TaskStore;

#[derive(Default)]
pub struct InMemoryTaskStore {
    statuses: Mutex<HashMap<TaskId, TaskStatus>>,
    faults: FaultInjector,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripted failures for `"status"` and `"update_status"`.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub async fn insert(&self, task_id: impl Into<TaskId>, status: TaskStatus) {
        self.statuses.lock().await.insert(task_id.into(), status);
    }

    pub async fn get(&self, task_id: &TaskId) -> Option<TaskStatus> {
        self.statuses.lock().await.get(task_id).cloned()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn status(&self, task_id: &TaskId) -> Result<Option<TaskStatus>, ClientError> {
        self.faults.check("status").await?;
        Ok(self.get(task_id).await)
    }

    async fn update_status(
        &self,
        task_id: &TaskId,
        expected: StatusKind,
        new: TaskStatus,
    ) -> Result<(), ClientError> {
        self.faults.check("update_status").await?;

        let mut statuses = self.statuses.lock().await;
        let current = statuses
            .get(task_id)
            .map(TaskStatus::kind)
            .unwrap_or(StatusKind::Pending);
        if current != expected {
            return Err(ClientError::Conflict);
        }
        statuses.insert(task_id.clone(), new);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_is_conditional_on_status_kind() {
        let store = InMemoryTaskStore::new();
        let id = TaskId::new("t1");

        // unknown task counts as pending
        store
            .update_status(&id, StatusKind::Pending, TaskStatus::Failed { reason: "x".into() })
            .await
            .unwrap();

        let err = store
            .update_status(&id, StatusKind::Pending, TaskStatus::Pending)
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::Conflict);
        assert_eq!(store.faults().calls("update_status"), 2);
    }
}
