//! TaskStore port - タスクの状態の正本（source of truth）
//!
//! エンジンは status を読むだけ。書き込みは executor が
//! `update_status` の条件付き更新で行う。

use async_trait::async_trait;

use crate::domain::{ClientError, StatusKind, TaskId, TaskStatus};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Current status, `None` if the store has never seen the task.
    async fn status(&self, task_id: &TaskId) -> Result<Option<TaskStatus>, ClientError>;

    /// Set the status iff the current status kind is `expected`.
    /// An unknown task counts as `Pending`.
    ///
    /// Fails with `ClientError::Conflict` when the precondition does not hold.
    async fn update_status(
        &self,
        task_id: &TaskId,
        expected: StatusKind,
        new: TaskStatus,
    ) -> Result<(), ClientError>;
}
