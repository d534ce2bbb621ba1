//! Errors - エラー型と分類
//!
//! - `ClientError`: 外部協調者（カレンダー / タスクストア / classifier）の失敗
//! - `LockStoreError`: lock 用の共有ストアの失敗
//! - `SchedulerError` / `ErrorKind`: 失敗の分類。Defer / Reject の理由と
//!   executor の失敗はすべてどれかの `ErrorKind` に対応する

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("service unavailable")]
    Unavailable,

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("timed out")]
    Timeout,

    /// Conditional write lost (e.g. status changed underneath us).
    #[error("conflict")]
    Conflict,

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl ClientError {
    /// Worth retrying with backoff?
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Unavailable | ClientError::RateLimited { .. } | ClientError::Timeout
        )
    }

    /// Server-suggested wait, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ClientError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockStoreError {
    #[error("lock store unavailable: {0}")]
    Unavailable(String),
}

/// ErrorKind は実行エラーの運用分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Another holder owns the lock, or the store could not confirm ours.
    LockBusy,
    /// Input is structurally invalid.
    Validation,
    /// Collaborator failed in a way that may clear up.
    TransientIo,
    /// Collaborator failed for good.
    PersistentIo,
    /// Availability and scoring found nothing acceptable.
    NoViableSlot,
}

impl ErrorKind {
    /// Worth retrying with backoff? Lock contention and missing slots are
    /// settled by deferring, not by retrying the same call.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::TransientIo)
    }
}

/// SchedulerError はエンジン内部のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("SchedulerError (kind: {kind:?}): {message}")]
pub struct SchedulerError {
    kind: ErrorKind,
    message: String,
}

impl SchedulerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ClientError> for SchedulerError {
    fn from(err: ClientError) -> Self {
        let kind = if err.is_transient() {
            ErrorKind::TransientIo
        } else {
            ErrorKind::PersistentIo
        };
        SchedulerError::new(kind, err.to_string())
    }
}

impl From<LockStoreError> for SchedulerError {
    fn from(err: LockStoreError) -> Self {
        SchedulerError::new(ErrorKind::LockBusy, err.to_string())
    }
}
