//! State - 1 回の決定試行（attempt）の状態
//!
//! # 状態遷移
//! - Pending → Locked → Evaluating → {Placed | Deferred} → Unlocked
//! - Pending → Deferred → Unlocked（lock が取れなかった場合、評価しない）
//! - Pending → Rejected → Unlocked（validation / admission で弾かれた場合、lock を取らない）
//! - Pending → Placed → Unlocked（既に配置済み。no-op）
//!
//! Unlocked だけが終端状態。
//!
//! validation は lock 前に終わるので、Rejected は常に Pending から入る。
//! Evaluating から Rejected には遷移しない。

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Pending,
    Locked,
    Evaluating,
    Placed,
    Deferred,
    Rejected,
    Unlocked,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        matches!(self, AttemptState::Unlocked)
    }

    /// Has the attempt reached a verdict?
    pub fn is_verdict(self) -> bool {
        matches!(
            self,
            AttemptState::Placed | AttemptState::Deferred | AttemptState::Rejected
        )
    }

    /// Legal next states.
    pub fn can_transition_to(self, next: AttemptState) -> bool {
        use AttemptState::*;
        matches!(
            (self, next),
            (Pending, Locked)
                | (Pending, Deferred)
                | (Pending, Rejected)
                | (Pending, Placed)
                | (Locked, Evaluating)
                | (Locked, Deferred)
                | (Evaluating, Placed)
                | (Evaluating, Deferred)
                | (Placed, Unlocked)
                | (Deferred, Unlocked)
                | (Rejected, Unlocked)
        )
    }
}

/// Ordered record of the states an attempt went through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTrace(Vec<AttemptState>);

impl StateTrace {
    pub fn new() -> Self {
        Self(vec![AttemptState::Pending])
    }

    /// Append `next`. Illegal transitions are logged and still recorded so the
    /// trace shows what actually happened.
    pub fn push(&mut self, next: AttemptState) {
        if let Some(&current) = self.0.last()
            && !current.can_transition_to(next)
        {
            tracing::warn!(?current, ?next, "unexpected attempt state transition");
        }
        self.0.push(next);
    }

    pub fn current(&self) -> Option<AttemptState> {
        self.0.last().copied()
    }

    pub fn states(&self) -> &[AttemptState] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unlocked_is_terminal() {
        assert!(AttemptState::Unlocked.is_terminal());
        assert!(!AttemptState::Placed.is_terminal());
        assert!(AttemptState::Placed.is_verdict());
    }

    #[test]
    fn busy_lock_skips_evaluation() {
        assert!(AttemptState::Pending.can_transition_to(AttemptState::Deferred));
        assert!(!AttemptState::Locked.can_transition_to(AttemptState::Placed));
        assert!(!AttemptState::Pending.can_transition_to(AttemptState::Evaluating));
    }

    #[test]
    fn rejection_happens_before_locking() {
        assert!(AttemptState::Pending.can_transition_to(AttemptState::Rejected));
        assert!(!AttemptState::Evaluating.can_transition_to(AttemptState::Rejected));
    }

    #[test]
    fn trace_records_in_order() {
        let mut trace = StateTrace::new();
        trace.push(AttemptState::Locked);
        trace.push(AttemptState::Evaluating);
        trace.push(AttemptState::Placed);
        trace.push(AttemptState::Unlocked);

        assert_eq!(trace.current(), Some(AttemptState::Unlocked));
        assert_eq!(trace.states().len(), 5);
    }
}
