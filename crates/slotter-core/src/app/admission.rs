//! Admission - lock を取る前の構造的な却下判定
//!
//! ここで弾かれたタスクは availability を再計算しても救われない。

use crate::config::ScopeConfig;
use crate::domain::{RejectReason, Task, TaskLabel};

/// Policy checks for `task` against its scope. `None` scope means the event
/// named a scope the configuration does not know.
pub fn admit(task: &Task, scope_name: &str, scope: Option<&ScopeConfig>) -> Result<(), RejectReason> {
    let Some(scope) = scope else {
        return Err(RejectReason::UnknownScope {
            scope: scope_name.to_string(),
        });
    };
    if task.has_label(TaskLabel::ManualScheduled) {
        return Err(RejectReason::ManualScheduling);
    }
    if !scope.auto_schedule.enabled {
        return Err(RejectReason::AutoScheduleDisabled {
            scope: scope_name.to_string(),
        });
    }
    if task.priority < scope.auto_schedule.min_priority {
        return Err(RejectReason::PriorityBelowThreshold {
            priority: task.priority,
            min: scope.auto_schedule.min_priority,
        });
    }
    Ok(())
}
