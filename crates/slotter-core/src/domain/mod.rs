//! Domain model (IDs, intervals, tasks, decisions, outcomes, ...).
//!
//! I/O を持たない純粋な型だけを置く。外部とのやり取りは `ports` 経由。

pub mod calendar;
pub mod decision;
pub mod errors;
pub mod event;
pub mod hours;
pub mod ids;
pub mod interval;
pub mod outcome;
pub mod state;
pub mod task;

pub use calendar::{AvailabilityWindow, CalendarRef, CalendarSource};
pub use decision::{Decision, DeferReason, Placement, RationaleTag, RejectReason};
pub use errors::{ClientError, ErrorKind, LockStoreError, SchedulerError};
pub use event::InboundEvent;
pub use hours::{HourRange, HourRangeError, WeeklyHours};
pub use ids::{AttemptId, CalendarId, EventId, HolderToken, TaskId};
pub use interval::{LocalRange, TimeRange};
pub use outcome::{ApplyOutcome, FeedbackOutcome, FeedbackRecord};
pub use state::{AttemptState, StateTrace};
pub use task::{Priority, ScheduledBy, StatusKind, Task, TaskLabel, TaskStatus};
