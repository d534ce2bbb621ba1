//! SchedulingEngine - 1 イベント = 1 決定試行
//!
//! # 流れ
//! 1. classifier で補完（best-effort）→ Task を組み立てて検証
//! 2. admission（lock を取らずに却下）
//! 3. 既に scheduled なら no-op（fast path）
//! 4. `decide`: lock → 評価 → Decision → unlock
//! 5. `ActionExecutor::apply` → feedback 記録 → `AttemptReport`
//!
//! どの経路でも panic / `Err` にはしない。失敗は記録された outcome になる。

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use tracing::Instrument;

use super::admission::admit;
use crate::availability::{compute_free_windows, restrict_to_hours, subtract_ranges};
use crate::config::{ConfigError, ScopeConfig, SchedulerConfig};
use crate::domain::{
    ApplyOutcome, AttemptId, AttemptState, CalendarSource, Decision, DeferReason, FeedbackOutcome,
    FeedbackRecord, InboundEvent, LockStoreError, Placement, RejectReason, StateTrace, StatusKind,
    Task, TaskId, TaskLabel, TaskStatus, TimeRange,
};
use crate::executor::{ActionExecutor, RetryPolicy};
use crate::lock::{Busy, CommitFence, LeaseGuard, LockHandle, LockManager, ReservationTicket};
use crate::observability::LockStatus;
use crate::placement::{Scorer, ceil_to};
use crate::ports::{
    CalendarClient, Classification, Classifier, Clock, FeedbackSink, IdGenerator, LockKey,
    LockStore, TaskStore,
};

/// Collaborators wired into the engine.
#[derive(Clone)]
pub struct EnginePorts {
    pub lock_store: Arc<dyn LockStore>,
    pub calendar: Arc<dyn CalendarClient>,
    pub tasks: Arc<dyn TaskStore>,
    pub feedback: Arc<dyn FeedbackSink>,
    pub classifier: Option<Arc<dyn Classifier>>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

/// Result of [`SchedulingEngine::decide`].
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// A decision for the executor, with the fence it was made under. A
    /// placement also holds its slot on the scope's resource key until the
    /// commit is over.
    Decided {
        decision: Decision,
        fence: CommitFence,
        reservation: Option<ReservationTicket>,
    },
    /// The task store already shows the task scheduled at this slot.
    AlreadyPlaced(TimeRange),
}

/// Everything that happened to one inbound event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptReport {
    pub task_id: TaskId,
    pub attempt_id: AttemptId,
    /// `None` when the task was already scheduled and nothing was decided.
    pub decision: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub already_scheduled: Option<TimeRange>,
    pub outcome: ApplyOutcome,
    pub feedback: FeedbackOutcome,
    pub states: StateTrace,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

enum Evaluated {
    Decision(Decision),
    AlreadyPlaced(TimeRange),
}

pub struct SchedulingEngine {
    config: SchedulerConfig,
    tz: Tz,
    scorer: Scorer,
    retry: RetryPolicy,
    locks: LockManager,
    executor: ActionExecutor,
    calendar: Arc<dyn CalendarClient>,
    tasks: Arc<dyn TaskStore>,
    feedback: Arc<dyn FeedbackSink>,
    classifier: Option<Arc<dyn Classifier>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl SchedulingEngine {
    pub fn new(config: SchedulerConfig, ports: EnginePorts) -> Result<Self, ConfigError> {
        config.validate()?;
        let tz = config.engine.reference_tz()?;
        let scorer = Scorer::new(config.scoring.weights(), config.engine.slot_granularity(), tz);
        let retry = config.retry.policy();
        let locks = LockManager::new(
            ports.lock_store,
            ports.clock.clone(),
            ports.ids.clone(),
            config.lock.cooldown(),
        );
        let executor = ActionExecutor::new(
            ports.calendar.clone(),
            ports.tasks.clone(),
            ports.feedback.clone(),
            locks.clone(),
            ports.clock.clone(),
            retry.clone(),
            config.timeouts.action(),
        );
        Ok(Self {
            config,
            tz,
            scorer,
            retry,
            locks,
            executor,
            calendar: ports.calendar,
            tasks: ports.tasks,
            feedback: ports.feedback,
            classifier: ports.classifier,
            clock: ports.clock,
            ids: ports.ids,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run one inbound event to completion.
    pub async fn handle_event(&self, event: InboundEvent) -> AttemptReport {
        let attempt_id = self.ids.generate_attempt_id();
        let span = tracing::info_span!("attempt", task_id = %event.task_id, %attempt_id);
        self.run_attempt(attempt_id, event).instrument(span).await
    }

    async fn run_attempt(&self, attempt_id: AttemptId, event: InboundEvent) -> AttemptReport {
        let started_at = self.clock.now();
        let task_id = event.task_id.clone();
        tracing::info!(scope = %event.calendar_scope, "decision attempt started");

        let (verdict, states) = match self.prepare(&event).await {
            Err(reason) => {
                tracing::info!(%reason, "task rejected before locking");
                let mut trace = StateTrace::new();
                trace.push(AttemptState::Rejected);
                trace.push(AttemptState::Unlocked);
                let decision = Decision::Rejected {
                    task_id: task_id.clone(),
                    attempt_id,
                    reason,
                };
                (unfenced(decision), trace)
            }
            Ok(task) => match self.scheduled_slot(&task.id).await {
                Some(slot) => {
                    let mut trace = StateTrace::new();
                    trace.push(AttemptState::Placed);
                    trace.push(AttemptState::Unlocked);
                    (Verdict::AlreadyPlaced(slot), trace)
                }
                None => self.decide(attempt_id, &task, &event.calendar_scope).await,
            },
        };

        let (decision, already_scheduled, outcome, feedback) = match verdict {
            Verdict::AlreadyPlaced(slot) => {
                tracing::info!(%slot, "task already scheduled; nothing to do");
                (None, Some(slot), ApplyOutcome::Committed, FeedbackOutcome::AlreadyScheduled)
            }
            Verdict::Decided {
                decision,
                fence,
                reservation,
            } => {
                let outcome = self.executor.apply(&decision, &fence).await;
                // committed events are now visible as busy time; failed ones
                // left the slot free
                if let Some(ticket) = reservation {
                    self.locks.clear_reservation(&ticket).await;
                }
                let feedback = feedback_outcome(&decision, &outcome);
                (Some(decision), None, outcome, feedback)
            }
        };

        self.record_feedback(
            &task_id,
            attempt_id,
            feedback,
            decision.as_ref(),
            already_scheduled,
            &outcome,
        )
        .await;
        tracing::info!(
            ?feedback,
            kind = ?decision.as_ref().and_then(Decision::error_kind),
            "decision attempt finished"
        );

        AttemptReport {
            task_id,
            attempt_id,
            decision,
            already_scheduled,
            outcome,
            feedback,
            states,
            started_at,
            finished_at: self.clock.now(),
        }
    }

    /// Build and validate the task, then apply the admission policy.
    async fn prepare(&self, event: &InboundEvent) -> Result<Task, RejectReason> {
        let classification = self.classify(event).await;

        // explicit > classifier hint > configured default
        let duration = match event.duration_minutes {
            Some(minutes) => TimeDelta::try_minutes(minutes).unwrap_or(TimeDelta::MAX),
            None => classification
                .as_ref()
                .and_then(Classification::duration_hint)
                .filter(|hint| *hint > TimeDelta::zero())
                .unwrap_or_else(|| self.config.engine.default_duration()),
        };

        let mut task = Task::new(event.task_id.clone(), event.title.clone(), duration)
            .with_priority(event.priority)
            .with_preferred_hours(event.preferred_hours.clone());
        task.description = event.description.clone();
        task.deadline = event.deadline;
        task.category = event
            .category
            .clone()
            .or_else(|| classification.and_then(|c| c.category));
        task.labels = event.labels.clone();

        task.validate(self.config.engine.max_duration())?;
        admit(
            &task,
            &event.calendar_scope,
            self.config.scope(&event.calendar_scope),
        )?;
        Ok(task)
    }

    async fn classify(&self, event: &InboundEvent) -> Option<Classification> {
        let classifier = self.classifier.as_ref()?;
        if event.duration_minutes.is_some() && event.category.is_some() {
            return None;
        }
        let text = event.classification_text();
        match tokio::time::timeout(self.config.timeouts.classify(), classifier.classify(&text)).await
        {
            Ok(Ok(classification)) => {
                tracing::debug!(?classification, "classified");
                Some(classification)
            }
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "classifier failed; using explicit fields only");
                None
            }
            Err(_) => {
                tracing::warn!("classifier timed out; using explicit fields only");
                None
            }
        }
    }

    /// Pre-lock idempotence check. Errors fall through to the locked check.
    async fn scheduled_slot(&self, task_id: &TaskId) -> Option<TimeRange> {
        match tokio::time::timeout(self.config.timeouts.fetch(), self.tasks.status(task_id)).await {
            Ok(Ok(status)) => status.and_then(|s| s.scheduled_slot()),
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "status pre-check failed");
                None
            }
            Err(_) => None,
        }
    }

    /// Lock, evaluate, unlock. The locks are released on every path before
    /// this returns; the verdict's fence lets the executor detect a newer
    /// attempt.
    pub async fn decide(
        &self,
        attempt_id: AttemptId,
        task: &Task,
        scope_name: &str,
    ) -> (Verdict, StateTrace) {
        let mut trace = StateTrace::new();
        let Some(scope) = self.config.scope(scope_name) else {
            trace.push(AttemptState::Rejected);
            trace.push(AttemptState::Unlocked);
            let decision = Decision::Rejected {
                task_id: task.id.clone(),
                attempt_id,
                reason: RejectReason::UnknownScope {
                    scope: scope_name.to_string(),
                },
            };
            return (unfenced(decision), trace);
        };

        let handles = match self.acquire(&task.id, scope_name).await {
            Ok(handles) => handles,
            Err(busy) => {
                tracing::info!(reason = %busy, "lock busy; deferring");
                trace.push(AttemptState::Deferred);
                trace.push(AttemptState::Unlocked);
                let decision = Decision::Deferred {
                    task_id: task.id.clone(),
                    attempt_id,
                    reason: DeferReason::ConcurrentDecision,
                };
                return (unfenced(decision), trace);
            }
        };
        let mut guard = LeaseGuard::new(self.locks.clone(), handles);
        trace.push(AttemptState::Locked);

        let evaluated = self
            .evaluate(&mut guard, attempt_id, task, scope, &mut trace)
            .await;

        let fence = guard.fence();
        let chosen = match &evaluated {
            Evaluated::Decision(Decision::Placed { placement, .. }) => Some(placement.slot),
            _ => None,
        };
        let reservation = guard
            .release_reserving(chosen, self.config.commit_budget())
            .await;
        trace.push(AttemptState::Unlocked);

        let verdict = match evaluated {
            Evaluated::AlreadyPlaced(slot) => Verdict::AlreadyPlaced(slot),
            Evaluated::Decision(decision) => Verdict::Decided {
                decision,
                fence,
                reservation,
            },
        };
        (verdict, trace)
    }

    /// Task lock, plus the scope's resource lock when configured.
    ///
    /// A busy task lock defers at once. A busy resource lock means another
    /// task of the same scope is mid-evaluation, which ends quickly, so that
    /// case is retried with backoff.
    async fn acquire(&self, task_id: &TaskId, scope_name: &str) -> Result<Vec<LockHandle>, Busy> {
        let lease = self.config.lock.lease();
        if !self.config.lock.use_resource_lock {
            return self.locks.acquire(task_id, lease).await.map(|h| vec![h]);
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self
                .locks
                .acquire_with_resource(task_id, scope_name, lease)
                .await
            {
                Err(busy) if is_resource(&busy) && self.retry.should_retry(attempts) => {
                    let delay = self.retry.next_delay(attempts);
                    tracing::debug!(reason = %busy, ?delay, "scope busy; waiting");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn evaluate(
        &self,
        guard: &mut LeaseGuard,
        attempt_id: AttemptId,
        task: &Task,
        scope: &ScopeConfig,
        trace: &mut StateTrace,
    ) -> Evaluated {
        let defer = |reason: DeferReason| {
            Evaluated::Decision(Decision::Deferred {
                task_id: task.id.clone(),
                attempt_id,
                reason,
            })
        };

        // idempotence under the lock: the fast path may have raced
        let status = self
            .retry
            .run("status", self.config.timeouts.fetch(), || {
                self.tasks.status(&task.id)
            })
            .await;
        let prior_status = match status {
            Ok(Some(TaskStatus::Scheduled { slot, .. })) => {
                trace.push(AttemptState::Evaluating);
                trace.push(AttemptState::Placed);
                return Evaluated::AlreadyPlaced(slot);
            }
            Ok(status) => status.map_or(StatusKind::Pending, |s| s.kind()),
            Err(err) => {
                tracing::warn!(error = %err, "task status unavailable");
                trace.push(AttemptState::Deferred);
                return defer(DeferReason::TaskStoreUnavailable {
                    detail: err.to_string(),
                });
            }
        };
        trace.push(AttemptState::Evaluating);

        if let Err(reason) = self.keep_lease(guard).await {
            trace.push(AttemptState::Deferred);
            return defer(reason);
        }

        let horizon = self.horizon();
        let sources = match self.fetch_calendars(scope, horizon).await {
            Ok(sources) => sources,
            Err(reason) => {
                trace.push(AttemptState::Deferred);
                return defer(reason);
            }
        };
        if let Err(reason) = self.keep_lease(guard).await {
            trace.push(AttemptState::Deferred);
            return defer(reason);
        }

        let mut windows = compute_free_windows(&sources, horizon.start, horizon.end, self.tz);
        if !task.has_label(TaskLabel::OverrideActivityHours)
            && let Some(weekly) = scope.activity_hours.weekly()
        {
            windows = restrict_to_hours(&windows, &weekly, self.tz);
        }
        let reserved = guard.reserved_slots();
        if !reserved.is_empty() {
            tracing::debug!(reserved = reserved.len(), "avoiding slots of in-flight commits");
            windows = subtract_ranges(&windows, &reserved);
        }
        tracing::debug!(windows = windows.len(), %horizon, "free windows computed");

        let candidate = match self
            .scorer
            .place(&windows, task, horizon, self.config.engine.min_score)
        {
            Ok(candidate) => candidate,
            Err(none) => {
                tracing::info!(reason = %none, "no placement");
                trace.push(AttemptState::Deferred);
                return defer(none.into());
            }
        };
        let Some(calendar_id) = scope.target_calendar() else {
            trace.push(AttemptState::Deferred);
            return defer(DeferReason::Internal {
                detail: "scope has no target calendar".to_string(),
            });
        };

        tracing::info!(slot = %candidate.slot, score = candidate.score, "placement chosen");
        trace.push(AttemptState::Placed);
        Evaluated::Decision(Decision::Placed {
            task_id: task.id.clone(),
            attempt_id,
            placement: Placement {
                slot: candidate.slot,
                calendar_id,
                title: task.title.clone(),
                score: candidate.score,
                rationale: candidate.rationale,
                prior_status,
            },
        })
    }

    /// Renew when less than half the lease is left.
    async fn keep_lease(&self, guard: &mut LeaseGuard) -> Result<(), DeferReason> {
        if guard.min_remaining() >= self.config.lock.lease() / 2 {
            return Ok(());
        }
        match guard.renew().await {
            Ok(()) => {
                tracing::debug!("lease renewed");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "lease lost during evaluation");
                Err(DeferReason::LeaseExpired)
            }
        }
    }

    /// `[now rounded up to the slot granularity, + lookahead)`.
    fn horizon(&self) -> TimeRange {
        let start = ceil_to(self.clock.now(), self.config.engine.slot_granularity());
        TimeRange::new(start, start + self.config.engine.lookahead())
    }

    /// Fetch every calendar of the scope concurrently.
    async fn fetch_calendars(
        &self,
        scope: &ScopeConfig,
        horizon: TimeRange,
    ) -> Result<Vec<CalendarSource>, DeferReason> {
        let timeout = self.config.timeouts.fetch();
        let fetches = scope.calendars.iter().map(|calendar| async move {
            let busy = self
                .retry
                .run("fetch_busy_intervals", timeout, || {
                    self.calendar.fetch_busy_intervals(calendar, horizon)
                })
                .await;
            (calendar, busy)
        });

        let mut sources = Vec::with_capacity(scope.calendars.len());
        for (calendar, busy) in join_all(fetches).await {
            match busy {
                Ok(busy) => sources.push(CalendarSource::new(calendar, busy)),
                Err(err) if self.config.engine.skip_unavailable_calendars => {
                    tracing::warn!(calendar_id = %calendar.id, error = %err, "calendar unavailable; placing around it");
                }
                Err(err) => {
                    tracing::warn!(calendar_id = %calendar.id, error = %err, "calendar unavailable");
                    return Err(DeferReason::CalendarUnavailable {
                        detail: format!("{}: {err}", calendar.id),
                    });
                }
            }
        }
        if sources.is_empty() {
            return Err(DeferReason::CalendarUnavailable {
                detail: "no calendar in scope could be fetched".to_string(),
            });
        }
        Ok(sources)
    }

    async fn record_feedback(
        &self,
        task_id: &TaskId,
        attempt_id: AttemptId,
        outcome: FeedbackOutcome,
        decision: Option<&Decision>,
        already_scheduled: Option<TimeRange>,
        applied: &ApplyOutcome,
    ) {
        let mut record = FeedbackRecord::new(task_id.clone(), attempt_id, outcome, self.clock.now());
        let reason = match applied {
            ApplyOutcome::Failed { reason, .. } => Some(reason.clone()),
            ApplyOutcome::Committed => decision.and_then(Decision::reason),
        };
        if let Some(reason) = reason {
            record = record.with_reason(reason);
        }
        match (decision, already_scheduled) {
            (Some(Decision::Placed { placement, .. }), _) => {
                record = record.with_context(json!({
                    "slot": placement.slot,
                    "calendar_id": placement.calendar_id,
                    "score": placement.score,
                    "rationale": placement.rationale,
                }));
            }
            (Some(d), _) => {
                if let Some(kind) = d.error_kind() {
                    record = record.with_context(json!({ "kind": kind }));
                }
            }
            (_, Some(slot)) => record = record.with_context(json!({ "slot": slot })),
            _ => {}
        }

        if let Err(err) = self.feedback.record(record).await {
            tracing::warn!(error = %err, "feedback not recorded");
        }
    }

    /// Lock state of a task, for status views.
    pub async fn lock_status(&self, task_id: &TaskId) -> Result<LockStatus, LockStoreError> {
        let record = self.locks.inspect(&LockKey::Task(task_id.clone())).await?;
        Ok(LockStatus::at(record.as_ref(), self.clock.now()))
    }

    /// Drop lock records that have been settled for longer than a commit
    /// can take. Returns how many were removed.
    pub async fn reap_locks(&self) -> Result<usize, LockStoreError> {
        self.locks.reap(self.config.commit_budget()).await
    }
}

fn unfenced(decision: Decision) -> Verdict {
    Verdict::Decided {
        decision,
        fence: CommitFence::new(Vec::new()),
        reservation: None,
    }
}

fn is_resource(busy: &Busy) -> bool {
    matches!(
        busy,
        Busy::Held {
            key: LockKey::Resource(_),
            ..
        } | Busy::CoolingDown {
            key: LockKey::Resource(_),
            ..
        }
    )
}

fn feedback_outcome(decision: &Decision, outcome: &ApplyOutcome) -> FeedbackOutcome {
    match (decision, outcome) {
        (Decision::Placed { .. }, ApplyOutcome::Committed) => FeedbackOutcome::Committed,
        (Decision::Placed { .. }, ApplyOutcome::Failed { .. }) => FeedbackOutcome::Failed,
        (Decision::Deferred { .. }, _) => FeedbackOutcome::Deferred,
        (Decision::Rejected { .. }, _) => FeedbackOutcome::Rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::EngineBuilder;
    use crate::domain::{ClientError, HourRange, LocalRange, Priority, ScheduledBy};
    use crate::impls::{
        FaultPlan, InMemoryCalendar, InMemoryLockStore, InMemoryTaskStore, MemoryFeedbackSink,
        StaticClassifier,
    };
    use crate::ports::{FixedClock, UlidGenerator};
    use chrono::{NaiveDate, NaiveDateTime, TimeZone};
    use std::time::Duration;

    const CONFIG: &str = r#"
[engine]
reference_timezone = "UTC"
lookahead_days = 1
slot_granularity_minutes = 15

[lock]
lease_secs = 30
cooldown_secs = 3

[retry]
jitter = false

[scopes.work]
calendars = [{ id = "a", timezone = "UTC" }, { id = "b", timezone = "UTC" }]
"#;

    struct Harness {
        clock: Arc<FixedClock>,
        calendar: Arc<InMemoryCalendar>,
        tasks: Arc<InMemoryTaskStore>,
        feedback: Arc<MemoryFeedbackSink>,
        lock_store: Arc<InMemoryLockStore>,
        classifier: Arc<StaticClassifier>,
        engine: SchedulingEngine,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, 0).unwrap()
    }

    fn local(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 10)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    async fn harness_with(config: &str, classifier: StaticClassifier) -> Harness {
        let clock = Arc::new(FixedClock::new(t0()));
        let calendar = Arc::new(InMemoryCalendar::new());
        calendar.add_calendar("a").await;
        calendar.add_calendar("b").await;
        // A busy 9:00-10:00, B busy 9:30-11:00
        calendar
            .add_busy("a", LocalRange::new(local(9, 0), local(10, 0)))
            .await;
        calendar
            .add_busy("b", LocalRange::new(local(9, 30), local(11, 0)))
            .await;
        let tasks = Arc::new(InMemoryTaskStore::new());
        let feedback = Arc::new(MemoryFeedbackSink::new());
        let lock_store = Arc::new(InMemoryLockStore::new());
        let classifier = Arc::new(classifier);

        let engine = EngineBuilder::new(SchedulerConfig::from_toml_str(config).unwrap())
            .clock(clock.clone())
            .ids(Arc::new(UlidGenerator::new(clock.clone())))
            .lock_store(lock_store.clone())
            .calendar(calendar.clone())
            .task_store(tasks.clone())
            .feedback(feedback.clone())
            .classifier(classifier.clone())
            .build()
            .unwrap();

        Harness {
            clock,
            calendar,
            tasks,
            feedback,
            lock_store,
            classifier,
            engine,
        }
    }

    async fn harness() -> Harness {
        harness_with(CONFIG, StaticClassifier::new()).await
    }

    fn event(task: &str, minutes: i64) -> InboundEvent {
        InboundEvent::new(task, "Write report", "work").with_duration_minutes(minutes)
    }

    fn placed_slot(report: &AttemptReport) -> Option<TimeRange> {
        match &report.decision {
            Some(Decision::Placed { placement, .. }) => Some(placement.slot),
            _ => None,
        }
    }

    fn defer_reason(report: &AttemptReport) -> Option<&DeferReason> {
        match &report.decision {
            Some(Decision::Deferred { reason, .. }) => Some(reason),
            _ => None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn places_task_in_earliest_free_window() {
        let h = harness().await;
        let report = h.engine.handle_event(event("t1", 60)).await;

        assert_eq!(placed_slot(&report), Some(TimeRange::new(at(8, 0), at(9, 0))));
        assert_eq!(report.outcome, ApplyOutcome::Committed);
        assert_eq!(report.feedback, FeedbackOutcome::Committed);
        assert_eq!(
            report.states.states(),
            &[
                AttemptState::Pending,
                AttemptState::Locked,
                AttemptState::Evaluating,
                AttemptState::Placed,
                AttemptState::Unlocked,
            ]
        );

        let events = h.calendar.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].calendar_id.as_str(), "a");
        assert_eq!(
            h.tasks.get(&TaskId::new("t1")).await,
            Some(TaskStatus::Scheduled {
                slot: TimeRange::new(at(8, 0), at(9, 0)),
                scheduled_by: ScheduledBy::Engine,
            })
        );
        assert_eq!(h.feedback.counts().await.committed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn long_task_skips_merged_busy_block() {
        let h = harness().await;
        let report = h.engine.handle_event(event("t1", 90)).await;
        assert_eq!(placed_slot(&report), Some(TimeRange::new(at(11, 0), at(12, 30))));
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_deadline_defers() {
        let h = harness().await;
        let report = h
            .engine
            .handle_event(event("t1", 90).with_deadline(at(10, 0)))
            .await;

        assert_eq!(defer_reason(&report), Some(&DeferReason::DeadlineUnreachable));
        assert_eq!(report.feedback, FeedbackOutcome::Deferred);
        assert!(h.calendar.events().await.is_empty());
        let records = h.feedback.records().await;
        assert_eq!(records[0].reason.as_deref(), Some("deadline unreachable"));
        assert_eq!(
            records[0].context.as_ref().map(|c| c["kind"].clone()),
            Some(json!("no_viable_slot"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_event_is_a_no_op() {
        let h = harness().await;
        let first = h.engine.handle_event(event("t1", 60)).await;
        let second = h.engine.handle_event(event("t1", 60)).await;

        assert!(placed_slot(&first).is_some());
        assert_eq!(second.decision, None);
        assert_eq!(second.already_scheduled, placed_slot(&first));
        assert_eq!(second.outcome, ApplyOutcome::Committed);
        assert_eq!(second.feedback, FeedbackOutcome::AlreadyScheduled);
        assert_eq!(h.calendar.events().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_duplicates_book_once() {
        let h = harness().await;
        let (a, b) = tokio::join!(
            h.engine.handle_event(event("t1", 60)),
            h.engine.handle_event(event("t1", 60)),
        );

        let placed = [&a, &b].iter().filter(|r| placed_slot(r).is_some()).count();
        assert_eq!(placed, 1);
        assert_eq!(h.calendar.events().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn held_task_lock_defers_without_evaluating() {
        let h = harness().await;
        let other = LockManager::new(
            h.lock_store.clone(),
            h.clock.clone(),
            Arc::new(UlidGenerator::new(h.clock.clone())),
            Duration::ZERO,
        );
        let _held = other
            .acquire(&TaskId::new("t1"), Duration::from_secs(30))
            .await
            .unwrap();

        let report = h.engine.handle_event(event("t1", 60)).await;
        assert_eq!(defer_reason(&report), Some(&DeferReason::ConcurrentDecision));
        assert_eq!(
            report.states.states(),
            &[AttemptState::Pending, AttemptState::Deferred, AttemptState::Unlocked]
        );
        assert_eq!(h.calendar.faults().calls("fetch_busy_intervals"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn other_tasks_in_scope_wait_for_the_resource_lock() {
        let h = harness().await;
        let (a, b) = tokio::join!(
            h.engine.handle_event(event("t1", 60)),
            h.engine.handle_event(event("t2", 60)),
        );

        let a = placed_slot(&a).unwrap();
        let b = placed_slot(&b).unwrap();
        assert!(!a.overlaps(&b));
        assert_eq!(h.calendar.events().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_commit_keeps_its_slot_from_the_next_task() {
        let h = harness().await;
        h.calendar
            .faults()
            .script("create_event", FaultPlan::stall(Duration::from_secs(2)));

        let (a, b) = tokio::join!(
            h.engine.handle_event(event("t1", 60)),
            h.engine.handle_event(event("t2", 60)),
        );

        let a = placed_slot(&a).unwrap();
        let b = placed_slot(&b).unwrap();
        assert!(!a.overlaps(&b), "{a} overlaps {b}");
        assert_eq!(h.calendar.events().await.len(), 2);
        // both commits are over, so nothing stays reserved
        assert!(
            h.lock_store
                .snapshot()
                .await
                .iter()
                .all(|r| r.reservations.is_empty())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn settled_locks_are_reaped_after_the_commit_budget() {
        let h = harness().await;
        h.engine.handle_event(event("t1", 60)).await;
        assert_eq!(h.engine.reap_locks().await.unwrap(), 0);

        // cooldown 3s + commit budget 150s
        h.clock.advance(TimeDelta::seconds(153));
        assert_eq!(h.engine.reap_locks().await.unwrap(), 2);
        assert!(h.lock_store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn manual_task_is_rejected_without_locking() {
        let h = harness().await;
        let report = h
            .engine
            .handle_event(event("t1", 60).with_label("Manual Scheduled"))
            .await;

        assert!(matches!(
            report.decision,
            Some(Decision::Rejected {
                reason: RejectReason::ManualScheduling,
                ..
            })
        ));
        assert_eq!(
            report.states.states(),
            &[AttemptState::Pending, AttemptState::Rejected, AttemptState::Unlocked]
        );
        assert!(h.lock_store.snapshot().await.is_empty());
        assert_eq!(h.feedback.counts().await.rejected, 1);
    }

    #[tokio::test]
    async fn unknown_scope_and_bad_duration_are_rejected() {
        let h = harness().await;
        let report = h
            .engine
            .handle_event(InboundEvent::new("t1", "x", "home").with_duration_minutes(30))
            .await;
        assert!(matches!(
            report.decision,
            Some(Decision::Rejected {
                reason: RejectReason::UnknownScope { .. },
                ..
            })
        ));

        let report = h.engine.handle_event(event("t2", 0)).await;
        assert!(matches!(
            report.decision,
            Some(Decision::Rejected {
                reason: RejectReason::NonPositiveDuration,
                ..
            })
        ));
        // validation runs before any lock is taken
        assert_eq!(
            report.states.states(),
            &[AttemptState::Pending, AttemptState::Rejected, AttemptState::Unlocked]
        );

        let report = h.engine.handle_event(event("t3", 24 * 60)).await;
        assert!(matches!(
            report.decision,
            Some(Decision::Rejected {
                reason: RejectReason::DurationTooLong { .. },
                ..
            })
        ));
    }

    #[tokio::test]
    async fn priority_below_scope_threshold_is_rejected() {
        let config = format!("{CONFIG}auto_schedule = {{ min_priority = \"high\" }}\n");
        let h = harness_with(&config, StaticClassifier::new()).await;

        let low = h.engine.handle_event(event("t1", 30)).await;
        assert_eq!(low.feedback, FeedbackOutcome::Rejected);

        let urgent = h
            .engine
            .handle_event(event("t2", 30).with_priority(Priority::Urgent))
            .await;
        assert_eq!(urgent.feedback, FeedbackOutcome::Committed);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_calendar_defers_and_releases_the_lock() {
        let h = harness().await;
        h.calendar.faults().script(
            "fetch_busy_intervals:b",
            FaultPlan::always(ClientError::Unavailable),
        );

        let report = h.engine.handle_event(event("t1", 60)).await;
        assert!(matches!(
            defer_reason(&report),
            Some(DeferReason::CalendarUnavailable { .. })
        ));
        assert_eq!(h.calendar.faults().calls("fetch_busy_intervals:b"), 4);
        assert!(!matches!(
            h.engine.lock_status(&TaskId::new("t1")).await.unwrap(),
            LockStatus::Held { .. }
        ));

        h.clock.advance(TimeDelta::seconds(3));
        assert_eq!(
            h.engine.lock_status(&TaskId::new("t1")).await.unwrap(),
            LockStatus::Free
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_calendar_can_be_skipped() {
        let config = CONFIG.replace(
            "slot_granularity_minutes = 15",
            "slot_granularity_minutes = 15\nskip_unavailable_calendars = true",
        );
        let h = harness_with(&config, StaticClassifier::new()).await;
        h.calendar.faults().script(
            "fetch_busy_intervals:b",
            FaultPlan::always(ClientError::Unavailable),
        );

        // without B, only A's 9:00-10:00 is busy
        let report = h.engine.handle_event(event("t1", 90)).await;
        assert_eq!(placed_slot(&report), Some(TimeRange::new(at(10, 0), at(11, 30))));
    }

    #[tokio::test(start_paused = true)]
    async fn duration_falls_back_to_classifier_then_default() {
        let classifier = StaticClassifier::new().with_rule(
            "review",
            Classification {
                category: Some("work".into()),
                duration_hint_minutes: Some(45),
            },
        );
        let h = harness_with(CONFIG, classifier).await;

        let hinted = h
            .engine
            .handle_event(InboundEvent::new("t1", "Review PR", "work"))
            .await;
        assert_eq!(placed_slot(&hinted).map(|s| s.duration()), Some(TimeDelta::minutes(45)));

        h.classifier
            .faults()
            .script("classify", FaultPlan::once(ClientError::Unavailable));
        let fallback = h
            .engine
            .handle_event(InboundEvent::new("t2", "Review docs", "work"))
            .await;
        assert_eq!(placed_slot(&fallback).map(|s| s.duration()), Some(TimeDelta::minutes(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn activity_hours_restrict_and_override_bypasses() {
        let config = format!(
            "{CONFIG}activity_hours = {{ mon = {{ start = \"13:00\", end = \"17:00\" }} }}\n"
        );
        let h = harness_with(&config, StaticClassifier::new()).await;

        let report = h.engine.handle_event(event("t1", 60)).await;
        assert_eq!(placed_slot(&report), Some(TimeRange::new(at(13, 0), at(14, 0))));

        let report = h
            .engine
            .handle_event(event("t2", 60).with_label("Override Activity Hours"))
            .await;
        assert_eq!(placed_slot(&report), Some(TimeRange::new(at(8, 0), at(9, 0))));
    }

    #[tokio::test(start_paused = true)]
    async fn preferred_hours_pick_the_matching_sub_slot() {
        let h = harness().await;
        let report = h
            .engine
            .handle_event(
                event("t1", 60).with_preferred_hours(vec![HourRange::parse("14:00", "16:00").unwrap()]),
            )
            .await;
        assert_eq!(placed_slot(&report), Some(TimeRange::new(at(14, 0), at(15, 0))));
    }

    #[tokio::test(start_paused = true)]
    async fn min_score_gates_placement() {
        let config = CONFIG.replace(
            "slot_granularity_minutes = 15",
            "slot_granularity_minutes = 15\nmin_score = 5000.0",
        );
        let h = harness_with(&config, StaticClassifier::new()).await;

        let report = h.engine.handle_event(event("t1", 60)).await;
        assert!(matches!(
            defer_reason(&report),
            Some(DeferReason::BelowThreshold { .. })
        ));
        assert!(h.calendar.events().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_task_update_is_reported_and_compensated() {
        let h = harness().await;
        h.tasks.faults().script(
            "update_status",
            FaultPlan::once(ClientError::Rejected("read-only".into())),
        );

        let report = h.engine.handle_event(event("t1", 60)).await;
        assert!(matches!(
            report.outcome,
            ApplyOutcome::Failed {
                retryable: false,
                ..
            }
        ));
        assert_eq!(report.feedback, FeedbackOutcome::Failed);
        assert!(h.calendar.events().await.is_empty());
        assert_eq!(h.tasks.get(&TaskId::new("t1")).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn placed_events_block_later_tasks() {
        let h = harness().await;
        let first = h.engine.handle_event(event("t1", 60)).await;
        let second = h.engine.handle_event(event("t2", 60)).await;

        assert_eq!(placed_slot(&first), Some(TimeRange::new(at(8, 0), at(9, 0))));
        assert_eq!(placed_slot(&second), Some(TimeRange::new(at(11, 0), at(12, 0))));
    }
}
