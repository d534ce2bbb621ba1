//! EventDispatcher - 受信イベントを独立した attempt として並行実行する
//!
//! - 1 イベント = 1 tokio task（semaphore で同時実行数を制限）
//! - attempt 内の panic はその attempt だけで止まる（lock は LeaseGuard が返す）
//! - `request_shutdown()` は新規受付を止めるだけで、実行中の attempt は待つ
//! - 定期的に落ち着いた lock レコードを掃除する（reaper）

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use super::engine::{AttemptReport, SchedulingEngine};
use crate::domain::InboundEvent;

/// Buffered events waiting for a free slot.
const QUEUE_CAPACITY: usize = 256;

/// How often settled lock records are swept.
const REAP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatcher is shut down")]
    Closed,
}

/// Dispatcher handle.
/// - `finish()` で受付を閉じ、キューを捌き切ってから終了
/// - `shutdown_and_join()` でキューに残ったイベントを捨てて終了
pub struct EventDispatcher {
    events_tx: mpsc::Sender<InboundEvent>,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl EventDispatcher {
    /// Spawn the dispatch loop. Each finished attempt's report is sent on
    /// `reports`.
    pub fn spawn(
        engine: Arc<SchedulingEngine>,
        max_concurrent: usize,
        reports: mpsc::UnboundedSender<AttemptReport>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));

        let join = tokio::spawn(dispatch_loop(
            engine,
            events_rx,
            permits,
            reports,
            shutdown_rx,
        ));

        Self {
            events_tx,
            shutdown_tx,
            join,
        }
    }

    /// Queue `event`. Waits while the queue is full.
    pub async fn submit(&self, event: InboundEvent) -> Result<(), DispatchError> {
        self.events_tx
            .send(event)
            .await
            .map_err(|_| DispatchError::Closed)
    }

    /// Stop taking events. In-flight attempts still finish.
    pub fn request_shutdown(&self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shut down and wait for in-flight attempts.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }

    /// Close intake, run everything already queued, then wait.
    pub async fn finish(self) {
        drop(self.events_tx);
        let _ = self.join.await;
    }
}

async fn dispatch_loop(
    engine: Arc<SchedulingEngine>,
    mut events_rx: mpsc::Receiver<InboundEvent>,
    permits: Arc<Semaphore>,
    reports: mpsc::UnboundedSender<AttemptReport>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut inflight = JoinSet::new();
    let mut reap = tokio::time::interval(REAP_INTERVAL);
    reap.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = reap.tick() => {
                if let Err(err) = engine.reap_locks().await {
                    tracing::warn!(error = %err, "lock reap failed");
                }
            }
            Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                if let Err(err) = joined {
                    tracing::error!(error = %err, "attempt task failed");
                }
            }
            event = events_rx.recv() => {
                let Some(event) = event else {
                    // every sender dropped: queue drained
                    break;
                };
                // backpressure: wait for a slot before taking the next event
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let engine = Arc::clone(&engine);
                let reports = reports.clone();
                inflight.spawn(async move {
                    let _permit = permit;
                    let task_id = event.task_id.clone();
                    match AssertUnwindSafe(engine.handle_event(event)).catch_unwind().await {
                        Ok(report) => {
                            // receiver gone means nobody is listening; not an error
                            let _ = reports.send(report);
                        }
                        Err(_) => {
                            tracing::error!(%task_id, "decision attempt panicked; its leases are released by the guard");
                        }
                    }
                });
            }
        }
    }

    events_rx.close();
    while let Ok(event) = events_rx.try_recv() {
        tracing::warn!(task_id = %event.task_id, "event dropped at shutdown");
    }
    while let Some(joined) = inflight.join_next().await {
        if let Err(err) = joined {
            tracing::error!(error = %err, "attempt task failed");
        }
    }
    tracing::debug!("dispatcher stopped");
}
