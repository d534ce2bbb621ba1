//! Scripted failures for in-memory adapters.
//!
//! Each adapter checks an operation name (e.g. `"create_event"`) before doing
//! any work. Scripts queue up per operation and are consumed in order.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::domain::ClientError;

/// One scripted behaviour: optionally stall, then optionally fail.
#[derive(Debug, Clone)]
pub struct FaultPlan {
    /// `None` = every call from now on.
    remaining: Option<u32>,
    delay: Option<Duration>,
    error: Option<ClientError>,
}

impl FaultPlan {
    /// Fail the next `n` calls.
    pub fn times(n: u32, error: ClientError) -> Self {
        Self {
            remaining: Some(n),
            delay: None,
            error: Some(error),
        }
    }

    pub fn once(error: ClientError) -> Self {
        Self::times(1, error)
    }

    pub fn always(error: ClientError) -> Self {
        Self {
            remaining: None,
            delay: None,
            error: Some(error),
        }
    }

    /// Stall the next call for `delay`, then let it through.
    pub fn stall(delay: Duration) -> Self {
        Self {
            remaining: Some(1),
            delay: Some(delay),
            error: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct FaultInjector {
    plans: Mutex<HashMap<String, VecDeque<FaultPlan>>>,
    calls: Mutex<HashMap<String, u32>>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, op: &str, plan: FaultPlan) {
        lock(&self.plans)
            .entry(op.to_string())
            .or_default()
            .push_back(plan);
    }

    /// Number of times `op` was invoked (including failed calls).
    pub fn calls(&self, op: &str) -> u32 {
        lock(&self.calls).get(op).copied().unwrap_or(0)
    }

    /// Record a call to `op` and play its script, if any.
    pub async fn check(&self, op: &str) -> Result<(), ClientError> {
        *lock(&self.calls).entry(op.to_string()).or_default() += 1;

        let plan = {
            let mut plans = lock(&self.plans);
            let Some(queue) = plans.get_mut(op) else {
                return Ok(());
            };
            let Some(front) = queue.front_mut() else {
                return Ok(());
            };
            let plan = front.clone();
            let exhausted = match &mut front.remaining {
                Some(n) if *n <= 1 => true,
                Some(n) => {
                    *n -= 1;
                    false
                }
                None => false,
            };
            if exhausted {
                queue.pop_front();
            }
            plan
        };

        if let Some(delay) = plan.delay {
            tokio::time::sleep(delay).await;
        }
        match plan.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripts_are_consumed_in_order() {
        let faults = FaultInjector::new();
        faults.script("op", FaultPlan::times(2, ClientError::Unavailable));
        faults.script("op", FaultPlan::once(ClientError::Conflict));

        assert_eq!(faults.check("op").await, Err(ClientError::Unavailable));
        assert_eq!(faults.check("op").await, Err(ClientError::Unavailable));
        assert_eq!(faults.check("op").await, Err(ClientError::Conflict));
        assert_eq!(faults.check("op").await, Ok(()));
        assert_eq!(faults.check("other").await, Ok(()));

        assert_eq!(faults.calls("op"), 4);
        assert_eq!(faults.calls("missing"), 0);
    }

    #[tokio::test]
    async fn always_never_runs_out() {
        let faults = FaultInjector::new();
        faults.script("op", FaultPlan::always(ClientError::Timeout));
        for _ in 0..5 {
            assert_eq!(faults.check("op").await, Err(ClientError::Timeout));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stall_delays_then_succeeds() {
        let faults = FaultInjector::new();
        faults.script("op", FaultPlan::stall(Duration::from_secs(30)));

        let started = tokio::time::Instant::now();
        assert_eq!(faults.check("op").await, Ok(()));
        assert!(started.elapsed() >= Duration::from_secs(30));
    }
}
