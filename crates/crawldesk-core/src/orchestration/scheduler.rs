use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::models::{CoreError, TaskId};
use crate::orchestration::OrchestrationResult;
use crate::orchestration::clock::{TimerDriver, TimerFuture, TimerHandle};

/// At most one pending one-shot timer per task id.
///
/// A firing timer removes its own entry before running its callback, so the
/// map only ever holds timers that have not started executing. Every entry
/// carries a generation so a stale fire can never claim a replacement timer.
#[derive(Clone)]
pub struct Scheduler {
    driver: Arc<dyn TimerDriver>,
    state: Arc<Mutex<SchedulerState>>,
}

#[derive(Default)]
struct SchedulerState {
    next_generation: u64,
    timers: HashMap<TaskId, PendingTimer>,
}

struct PendingTimer {
    generation: u64,
    handle: TimerHandle,
}

impl Scheduler {
    pub fn new(driver: Arc<dyn TimerDriver>) -> Self {
        Self {
            driver,
            state: Arc::new(Mutex::new(SchedulerState::default())),
        }
    }

    /// Arms `on_fire` after `delay`, replacing any pending timer for the task.
    pub fn arm<F>(&self, task_id: &TaskId, delay: Duration, on_fire: F) -> OrchestrationResult<()>
    where
        F: FnOnce() -> TimerFuture + Send + 'static,
    {
        let mut state = self.lock_state()?;
        let generation = state.next_generation;
        state.next_generation = state.next_generation.wrapping_add(1);

        if let Some(previous) = state.timers.remove(task_id) {
            tracing::debug!(task_id = %task_id, "replacing pending timer");
            previous.handle.cancel();
        }

        let shared = self.state.clone();
        let fired_id = task_id.clone();
        let handle = self.driver.arm(
            delay,
            Box::new(move || -> TimerFuture {
                Box::pin(async move {
                    if claim(&shared, &fired_id, generation) {
                        tracing::debug!(task_id = %fired_id, "timer fired");
                        on_fire().await;
                    }
                })
            }),
        )?;

        state
            .timers
            .insert(task_id.clone(), PendingTimer { generation, handle });
        tracing::debug!(
            task_id = %task_id,
            delay_ms = delay.as_millis() as u64,
            "armed timer"
        );
        Ok(())
    }

    /// Returns whether a pending timer was found. Idempotent.
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        let removed = match self.lock_state() {
            Ok(mut state) => state.timers.remove(task_id),
            Err(error) => {
                tracing::error!(task_id = %task_id, error = %error, "failed to cancel timer");
                None
            }
        };

        match removed {
            Some(timer) => {
                timer.handle.cancel();
                tracing::debug!(task_id = %task_id, "cancelled pending timer");
                true
            }
            None => false,
        }
    }

    pub fn has_timer(&self, task_id: &TaskId) -> bool {
        self.lock_state()
            .map(|state| state.timers.contains_key(task_id))
            .unwrap_or(false)
    }

    pub fn scheduled_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .lock_state()
            .map(|state| state.timers.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    fn lock_state(&self) -> OrchestrationResult<MutexGuard<'_, SchedulerState>> {
        self.state
            .lock()
            .map_err(|_| CoreError::poisoned("scheduler state"))
    }
}

fn claim(state: &Mutex<SchedulerState>, task_id: &TaskId, generation: u64) -> bool {
    let Ok(mut state) = state.lock() else {
        return false;
    };
    match state.timers.get(task_id) {
        Some(timer) if timer.generation == generation => {
            state.timers.remove(task_id);
            true
        }
        _ => false,
    }
}
