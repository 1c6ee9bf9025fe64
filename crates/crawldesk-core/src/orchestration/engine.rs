use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::EngineConfig;
use crate::models::{
    CoreError, CoreErrorKind, NewTask, TaskId, TaskItem, TaskPatch, TaskSnapshot, TaskStatus,
};
use crate::orchestration::OrchestrationResult;
use crate::orchestration::clock::{Clock, SystemClock, TimerDriver, TimerFuture, TokioTimerDriver};
use crate::orchestration::observer::{NoopObserver, TaskObserver};
use crate::orchestration::registry::{CancelOutcome, TaskDebugEntry, TaskRegistry};
use crate::orchestration::runner::TaskRunner;
use crate::orchestration::scheduler::Scheduler;
use crate::output::{OutputRevealer, SystemRevealer};
use crate::session::WorkerSessionFactory;

/// Cloneable handle to one task registry with its scheduler and runner.
pub struct TaskEngine<I: TaskItem> {
    inner: Arc<EngineInner<I>>,
}

struct EngineInner<I: TaskItem> {
    registry: Arc<TaskRegistry<I>>,
    scheduler: Scheduler,
    runner: Arc<TaskRunner<I>>,
    clock: Arc<dyn Clock>,
}

impl<I: TaskItem> Clone for TaskEngine<I> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct EngineDebugInfo {
    pub total_tasks: usize,
    pub total_scheduled: usize,
    pub scheduled_ids: Vec<TaskId>,
    pub tasks: Vec<TaskDebugEntry>,
}

pub struct TaskEngineBuilder<I: TaskItem> {
    factory: Arc<dyn WorkerSessionFactory<I>>,
    observer: Arc<dyn TaskObserver<I>>,
    clock: Arc<dyn Clock>,
    timers: Arc<dyn TimerDriver>,
    revealer: Option<Arc<dyn OutputRevealer>>,
    config: EngineConfig,
}

impl<I: TaskItem> TaskEngineBuilder<I> {
    pub fn observer(mut self, observer: Arc<dyn TaskObserver<I>>) -> Self {
        self.observer = observer;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn timer_driver(mut self, timers: Arc<dyn TimerDriver>) -> Self {
        self.timers = timers;
        self
    }

    pub fn revealer(mut self, revealer: Arc<dyn OutputRevealer>) -> Self {
        self.revealer = Some(revealer);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> TaskEngine<I> {
        let registry = Arc::new(TaskRegistry::new(self.observer));
        let revealer = self
            .revealer
            .unwrap_or_else(|| Arc::new(SystemRevealer::new()));
        let runner = Arc::new(TaskRunner::new(
            registry.clone(),
            self.factory,
            revealer,
            Arc::new(self.config),
        ));

        TaskEngine {
            inner: Arc::new(EngineInner {
                registry,
                scheduler: Scheduler::new(self.timers),
                runner,
                clock: self.clock,
            }),
        }
    }
}

impl<I: TaskItem> TaskEngine<I> {
    pub fn builder(factory: Arc<dyn WorkerSessionFactory<I>>) -> TaskEngineBuilder<I> {
        TaskEngineBuilder {
            factory,
            observer: Arc::new(NoopObserver),
            clock: Arc::new(SystemClock),
            timers: Arc::new(TokioTimerDriver),
            revealer: None,
            config: EngineConfig::default(),
        }
    }

    pub fn add_task(&self, task: NewTask<I>) -> OrchestrationResult<TaskSnapshot<I>> {
        let snapshot = self.inner.registry.add(task)?;
        tracing::debug!(task_id = %snapshot.id, "task added");
        Ok(snapshot)
    }

    pub fn get_all_tasks(&self) -> OrchestrationResult<Vec<TaskSnapshot<I>>> {
        self.inner.registry.get_all()
    }

    pub fn get_task(&self, task_id: &TaskId) -> OrchestrationResult<Option<TaskSnapshot<I>>> {
        self.inner.registry.get(task_id)
    }

    pub fn update_task(&self, task_id: &TaskId, patch: TaskPatch<I>) -> OrchestrationResult<bool> {
        self.inner.registry.update(task_id, &patch)
    }

    pub fn update_all_tasks(&self, patch: TaskPatch<I>) -> OrchestrationResult<usize> {
        self.inner.registry.update_all(&patch)
    }

    /// Deletes a task outright, disarming its timer and closing a live
    /// session if it has one.
    pub async fn remove_task(&self, task_id: &TaskId) -> OrchestrationResult<bool> {
        self.inner.scheduler.cancel(task_id);
        self.take_and_close(task_id).await
    }

    /// Marks the task `Scheduled` and arms its timer, replacing any pending one.
    pub fn schedule(&self, task_id: &TaskId) -> OrchestrationResult<()> {
        let scheduled_time = self.inner.registry.mark_scheduled(task_id)?;
        let delay = scheduled_time
            .duration_since(self.inner.clock.now())
            .unwrap_or(Duration::ZERO);

        let runner = self.inner.runner.clone();
        let fired_id = task_id.clone();
        let armed = self.inner.scheduler.arm(task_id, delay, move || -> TimerFuture {
            Box::pin(async move { runner.execute_task(&fired_id).await })
        });

        if let Err(error) = armed {
            tracing::error!(task_id = %task_id, error = %error, "failed to arm timer");
            self.inner.registry.set_idle_status(task_id, TaskStatus::Failed)?;
            return Err(CoreError { task: Some(task_id.clone()), ..error });
        }

        tracing::info!(
            task_id = %task_id,
            delay_ms = delay.as_millis() as u64,
            "task scheduled"
        );
        Ok(())
    }

    /// Disarms a pending timer. The task stays in the registry as
    /// `Cancelled` so it can be scheduled or run again.
    pub fn cancel_schedule(&self, task_id: &TaskId) -> bool {
        if !self.inner.scheduler.cancel(task_id) {
            return false;
        }
        if let Err(error) = self
            .inner
            .registry
            .set_idle_status(task_id, TaskStatus::Cancelled)
        {
            tracing::error!(task_id = %task_id, error = %error, "failed to un-schedule task");
        }
        true
    }

    /// Runs the task now, superseding a pending timer, and returns when the
    /// run is over. Execution failures end up on the task, not in the result.
    pub async fn run(&self, task_id: &TaskId) -> OrchestrationResult<()> {
        let task = self
            .inner
            .registry
            .get(task_id)?
            .ok_or_else(|| CoreError::task_not_found(task_id))?;
        if task.status == TaskStatus::Running || self.inner.registry.is_busy(task_id)? {
            return Err(CoreError::for_task(
                task_id,
                CoreErrorKind::InvalidState,
                format!("task '{task_id}' is already running"),
            ));
        }

        if self.inner.scheduler.cancel(task_id) {
            tracing::debug!(task_id = %task_id, "immediate run superseded pending timer");
        }
        self.inner.runner.execute_task(task_id).await;
        Ok(())
    }

    /// Returns `false` only when the task does not exist.
    pub async fn cancel_task(&self, task_id: &TaskId) -> bool {
        if self.inner.scheduler.cancel(task_id) {
            if let Err(error) = self.take_and_close(task_id).await {
                tracing::error!(task_id = %task_id, error = %error, "failed to remove scheduled task");
            }
            tracing::info!(task_id = %task_id, "cancelled scheduled task");
            return true;
        }

        match self.inner.registry.cancel(task_id) {
            Ok(CancelOutcome::Missing) => false,
            Ok(CancelOutcome::AlreadyCancelled) => true,
            Ok(CancelOutcome::Removed) => {
                tracing::info!(task_id = %task_id, "removed idle task");
                true
            }
            Ok(CancelOutcome::Interrupted) => {
                tracing::info!(task_id = %task_id, "cancelled task while its session was starting");
                true
            }
            Ok(CancelOutcome::Detached(session)) => {
                tracing::info!(task_id = %task_id, "cancelling running task");
                session.close().await;
                true
            }
            Err(error) => {
                tracing::error!(task_id = %task_id, error = %error, "failed to cancel task");
                false
            }
        }
    }

    /// Waits until the task reaches a terminal status. A task removed while
    /// waiting yields `TaskNotFound`.
    pub async fn wait_for_terminal(
        &self,
        task_id: &TaskId,
        timeout: Option<Duration>,
    ) -> OrchestrationResult<TaskSnapshot<I>> {
        let deadline = timeout.map(|duration| tokio::time::Instant::now() + duration);

        loop {
            let changed = self.inner.registry.changed().notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let task = self
                .inner
                .registry
                .get(task_id)?
                .ok_or_else(|| CoreError::task_not_found(task_id))?;
            if task.status.is_terminal() {
                return Ok(task);
            }

            match deadline {
                Some(deadline) => {
                    tokio::time::timeout_at(deadline, changed)
                        .await
                        .map_err(|_| {
                            CoreError::for_task(
                                task_id,
                                CoreErrorKind::Timeout,
                                format!("timed out waiting for task '{task_id}' to finish"),
                            )
                        })?;
                }
                None => changed.await,
            }
        }
    }

    pub fn debug_info(&self) -> OrchestrationResult<EngineDebugInfo> {
        let tasks = self.inner.registry.debug_entries()?;
        let scheduled_ids = self.inner.scheduler.scheduled_ids();
        Ok(EngineDebugInfo {
            total_tasks: tasks.len(),
            total_scheduled: scheduled_ids.len(),
            scheduled_ids,
            tasks,
        })
    }

    /// Whether a timer is pending for the task.
    pub fn has_pending_timer(&self, task_id: &TaskId) -> bool {
        self.inner.scheduler.has_timer(task_id)
    }

    async fn take_and_close(&self, task_id: &TaskId) -> OrchestrationResult<bool> {
        match self.inner.registry.take(task_id)? {
            None => Ok(false),
            Some(None) => Ok(true),
            Some(Some(session)) => {
                tracing::info!(task_id = %task_id, "removed running task; closing its session");
                session.close().await;
                Ok(true)
            }
        }
    }
}
