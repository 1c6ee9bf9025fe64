use std::path::Path;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::models::{
    CoreError, CoreErrorKind, ItemOutcome, ResultRecord, TaskId, TaskItem, TaskSnapshot,
    TaskStatus,
};
use crate::orchestration::OrchestrationResult;
use crate::orchestration::registry::TaskRegistry;
use crate::output::{OutputLayout, OutputRevealer, ResultsWriter, SheetWriter, TaskLog};
use crate::session::{SessionContext, WorkerSession, WorkerSessionFactory};

/// Drives one task through a single run, owning its worker session for the
/// duration. Failures are recorded on the task, never returned.
pub struct TaskRunner<I: TaskItem> {
    registry: Arc<TaskRegistry<I>>,
    factory: Arc<dyn WorkerSessionFactory<I>>,
    revealer: Arc<dyn OutputRevealer>,
    config: Arc<EngineConfig>,
}

#[derive(Default)]
struct RunTally {
    succeeded: usize,
    recovered: usize,
    fatal: Option<String>,
}

impl<I: TaskItem> TaskRunner<I> {
    pub fn new(
        registry: Arc<TaskRegistry<I>>,
        factory: Arc<dyn WorkerSessionFactory<I>>,
        revealer: Arc<dyn OutputRevealer>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            registry,
            factory,
            revealer,
            config,
        }
    }

    pub async fn execute_task(&self, task_id: &TaskId) {
        let task = match self.registry.get(task_id) {
            Ok(Some(task)) => task,
            Ok(None) => {
                tracing::warn!(task_id = %task_id, "task vanished before execution");
                return;
            }
            Err(error) => {
                tracing::error!(task_id = %task_id, error = %error, "failed to read task");
                return;
            }
        };

        let Some(base_dir) = task.output_base_dir.clone() else {
            let error = CoreError::for_task(
                task_id,
                CoreErrorKind::MissingDestination,
                "no output directory selected",
            );
            self.fail_before_start(&task, None, &error);
            return;
        };
        let layout = OutputLayout::resolve(&base_dir, task.output_name.as_deref(), &self.config.output);

        let (Some(output_name), Some(items)) = (task.output_name.clone(), task.items.clone()) else {
            let error = CoreError::for_task(
                task_id,
                CoreErrorKind::MissingInput,
                "task has no input items or no output name",
            );
            self.fail_before_start(&task, Some(&layout), &error);
            return;
        };

        match self.registry.begin_launch(task_id) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(task_id = %task_id, "task is already starting or running; skipping");
                return;
            }
            Err(error) => {
                tracing::error!(task_id = %task_id, error = %error, "failed to claim task");
                return;
            }
        }

        let log = open_log(task_id, &layout.folder);
        let writer: Arc<dyn ResultsWriter> =
            Arc::new(SheetWriter::new(&layout.sheet_path, I::sheet_header()));

        let context = SessionContext {
            task_id: task_id.clone(),
            output_base_dir: base_dir,
            output_name,
            output_folder: layout.folder.clone(),
            debug: task.debug,
        };
        let session = match self.factory.open(context).await {
            Ok(session) => session,
            Err(error) => {
                log.append_error("failed to start worker session", &error);
                let failed = self.registry.abort_launch(task_id).unwrap_or_else(|error| {
                    tracing::error!(task_id = %task_id, error = %error, "failed to mark task failed");
                    false
                });
                log.close();
                if failed {
                    self.reveal(&layout.folder);
                }
                return;
            }
        };

        match self.registry.attach_session(task_id, session.clone()) {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(task_id = %task_id, "task was cancelled while starting; discarding session");
                session.close().await;
                log.append("task cancelled before its session started");
                log.close();
                self.settle().await;
                return;
            }
            Err(error) => {
                tracing::error!(task_id = %task_id, error = %error, "failed to attach session");
                session.close().await;
                log.close();
                return;
            }
        }

        log.append(&format!("task started with {} item(s)", items.len()));
        let tally = self.process_items(task_id, &items, &session, &log, &writer).await;

        let status = if tally.fatal.is_some() {
            TaskStatus::Failed
        } else {
            TaskStatus::Completed
        };
        let finished = match self.registry.finish(task_id, &session, status) {
            Ok(finished) => finished,
            Err(error) => {
                tracing::error!(task_id = %task_id, error = %error, "failed to record task result");
                false
            }
        };

        session.close().await;

        if finished {
            match &tally.fatal {
                Some(reason) => log.append(&format!(
                    "task failed after {} success(es): {reason}",
                    tally.succeeded
                )),
                None => log.append(&format!(
                    "task completed: {} success(es), {} error row(s)",
                    tally.succeeded, tally.recovered
                )),
            }
            tracing::info!(task_id = %task_id, status = %status, "task finished");
        } else {
            log.append("task cancelled");
        }
        log.close();
        self.settle().await;

        if finished {
            self.reveal(&layout.folder);
        }
    }

    async fn process_items(
        &self,
        task_id: &TaskId,
        items: &[I],
        session: &Arc<dyn WorkerSession<I>>,
        log: &TaskLog,
        writer: &Arc<dyn ResultsWriter>,
    ) -> RunTally {
        let mut tally = RunTally::default();
        let item_delay = self.config.pacing.item_delay();

        for (item_index, item) in items.iter().enumerate() {
            if !self.registry.owns_session(task_id, session) {
                break;
            }
            if item_index > 0 && !item_delay.is_zero() {
                tokio::time::sleep(item_delay).await;
            }

            let outcome = session.process(item).await;
            if !self.registry.owns_session(task_id, session) {
                tracing::debug!(task_id = %task_id, item_index, "session detached; stopping");
                break;
            }

            match outcome {
                ItemOutcome::Success(record) => {
                    tally.succeeded += 1;
                    log.append(&format!("[{}] ok: {}", item_index + 1, item.label()));
                    if let Err(error) = write_row(writer, RowKind::Success, record.row()).await {
                        log.append_error("failed to write result row", &error);
                    }
                }
                ItemOutcome::Recoverable(reason) => {
                    tally.recovered += 1;
                    log.append(&format!(
                        "[{}] error: {}: {reason}",
                        item_index + 1,
                        item.label()
                    ));
                    if let Err(error) =
                        write_row(writer, RowKind::Error, item.error_row(&reason)).await
                    {
                        log.append_error("failed to write error row", &error);
                    }
                }
                ItemOutcome::Fatal(reason) => {
                    log.append(&format!(
                        "[{}] fatal: {}: {reason}",
                        item_index + 1,
                        item.label()
                    ));
                    tally.fatal = Some(reason);
                    break;
                }
            }
        }

        tally
    }

    /// Precondition failures go straight to `Failed` without a session.
    fn fail_before_start(
        &self,
        task: &TaskSnapshot<I>,
        layout: Option<&OutputLayout>,
        error: &CoreError,
    ) {
        let log = match layout {
            Some(layout) => open_log(&task.id, &layout.folder),
            None => TaskLog::detached(&task.id),
        };
        log.append_error("task cannot start", error);
        self.record_idle_failure(&task.id);
        log.close();

        if let Some(layout) = layout {
            self.reveal(&layout.folder);
        }
    }

    fn record_idle_failure(&self, task_id: &TaskId) {
        if let Err(error) = self.registry.set_idle_status(task_id, TaskStatus::Failed) {
            tracing::error!(task_id = %task_id, error = %error, "failed to mark task failed");
        }
    }

    async fn settle(&self) {
        let settle = self.config.pacing.session_settle();
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }
    }

    fn reveal(&self, folder: &Path) {
        if self.config.output.reveal {
            self.revealer.reveal(folder);
        }
    }
}

fn open_log(task_id: &TaskId, folder: &Path) -> TaskLog {
    TaskLog::open(task_id, folder).unwrap_or_else(|error| {
        tracing::warn!(
            task_id = %task_id,
            error = %error,
            "task log unavailable; logging to tracing only"
        );
        TaskLog::detached(task_id)
    })
}

#[derive(Clone, Copy)]
enum RowKind {
    Success,
    Error,
}

async fn write_row(
    writer: &Arc<dyn ResultsWriter>,
    kind: RowKind,
    fields: Vec<String>,
) -> OrchestrationResult<()> {
    let writer = writer.clone();
    tokio::task::spawn_blocking(move || match kind {
        RowKind::Success => writer.append_success_row(&fields),
        RowKind::Error => writer.append_error_row(&fields),
    })
    .await
    .map_err(|join_error| {
        CoreError::new(
            CoreErrorKind::Internal,
            format!("results writer join failure: {join_error}"),
        )
    })?
}
