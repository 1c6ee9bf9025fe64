use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::SiteConfig;
use crate::execution::{
    CommandSpec, ProcessExecutor, ProcessExitStatus, ProcessOutput, ProcessSpawnRequest,
    ProcessTerminationMode, ProcessTerminator, TokioProcessExecutor, spawn_validated,
};
use crate::models::{CoreError, CoreErrorKind, ItemOutcome, TaskItem};
use crate::orchestration::OrchestrationResult;
use crate::session::{SessionContext, SessionFuture, WorkerSession, WorkerSessionFactory};

pub const RESULT_PREFIX: &str = "RESULT:";
pub const ERROR_PREFIX: &str = "ERROR:";

const STDERR_TAIL_CHARS: usize = 400;

/// Opens sessions backed by an external scraper executable, one invocation
/// per item.
pub struct ProcessSessionFactory<I> {
    site: SiteConfig,
    executor: Arc<dyn ProcessExecutor>,
    _items: PhantomData<fn() -> I>,
}

impl<I: TaskItem> ProcessSessionFactory<I> {
    pub fn new(site: SiteConfig) -> Self {
        Self::with_executor(site, Arc::new(TokioProcessExecutor))
    }

    pub fn with_executor(site: SiteConfig, executor: Arc<dyn ProcessExecutor>) -> Self {
        Self {
            site,
            executor,
            _items: PhantomData,
        }
    }
}

impl<I: TaskItem> WorkerSessionFactory<I> for ProcessSessionFactory<I> {
    fn open(
        &self,
        context: SessionContext,
    ) -> SessionFuture<'_, OrchestrationResult<Arc<dyn WorkerSession<I>>>> {
        Box::pin(async move {
            let program = &self.site.program;
            CommandSpec::new(program)
                .args(self.site.args.iter().cloned())
                .validate(Some(&context.task_id))?;

            if program.components().count() > 1 && !program.exists() {
                return Err(CoreError::for_task(
                    &context.task_id,
                    CoreErrorKind::SessionFailure,
                    format!("scraper program '{}' does not exist", program.display()),
                ));
            }

            tracing::debug!(
                task_id = %context.task_id,
                program = %program.display(),
                debug = context.debug,
                "opened process worker session"
            );

            let session: Arc<dyn WorkerSession<I>> = Arc::new(ProcessWorkerSession::<I> {
                site: self.site.clone(),
                executor: self.executor.clone(),
                context,
                closed: AtomicBool::new(false),
                current: Mutex::new(None),
                _items: PhantomData,
            });
            Ok(session)
        })
    }
}

pub struct ProcessWorkerSession<I> {
    site: SiteConfig,
    executor: Arc<dyn ProcessExecutor>,
    context: SessionContext,
    closed: AtomicBool,
    current: Mutex<Option<ProcessTerminator>>,
    _items: PhantomData<fn() -> I>,
}

impl<I: TaskItem> ProcessWorkerSession<I> {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn command_for(&self, item: &I) -> Result<CommandSpec, String> {
        let data = serde_json::to_string(item)
            .map_err(|error| format!("failed to encode item: {error}"))?;

        Ok(CommandSpec::new(&self.site.program)
            .args(self.site.args.iter().cloned())
            .arg("--baseDir")
            .arg(path_arg(&self.context.output_base_dir))
            .arg("--excelName")
            .arg(self.context.output_name.clone())
            .arg("--data")
            .arg(data)
            .arg("--debug")
            .arg(self.context.debug.to_string())
            .env("CRAWLDESK_TASK_ID", self.context.task_id.as_str()))
    }

    fn set_current(&self, terminator: Option<ProcessTerminator>) {
        if let Ok(mut current) = self.current.lock() {
            *current = terminator;
        }
    }

    fn kill_current(&self) {
        let terminator = match self.current.lock() {
            Ok(mut current) => current.take(),
            Err(_) => None,
        };
        if let Some(terminator) = terminator
            && let Err(error) = terminator.terminate(ProcessTerminationMode::Immediate)
        {
            tracing::warn!(
                task_id = %self.context.task_id,
                pid = ?terminator.pid(),
                error = %error,
                "failed to kill scraper process"
            );
        }
    }

    async fn run_item(&self, item: &I) -> ItemOutcome<I::Record> {
        if self.is_closed() {
            return ItemOutcome::Fatal("worker session is closed".to_string());
        }

        let command = match self.command_for(item) {
            Ok(command) => command,
            Err(reason) => return ItemOutcome::Recoverable(reason),
        };

        let mut request = ProcessSpawnRequest::new(command).task_id(self.context.task_id.clone());
        if let Some(timeout) = self.site.item_timeout() {
            request = request.timeout(timeout);
        }

        let process = match spawn_validated(self.executor.as_ref(), request) {
            Ok(process) => process,
            Err(error) => return ItemOutcome::Fatal(error.message),
        };

        self.set_current(Some(process.terminator()));
        // close() may have run between the check above and registering the process.
        if self.is_closed() {
            self.kill_current();
        }

        let result = process.wait().await;
        self.set_current(None);

        if self.is_closed() {
            return ItemOutcome::Fatal("worker session was closed during processing".to_string());
        }

        match result {
            Ok(output) => interpret_output::<I>(&output),
            Err(error) if error.kind == CoreErrorKind::Timeout => {
                ItemOutcome::Recoverable(error.message)
            }
            Err(error) => ItemOutcome::Fatal(error.message),
        }
    }
}

impl<I: TaskItem> WorkerSession<I> for ProcessWorkerSession<I> {
    fn process<'a>(&'a self, item: &'a I) -> SessionFuture<'a, ItemOutcome<I::Record>> {
        Box::pin(self.run_item(item))
    }

    fn close(&self) -> SessionFuture<'_, ()> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            self.kill_current();
            tracing::debug!(task_id = %self.context.task_id, "closed process worker session");
        })
    }
}

fn interpret_output<I: TaskItem>(output: &ProcessOutput) -> ItemOutcome<I::Record> {
    match output.status {
        ProcessExitStatus::Terminated => {
            return ItemOutcome::Fatal("scraper process was terminated by a signal".to_string());
        }
        ProcessExitStatus::ExitCode(0) => {}
        ProcessExitStatus::ExitCode(code) => {
            let stderr = output.stderr_tail(STDERR_TAIL_CHARS);
            let reason = if stderr.is_empty() {
                format!("scraper exited with code {code}")
            } else {
                format!("scraper exited with code {code}: {stderr}")
            };
            return ItemOutcome::Recoverable(reason);
        }
    }

    let stdout = output.stdout_text();
    for line in stdout.lines().map(str::trim) {
        if let Some(payload) = line.strip_prefix(RESULT_PREFIX) {
            return match serde_json::from_str::<I::Record>(payload.trim()) {
                Ok(record) => ItemOutcome::Success(record),
                Err(error) => ItemOutcome::Recoverable(format!("malformed result record: {error}")),
            };
        }
        if let Some(reason) = line.strip_prefix(ERROR_PREFIX) {
            return ItemOutcome::Recoverable(reason.trim().to_string());
        }
    }

    ItemOutcome::Recoverable("scraper reported no result".to_string())
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::interpret_output;
    use crate::execution::{ProcessExitStatus, ProcessOutput};
    use crate::models::ItemOutcome;
    use crate::sites::OpenGoKrItem;

    fn output(status: ProcessExitStatus, stdout: &str, stderr: &str) -> ProcessOutput {
        let now = SystemTime::now();
        ProcessOutput {
            status,
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn result_line_becomes_success() {
        let out = output(
            ProcessExitStatus::ExitCode(0),
            "loading\nRESULT:{\"query\":\"q\",\"organization\":\"o\",\"title\":\"t\",\"createdAt\":\"2024-01-01\",\"fileLink\":\"\"}\n",
            "",
        );
        match interpret_output::<OpenGoKrItem>(&out) {
            ItemOutcome::Success(record) => assert_eq!(record.title, "t"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn error_line_and_bad_exit_are_recoverable() {
        let reported = output(ProcessExitStatus::ExitCode(0), "ERROR: no rows\n", "");
        assert_eq!(
            interpret_output::<OpenGoKrItem>(&reported),
            ItemOutcome::Recoverable("no rows".to_string())
        );

        let crashed = output(ProcessExitStatus::ExitCode(3), "", "selector missing\n");
        assert_eq!(
            interpret_output::<OpenGoKrItem>(&crashed),
            ItemOutcome::Recoverable("scraper exited with code 3: selector missing".to_string())
        );
    }

    #[test]
    fn signal_exit_is_fatal() {
        let killed = output(ProcessExitStatus::Terminated, "", "");
        assert!(interpret_output::<OpenGoKrItem>(&killed).is_fatal());
    }
}
