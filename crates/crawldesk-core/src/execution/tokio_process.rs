use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::io::AsyncReadExt;
use tokio::sync::Notify;

use crate::execution::{
    ExecutionResult, ProcessExecutor, ProcessExitStatus, ProcessOutput, ProcessSpawnRequest,
    ProcessTerminationMode, ProcessTerminator, ProcessWaitFuture, RunningProcess,
};
use crate::models::{CoreError, CoreErrorKind, TaskId};

pub struct TokioProcessExecutor;

impl ProcessExecutor for TokioProcessExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>> {
        let mut cmd = tokio::process::Command::new(&request.command.program);
        cmd.args(&request.command.args);

        for (key, value) in &request.command.env {
            cmd.env(key, value);
        }

        if let Some(dir) = &request.command.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|error| {
            process_failure(
                request.task_id.as_ref(),
                format!(
                    "failed to spawn '{}': {error}",
                    request.command.program.display()
                ),
            )
        })?;

        let pid = child.id();
        let started_at = SystemTime::now();

        Ok(Box::new(TokioRunningProcess {
            child: Mutex::new(Some(child)),
            pid,
            started_at,
            timeout: request.timeout,
            task_id: request.task_id,
            kill_requested: Arc::new(Notify::new()),
        }))
    }
}

struct TokioRunningProcess {
    child: Mutex<Option<tokio::process::Child>>,
    pid: Option<u32>,
    started_at: SystemTime,
    timeout: Option<Duration>,
    task_id: Option<TaskId>,
    kill_requested: Arc<Notify>,
}

impl RunningProcess for TokioRunningProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn terminator(&self) -> ProcessTerminator {
        ProcessTerminator::new(self.pid, self.task_id.clone(), self.kill_requested.clone())
    }

    fn wait(self: Box<Self>) -> ProcessWaitFuture {
        let child = self.child.into_inner().ok().flatten();
        let timeout = self.timeout;
        let started_at = self.started_at;
        let task_id = self.task_id;
        let pid = self.pid;
        let kill_requested = self.kill_requested;

        Box::pin(async move {
            let mut child = child.ok_or_else(|| {
                process_failure(task_id.as_ref(), "child process already consumed".to_string())
            })?;

            let stdout_reader = {
                let mut stdout = child.stdout.take();
                tokio::spawn(async move {
                    let mut buffer = Vec::new();
                    if let Some(mut handle) = stdout.take() {
                        let _ = handle.read_to_end(&mut buffer).await;
                    }
                    buffer
                })
            };
            let stderr_reader = {
                let mut stderr = child.stderr.take();
                tokio::spawn(async move {
                    let mut buffer = Vec::new();
                    if let Some(mut handle) = stderr.take() {
                        let _ = handle.read_to_end(&mut buffer).await;
                    }
                    buffer
                })
            };

            let wait_err = |error: std::io::Error| {
                process_failure(
                    task_id.as_ref(),
                    format!("failed to wait for process: {error}"),
                )
            };

            let exit = async {
                tokio::select! {
                    result = child.wait() => result,
                    _ = kill_requested.notified() => {
                        #[cfg(not(unix))]
                        let _ = child.start_kill();
                        child.wait().await
                    }
                }
            };

            // Wait for process exit first, then collect output with a short bounded read window.
            // Descendants (browser helpers) may keep the pipes open after the script exits.
            let status = if let Some(timeout_duration) = timeout {
                match tokio::time::timeout(timeout_duration, exit).await {
                    Ok(result) => result.map_err(wait_err)?,
                    Err(_) => {
                        let _ = signal_process_group(
                            pid,
                            task_id.as_ref(),
                            ProcessTerminationMode::Immediate,
                        );
                        let _ = child.start_kill();
                        let _ = tokio::time::timeout(Duration::from_secs(1), child.wait()).await;
                        stdout_reader.abort();
                        stderr_reader.abort();
                        return Err(CoreError {
                            task: task_id,
                            kind: CoreErrorKind::Timeout,
                            message: format!(
                                "process timed out after {}ms",
                                timeout_duration.as_millis()
                            ),
                        });
                    }
                }
            } else {
                exit.await.map_err(wait_err)?
            };

            let read_deadline = Duration::from_millis(250);
            let stdout = match tokio::time::timeout(read_deadline, stdout_reader).await {
                Ok(Ok(buffer)) => buffer,
                _ => Vec::new(),
            };
            let stderr = match tokio::time::timeout(read_deadline, stderr_reader).await {
                Ok(Ok(buffer)) => buffer,
                _ => Vec::new(),
            };

            let finished_at = SystemTime::now();

            let status = match status.code() {
                Some(code) => ProcessExitStatus::ExitCode(code),
                None => ProcessExitStatus::Terminated,
            };

            Ok(ProcessOutput {
                status,
                stdout,
                stderr,
                started_at,
                finished_at,
            })
        })
    }
}

/// Signals the whole process group so browser children die with the script.
#[cfg(unix)]
pub(crate) fn signal_process_group(
    pid: Option<u32>,
    task_id: Option<&TaskId>,
    mode: ProcessTerminationMode,
) -> ExecutionResult<()> {
    let Some(pid) = pid else {
        return Ok(());
    };

    let signal = match mode {
        ProcessTerminationMode::Immediate => libc::SIGKILL,
        ProcessTerminationMode::Graceful { .. } => libc::SIGTERM,
    };

    let pgid = -(pid as libc::pid_t);
    let result = unsafe { libc::kill(pgid, signal) };

    if result != 0 {
        let os_error = std::io::Error::last_os_error();
        if os_error.raw_os_error() != Some(libc::ESRCH) {
            return Err(process_failure(
                task_id,
                format!("failed to send signal {signal} to process group {pid}: {os_error}"),
            ));
        }
    }

    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn signal_process_group(
    _pid: Option<u32>,
    _task_id: Option<&TaskId>,
    _mode: ProcessTerminationMode,
) -> ExecutionResult<()> {
    Ok(())
}

fn process_failure(task_id: Option<&TaskId>, message: String) -> CoreError {
    CoreError {
        task: task_id.cloned(),
        kind: CoreErrorKind::ProcessFailure,
        message,
    }
}
