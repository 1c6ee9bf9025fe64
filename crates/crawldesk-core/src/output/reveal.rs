use std::path::Path;
use std::sync::Arc;

use crate::execution::{
    CommandSpec, ProcessExecutor, ProcessExitStatus, ProcessSpawnRequest, TokioProcessExecutor,
    spawn_validated,
};

/// Shows a finished task's output folder to the operator.
pub trait OutputRevealer: Send + Sync {
    fn reveal(&self, folder: &Path);
}

pub struct NoopRevealer;

impl OutputRevealer for NoopRevealer {
    fn reveal(&self, _folder: &Path) {}
}

/// Opens the folder with the platform file manager. Fire and forget: the
/// opener is awaited on a background task and failures are only logged.
pub struct SystemRevealer {
    executor: Arc<dyn ProcessExecutor>,
}

impl SystemRevealer {
    pub fn new() -> Self {
        Self::with_executor(Arc::new(TokioProcessExecutor))
    }

    pub fn with_executor(executor: Arc<dyn ProcessExecutor>) -> Self {
        Self { executor }
    }
}

impl Default for SystemRevealer {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputRevealer for SystemRevealer {
    fn reveal(&self, folder: &Path) {
        let command = CommandSpec::new(opener_program()).arg(folder.to_string_lossy());
        let process = match spawn_validated(self.executor.as_ref(), ProcessSpawnRequest::new(command))
        {
            Ok(process) => process,
            Err(error) => {
                tracing::warn!(
                    folder = %folder.display(),
                    error = %error,
                    "failed to open output folder"
                );
                return;
            }
        };

        let folder = folder.to_path_buf();
        tokio::spawn(async move {
            match process.wait().await {
                Ok(output) if output.status == ProcessExitStatus::ExitCode(0) => {}
                Ok(output) => tracing::warn!(
                    folder = %folder.display(),
                    status = ?output.status,
                    stderr = %output.stderr_tail(200),
                    "folder opener exited unsuccessfully"
                ),
                Err(error) => tracing::warn!(
                    folder = %folder.display(),
                    error = %error,
                    "folder opener failed"
                ),
            }
        });
    }
}

fn opener_program() -> &'static str {
    if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(windows) {
        "explorer"
    } else {
        "xdg-open"
    }
}
