use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use time::OffsetDateTime;
use time::macros::format_description;

use crate::models::{CoreError, CoreErrorKind, TaskId};

const END_MARKER: &str = "\n종료\n";

/// Per-task human-readable log, `<folder>/YYYY_MM_DD_logs.txt`, opened in
/// append mode. Every line is also emitted through `tracing`.
pub struct TaskLog {
    task_id: TaskId,
    path: Option<PathBuf>,
    file: Mutex<Option<File>>,
}

impl TaskLog {
    pub fn open(task_id: &TaskId, folder: &Path) -> Result<Self, CoreError> {
        let path = folder.join(log_file_name(local_now()));
        std::fs::create_dir_all(folder)
            .and_then(|()| OpenOptions::new().create(true).append(true).open(&path))
            .map(|file| Self {
                task_id: task_id.clone(),
                path: Some(path.clone()),
                file: Mutex::new(Some(file)),
            })
            .map_err(|error| {
                CoreError::for_task(
                    task_id,
                    CoreErrorKind::StorageFailure,
                    format!("failed to open task log '{}': {error}", path.display()),
                )
            })
    }

    /// Log with no backing file. Used when no output folder exists yet.
    pub fn detached(task_id: &TaskId) -> Self {
        Self {
            task_id: task_id.clone(),
            path: None,
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn append(&self, message: &str) {
        tracing::info!(task_id = %self.task_id, "{message}");
        self.write_raw(&format_line(local_now(), message));
    }

    pub fn append_error(&self, message: &str, error: &dyn std::fmt::Display) {
        tracing::warn!(task_id = %self.task_id, error = %error, "{message}");
        self.write_raw(&format_line(local_now(), &format!("{message}\n{error}")));
    }

    /// Writes the end marker and releases the file. Later appends only reach `tracing`.
    pub fn close(&self) {
        self.write_raw(END_MARKER);
        if let Ok(mut guard) = self.file.lock() {
            guard.take();
        }
    }

    fn write_raw(&self, text: &str) {
        let Ok(mut guard) = self.file.lock() else {
            return;
        };
        let Some(file) = guard.as_mut() else {
            return;
        };
        if let Err(error) = file.write_all(text.as_bytes()) {
            tracing::warn!(
                task_id = %self.task_id,
                error = %error,
                "failed to write task log line; dropping log file"
            );
            guard.take();
        }
    }
}

fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn log_file_name(now: OffsetDateTime) -> String {
    let format = format_description!("[year]_[month]_[day]_logs.txt");
    now.format(format)
        .unwrap_or_else(|_| "logs.txt".to_string())
}

fn format_line(now: OffsetDateTime, message: &str) -> String {
    let format = format_description!("[hour]:[minute]:[second]");
    let clock = now.format(format).unwrap_or_default();
    format!("[{clock}]: {message}\n")
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::{format_line, log_file_name};

    #[test]
    fn file_name_is_zero_padded_date() {
        let now = datetime!(2024-03-07 09:05:01 UTC);
        assert_eq!(log_file_name(now), "2024_03_07_logs.txt");
    }

    #[test]
    fn line_has_clock_prefix() {
        let now = datetime!(2024-03-07 09:05:01 UTC);
        assert_eq!(format_line(now, "작업 시작"), "[09:05:01]: 작업 시작\n");
    }
}
