use crate::models::TaskId;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    TaskNotFound,
    DuplicateId,
    MissingScheduledTime,
    MissingDestination,
    MissingInput,
    InvalidState,
    InvalidInput,
    SessionFailure,
    ProcessFailure,
    ParseFailure,
    StorageFailure,
    Timeout,
    Cancelled,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub task: Option<TaskId>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            task: None,
            kind,
            message: message.into(),
        }
    }

    pub fn for_task(task: &TaskId, kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            task: Some(task.clone()),
            kind,
            message: message.into(),
        }
    }

    pub fn task_not_found(task: &TaskId) -> Self {
        Self::for_task(
            task,
            CoreErrorKind::TaskNotFound,
            format!("unknown task id '{task}'"),
        )
    }

    pub fn poisoned(what: &str) -> Self {
        Self::new(CoreErrorKind::Internal, format!("{what} mutex poisoned"))
    }
}
