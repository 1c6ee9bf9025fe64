use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Nothing ever returns to `Pending`. Completion only happens to a running
    /// task; cancellation to a running or un-scheduled one.
    pub fn can_transition_to(self, target: TaskStatus) -> bool {
        match target {
            Self::Pending => false,
            Self::Scheduled | Self::Running => self != Self::Running,
            Self::Failed => true,
            Self::Completed => self == Self::Running,
            Self::Cancelled => matches!(self, Self::Running | Self::Scheduled),
        }
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.pad(label)
    }
}

/// Insert payload for `TaskEngine::add_task`. A new task always starts out
/// `Pending`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewTask<I> {
    pub id: TaskId,
    pub items: Option<Vec<I>>,
    pub output_name: Option<String>,
    pub output_base_dir: Option<PathBuf>,
    pub scheduled_time: Option<SystemTime>,
    #[serde(default)]
    pub debug: bool,
}

impl<I> NewTask<I> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(id),
            items: None,
            output_name: None,
            output_base_dir: None,
            scheduled_time: None,
            debug: false,
        }
    }

    pub fn items(mut self, items: Vec<I>) -> Self {
        self.items = Some(items);
        self
    }

    pub fn output(mut self, base_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        self.output_base_dir = Some(base_dir.into());
        self.output_name = Some(name.into());
        self
    }

    pub fn scheduled_at(mut self, at: SystemTime) -> Self {
        self.scheduled_time = Some(at);
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Observer-facing view of a task. The live worker session is never part of it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot<I> {
    pub id: TaskId,
    pub items: Option<Vec<I>>,
    pub output_name: Option<String>,
    pub output_base_dir: Option<PathBuf>,
    pub scheduled_time: Option<SystemTime>,
    pub status: TaskStatus,
    pub debug: bool,
}

/// Partial update of the caller-editable task fields. The outer `Option` says
/// whether a field is touched, the inner one allows clearing it.
#[derive(Clone, Debug)]
pub struct TaskPatch<I> {
    pub items: Option<Option<Vec<I>>>,
    pub output_name: Option<Option<String>>,
    pub output_base_dir: Option<Option<PathBuf>>,
    pub scheduled_time: Option<Option<SystemTime>>,
    pub debug: Option<bool>,
}

impl<I> Default for TaskPatch<I> {
    fn default() -> Self {
        Self {
            items: None,
            output_name: None,
            output_base_dir: None,
            scheduled_time: None,
            debug: None,
        }
    }
}

impl<I> TaskPatch<I> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(mut self, items: Option<Vec<I>>) -> Self {
        self.items = Some(items);
        self
    }

    pub fn output_name(mut self, name: Option<String>) -> Self {
        self.output_name = Some(name);
        self
    }

    pub fn output_base_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.output_base_dir = Some(dir);
        self
    }

    pub fn scheduled_time(mut self, at: Option<SystemTime>) -> Self {
        self.scheduled_time = Some(at);
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_none()
            && self.output_name.is_none()
            && self.output_base_dir.is_none()
            && self.scheduled_time.is_none()
            && self.debug.is_none()
    }
}
