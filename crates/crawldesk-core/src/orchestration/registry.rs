use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use serde::Serialize;
use tokio::sync::Notify;

use crate::models::{
    CoreError, CoreErrorKind, NewTask, TaskId, TaskItem, TaskPatch, TaskSnapshot, TaskStatus,
};
use crate::orchestration::OrchestrationResult;
use crate::orchestration::observer::TaskObserver;
use crate::session::WorkerSession;

/// Authoritative store of all tasks. Every mutation goes through here and is
/// followed by exactly one observer notification.
pub struct TaskRegistry<I: TaskItem> {
    state: Mutex<Vec<TaskEntry<I>>>,
    observer: Arc<dyn TaskObserver<I>>,
    changed: Notify,
}

struct TaskEntry<I: TaskItem> {
    id: TaskId,
    items: Option<Vec<I>>,
    output_name: Option<String>,
    output_base_dir: Option<PathBuf>,
    scheduled_time: Option<SystemTime>,
    status: TaskStatus,
    debug: bool,
    session: Option<Arc<dyn WorkerSession<I>>>,
    /// Claimed by a runner that is still opening its session.
    launching: bool,
    /// Cancelled while launching or running, as opposed to un-scheduled.
    halted: bool,
}

impl<I: TaskItem> TaskEntry<I> {
    fn snapshot(&self) -> TaskSnapshot<I> {
        TaskSnapshot {
            id: self.id.clone(),
            items: self.items.clone(),
            output_name: self.output_name.clone(),
            output_base_dir: self.output_base_dir.clone(),
            scheduled_time: self.scheduled_time,
            status: self.status,
            debug: self.debug,
        }
    }

    fn apply(&mut self, patch: &TaskPatch<I>) {
        if let Some(items) = &patch.items {
            self.items = items.clone();
        }
        if let Some(output_name) = &patch.output_name {
            self.output_name = output_name.clone();
        }
        if let Some(output_base_dir) = &patch.output_base_dir {
            self.output_base_dir = output_base_dir.clone();
        }
        if let Some(scheduled_time) = patch.scheduled_time {
            self.scheduled_time = scheduled_time;
        }
        if let Some(debug) = patch.debug {
            self.debug = debug;
        }
    }

    fn owns(&self, session: &Arc<dyn WorkerSession<I>>) -> bool {
        self.session
            .as_ref()
            .is_some_and(|current| same_session(current, session))
    }
}

/// Per-task row of `TaskEngine::debug_info`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TaskDebugEntry {
    pub id: TaskId,
    pub status: TaskStatus,
    pub output_name: Option<String>,
    pub item_count: Option<usize>,
    pub has_session: bool,
    pub launching: bool,
    pub scheduled_time: Option<SystemTime>,
    pub output_base_dir: Option<PathBuf>,
    pub debug: bool,
}

/// Result of the registry half of a cancellation request.
pub(crate) enum CancelOutcome<I: TaskItem> {
    Missing,
    AlreadyCancelled,
    Removed,
    /// The launch claim was revoked before a session was attached.
    Interrupted,
    Detached(Arc<dyn WorkerSession<I>>),
}

impl<I: TaskItem> TaskRegistry<I> {
    pub fn new(observer: Arc<dyn TaskObserver<I>>) -> Self {
        Self {
            state: Mutex::new(Vec::new()),
            observer,
            changed: Notify::new(),
        }
    }

    pub fn add(&self, task: NewTask<I>) -> OrchestrationResult<TaskSnapshot<I>> {
        let mut tasks = self.lock_state()?;
        if tasks.iter().any(|entry| entry.id == task.id) {
            return Err(CoreError::for_task(
                &task.id,
                CoreErrorKind::DuplicateId,
                format!("task '{}' already exists", task.id),
            ));
        }

        let entry = TaskEntry {
            id: task.id,
            items: task.items,
            output_name: task.output_name,
            output_base_dir: task.output_base_dir,
            scheduled_time: task.scheduled_time,
            status: TaskStatus::Pending,
            debug: task.debug,
            session: None,
            launching: false,
            halted: false,
        };
        let snapshot = entry.snapshot();
        tasks.push(entry);
        self.notify(&tasks);
        Ok(snapshot)
    }

    pub fn get_all(&self) -> OrchestrationResult<Vec<TaskSnapshot<I>>> {
        let tasks = self.lock_state()?;
        Ok(tasks.iter().map(TaskEntry::snapshot).collect())
    }

    pub fn get(&self, task_id: &TaskId) -> OrchestrationResult<Option<TaskSnapshot<I>>> {
        let tasks = self.lock_state()?;
        Ok(find(&tasks, task_id).map(TaskEntry::snapshot))
    }

    /// Unknown ids and empty patches are silent no-ops returning `false`.
    pub fn update(&self, task_id: &TaskId, patch: &TaskPatch<I>) -> OrchestrationResult<bool> {
        if patch.is_empty() {
            return Ok(false);
        }

        let mut tasks = self.lock_state()?;
        let Some(entry) = find_mut(&mut tasks, task_id) else {
            return Ok(false);
        };
        entry.apply(patch);
        self.notify(&tasks);
        Ok(true)
    }

    /// Applies one patch to every task and notifies once.
    pub fn update_all(&self, patch: &TaskPatch<I>) -> OrchestrationResult<usize> {
        if patch.is_empty() {
            return Ok(0);
        }

        let mut tasks = self.lock_state()?;
        if tasks.is_empty() {
            return Ok(0);
        }
        for entry in tasks.iter_mut() {
            entry.apply(patch);
        }
        let updated = tasks.len();
        self.notify(&tasks);
        Ok(updated)
    }

    pub fn remove(&self, task_id: &TaskId) -> OrchestrationResult<bool> {
        Ok(self.take(task_id)?.is_some())
    }

    pub fn debug_entries(&self) -> OrchestrationResult<Vec<TaskDebugEntry>> {
        let tasks = self.lock_state()?;
        Ok(tasks
            .iter()
            .map(|entry| TaskDebugEntry {
                id: entry.id.clone(),
                status: entry.status,
                output_name: entry.output_name.clone(),
                item_count: entry.items.as_ref().map(Vec::len),
                has_session: entry.session.is_some(),
                launching: entry.launching,
                scheduled_time: entry.scheduled_time,
                output_base_dir: entry.output_base_dir.clone(),
                debug: entry.debug,
            })
            .collect())
    }

    /// Removes a task and hands back its session, if it had one.
    pub(crate) fn take(
        &self,
        task_id: &TaskId,
    ) -> OrchestrationResult<Option<Option<Arc<dyn WorkerSession<I>>>>> {
        let mut tasks = self.lock_state()?;
        let Some(position) = tasks.iter().position(|entry| &entry.id == task_id) else {
            return Ok(None);
        };
        let entry = tasks.remove(position);
        self.notify(&tasks);
        Ok(Some(entry.session))
    }

    /// Checks that a task can be armed and returns its scheduled time.
    pub(crate) fn mark_scheduled(&self, task_id: &TaskId) -> OrchestrationResult<SystemTime> {
        let mut tasks = self.lock_state()?;
        let entry = find_mut(&mut tasks, task_id).ok_or_else(|| CoreError::task_not_found(task_id))?;

        let Some(scheduled_time) = entry.scheduled_time else {
            return Err(CoreError::for_task(
                task_id,
                CoreErrorKind::MissingScheduledTime,
                format!("task '{task_id}' has no scheduled time"),
            ));
        };
        if entry.launching {
            return Err(CoreError::for_task(
                task_id,
                CoreErrorKind::InvalidState,
                format!("task '{task_id}' is starting and cannot be scheduled"),
            ));
        }
        if !entry.status.can_transition_to(TaskStatus::Scheduled) {
            return Err(invalid_task_transition(task_id, entry.status, TaskStatus::Scheduled));
        }

        entry.status = TaskStatus::Scheduled;
        entry.halted = false;
        self.notify(&tasks);
        Ok(scheduled_time)
    }

    /// Moves a task without a session to `target`. Used for precondition
    /// failures and un-scheduling; returns whether the status changed.
    pub(crate) fn set_idle_status(
        &self,
        task_id: &TaskId,
        target: TaskStatus,
    ) -> OrchestrationResult<bool> {
        let mut tasks = self.lock_state()?;
        let Some(entry) = find_mut(&mut tasks, task_id) else {
            return Ok(false);
        };
        if entry.session.is_some() || entry.launching || !entry.status.can_transition_to(target) {
            return Ok(false);
        }
        entry.status = target;
        entry.halted = false;
        self.notify(&tasks);
        Ok(true)
    }

    /// Whether a runner has claimed the task or holds its session.
    pub(crate) fn is_busy(&self, task_id: &TaskId) -> OrchestrationResult<bool> {
        let tasks = self.lock_state()?;
        Ok(find(&tasks, task_id).is_some_and(|entry| entry.launching || entry.session.is_some()))
    }

    /// Claims the task for a runner before its session is opened. Returns
    /// `false` when the task vanished or another runner owns it.
    pub(crate) fn begin_launch(&self, task_id: &TaskId) -> OrchestrationResult<bool> {
        let mut tasks = self.lock_state()?;
        let Some(entry) = find_mut(&mut tasks, task_id) else {
            return Ok(false);
        };
        if entry.launching
            || entry.session.is_some()
            || !entry.status.can_transition_to(TaskStatus::Running)
        {
            return Ok(false);
        }
        // Status is unchanged until the session attaches, so observers see nothing yet.
        entry.launching = true;
        entry.halted = false;
        Ok(true)
    }

    /// Releases a launch claim whose session could not be opened and marks
    /// the task `Failed`. Returns `false` if the claim was already revoked.
    pub(crate) fn abort_launch(&self, task_id: &TaskId) -> OrchestrationResult<bool> {
        let mut tasks = self.lock_state()?;
        let Some(entry) = find_mut(&mut tasks, task_id) else {
            return Ok(false);
        };
        if !entry.launching {
            return Ok(false);
        }
        entry.launching = false;
        entry.status = TaskStatus::Failed;
        self.notify(&tasks);
        Ok(true)
    }

    /// Hands the session to the task and marks it `Running` in one step.
    /// Returns `false` when the task vanished or its launch claim was revoked.
    pub(crate) fn attach_session(
        &self,
        task_id: &TaskId,
        session: Arc<dyn WorkerSession<I>>,
    ) -> OrchestrationResult<bool> {
        let mut tasks = self.lock_state()?;
        let Some(entry) = find_mut(&mut tasks, task_id) else {
            return Ok(false);
        };
        if !entry.launching || entry.session.is_some() {
            return Ok(false);
        }
        entry.launching = false;
        entry.status = TaskStatus::Running;
        entry.session = Some(session);
        self.notify(&tasks);
        Ok(true)
    }

    pub(crate) fn owns_session(&self, task_id: &TaskId, session: &Arc<dyn WorkerSession<I>>) -> bool {
        self.lock_state()
            .map(|tasks| find(&tasks, task_id).is_some_and(|entry| entry.owns(session)))
            .unwrap_or(false)
    }

    /// Clears the session and records the terminal status, but only if
    /// `session` is still the one attached. Returns whether it was.
    pub(crate) fn finish(
        &self,
        task_id: &TaskId,
        session: &Arc<dyn WorkerSession<I>>,
        status: TaskStatus,
    ) -> OrchestrationResult<bool> {
        let mut tasks = self.lock_state()?;
        let Some(entry) = find_mut(&mut tasks, task_id) else {
            return Ok(false);
        };
        if !entry.owns(session) {
            return Ok(false);
        }
        entry.session = None;
        entry.status = status;
        self.notify(&tasks);
        Ok(true)
    }

    pub(crate) fn cancel(&self, task_id: &TaskId) -> OrchestrationResult<CancelOutcome<I>> {
        let mut tasks = self.lock_state()?;
        let Some(position) = tasks.iter().position(|entry| &entry.id == task_id) else {
            return Ok(CancelOutcome::Missing);
        };

        let entry = &mut tasks[position];
        if let Some(session) = entry.session.take() {
            entry.status = TaskStatus::Cancelled;
            entry.halted = true;
            self.notify(&tasks);
            return Ok(CancelOutcome::Detached(session));
        }
        if entry.launching {
            entry.launching = false;
            entry.status = TaskStatus::Cancelled;
            entry.halted = true;
            self.notify(&tasks);
            return Ok(CancelOutcome::Interrupted);
        }
        if entry.halted && entry.status == TaskStatus::Cancelled {
            return Ok(CancelOutcome::AlreadyCancelled);
        }

        tasks.remove(position);
        self.notify(&tasks);
        Ok(CancelOutcome::Removed)
    }

    /// Woken after every mutation.
    pub(crate) fn changed(&self) -> &Notify {
        &self.changed
    }

    fn notify(&self, tasks: &[TaskEntry<I>]) {
        let snapshots: Vec<TaskSnapshot<I>> = tasks.iter().map(TaskEntry::snapshot).collect();
        self.observer.on_tasks_changed(&snapshots);
        self.changed.notify_waiters();
    }

    fn lock_state(&self) -> OrchestrationResult<MutexGuard<'_, Vec<TaskEntry<I>>>> {
        self.state
            .lock()
            .map_err(|_| CoreError::poisoned("task registry"))
    }
}

fn find<'a, I: TaskItem>(tasks: &'a [TaskEntry<I>], task_id: &TaskId) -> Option<&'a TaskEntry<I>> {
    tasks.iter().find(|entry| &entry.id == task_id)
}

fn find_mut<'a, I: TaskItem>(
    tasks: &'a mut [TaskEntry<I>],
    task_id: &TaskId,
) -> Option<&'a mut TaskEntry<I>> {
    tasks.iter_mut().find(|entry| &entry.id == task_id)
}

/// Identity of the session object, ignoring vtable metadata.
fn same_session<I: TaskItem>(
    left: &Arc<dyn WorkerSession<I>>,
    right: &Arc<dyn WorkerSession<I>>,
) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(left), Arc::as_ptr(right))
}

fn invalid_task_transition(task_id: &TaskId, from: TaskStatus, to: TaskStatus) -> CoreError {
    CoreError::for_task(
        task_id,
        CoreErrorKind::InvalidState,
        format!("cannot move task '{task_id}' from {from} to {to}"),
    )
}
