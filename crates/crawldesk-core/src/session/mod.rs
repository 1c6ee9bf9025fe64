//! Worker session contracts.
//!
//! A session owns the automation resource for exactly one task run. The
//! runner drives `process` sequentially; a cancellation path may call `close`
//! at any time, including while `process` is in flight.

pub mod process_session;

pub use process_session::{ProcessSessionFactory, ProcessWorkerSession};

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use crate::models::{ItemOutcome, TaskId, TaskItem};
use crate::orchestration::OrchestrationResult;

pub type SessionFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a session needs to know about the task it serves.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionContext {
    pub task_id: TaskId,
    pub output_base_dir: PathBuf,
    pub output_name: String,
    pub output_folder: PathBuf,
    pub debug: bool,
}

pub trait WorkerSession<I: TaskItem>: Send + Sync {
    fn process<'a>(&'a self, item: &'a I) -> SessionFuture<'a, ItemOutcome<I::Record>>;

    /// Idempotent. Must tear the automation resource down even while an item
    /// is being processed.
    fn close(&self) -> SessionFuture<'_, ()>;
}

pub trait WorkerSessionFactory<I: TaskItem>: Send + Sync {
    /// Launches the automation resource. An error here fails the task.
    fn open(
        &self,
        context: SessionContext,
    ) -> SessionFuture<'_, OrchestrationResult<Arc<dyn WorkerSession<I>>>>;
}
