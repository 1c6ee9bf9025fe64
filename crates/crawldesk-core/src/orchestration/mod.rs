pub mod clock;
pub mod engine;
pub mod observer;
pub mod registry;
pub mod runner;
pub mod scheduler;

pub use clock::{Clock, SystemClock, TimerCallback, TimerDriver, TimerFuture, TimerHandle, TokioTimerDriver};
pub use engine::{EngineDebugInfo, TaskEngine, TaskEngineBuilder};
pub use observer::{BroadcastObserver, NoopObserver, SnapshotBatch, TaskObserver};
pub use registry::{TaskDebugEntry, TaskRegistry};
pub use runner::TaskRunner;
pub use scheduler::Scheduler;

use crate::models::CoreError;

pub type OrchestrationResult<T> = Result<T, CoreError>;
