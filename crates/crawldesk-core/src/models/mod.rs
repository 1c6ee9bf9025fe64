pub mod error;
pub mod item;
pub mod task;

pub use error::{CoreError, CoreErrorKind};
pub use item::{ItemOutcome, ResultRecord, TaskItem};
pub use task::{NewTask, TaskId, TaskPatch, TaskSnapshot, TaskStatus};
