pub mod config;
pub mod execution;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod output;
pub mod session;
pub mod sites;

pub use config::EngineConfig;
pub use models::{CoreError, CoreErrorKind, NewTask, TaskId, TaskPatch, TaskSnapshot, TaskStatus};
pub use orchestration::{OrchestrationResult, TaskEngine};
