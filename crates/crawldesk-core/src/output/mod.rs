pub mod layout;
pub mod reveal;
pub mod sheet;
pub mod task_log;

pub use layout::OutputLayout;
pub use reveal::{NoopRevealer, OutputRevealer, SystemRevealer};
pub use sheet::{ResultsWriter, SheetWriter, UTF8_BOM};
pub use task_log::TaskLog;
