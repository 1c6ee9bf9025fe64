use std::fmt::Debug;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A successfully scraped record, projected onto one results-sheet row.
pub trait ResultRecord: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
    fn row(&self) -> Vec<String>;
}

impl ResultRecord for Vec<String> {
    fn row(&self) -> Vec<String> {
        self.clone()
    }
}

/// One input record of a task (search query plus filters). Opaque to the
/// lifecycle engine apart from the projections below.
pub trait TaskItem: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
    type Record: ResultRecord;

    fn sheet_header() -> &'static [&'static str];

    /// Short human-readable form used in log lines.
    fn label(&self) -> String;

    fn error_row(&self, reason: &str) -> Vec<String>;
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ItemOutcome<R> {
    Success(R),
    /// Logged and written as an error row; processing continues.
    Recoverable(String),
    /// Aborts the remaining items of the task.
    Fatal(String),
}

impl<R> ItemOutcome<R> {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}
