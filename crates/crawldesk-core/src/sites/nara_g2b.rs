//! Public-procurement marketplace (나라장터) search items.

use serde::{Deserialize, Serialize};

use crate::models::{ResultRecord, TaskItem};
use crate::sites::or_empty;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NaraG2bItem {
    pub query: String,
    pub start_date: String,
    pub end_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NaraG2bRecord {
    pub query: String,
    pub organization: String,
    pub title: String,
    pub created_at: String,
    pub file_link: String,
}

impl ResultRecord for NaraG2bRecord {
    fn row(&self) -> Vec<String> {
        vec![
            self.query.clone(),
            self.organization.clone(),
            self.title.clone(),
            self.created_at.clone(),
            self.file_link.clone(),
        ]
    }
}

impl TaskItem for NaraG2bItem {
    type Record = NaraG2bRecord;

    fn sheet_header() -> &'static [&'static str] {
        &["검색어", "기관명", "정보제목", "사업일자", "파일링크"]
    }

    fn label(&self) -> String {
        match &self.organization {
            Some(organization) => format!(
                "{} @ {organization} ({}..{})",
                self.query, self.start_date, self.end_date
            ),
            None => format!("{} ({}..{})", self.query, self.start_date, self.end_date),
        }
    }

    /// No notice was read, so the title cell stays blank and the reason
    /// lands in the date column.
    fn error_row(&self, reason: &str) -> Vec<String> {
        vec![
            self.query.clone(),
            or_empty(&self.organization),
            String::new(),
            reason.to_string(),
            String::new(),
        ]
    }
}
