//! Open-data portal (정보공개포털) document searches.

use serde::{Deserialize, Serialize};

use crate::models::{ResultRecord, TaskItem};

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenGoKrItem {
    pub query: String,
    pub organization: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenGoKrRecord {
    pub query: String,
    pub organization: String,
    pub title: String,
    pub created_at: String,
    pub file_link: String,
}

impl ResultRecord for OpenGoKrRecord {
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

impl TaskItem for OpenGoKrItem {
    type Record = OpenGoKrRecord;

    fn sheet_header() -> &'static [&'static str] {
        &["검색어", "기관명", "정보제목", "사업일자", "파일링크"]
    }

    fn label(&self) -> String {
        format!("{} @ {}", self.query, self.organization)
    }

    fn error_row(&self, reason: &str) -> Vec<String> {
        vec![
            self.query.clone(),
            self.organization.clone(),
            String::new(),
            reason.to_string(),
        ]
    }
}
