//! School timetable (컴시간) lookups: one item per teacher.

use serde::{Deserialize, Serialize};

use crate::models::{ResultRecord, TaskItem};

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComsiganItem {
    pub region: String,
    pub school_name: String,
    pub teacher_name: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComsiganRecord {
    pub region: String,
    pub school_name: String,
    pub teacher_name: String,
    pub date: String,
    pub time: String,
    pub grade: u8,
    pub subject: String,
}

impl ResultRecord for ComsiganRecord {
    fn row(&self) -> Vec<String> {
        vec![
            self.region.clone(),
            self.school_name.clone(),
            self.teacher_name.clone(),
            self.date.clone(),
            self.time.clone(),
            self.grade.to_string(),
            self.subject.clone(),
        ]
    }
}

impl TaskItem for ComsiganItem {
    type Record = ComsiganRecord;

    fn sheet_header() -> &'static [&'static str] {
        &["지역", "학교명", "교사명", "날짜", "수업 시간", "학년", "과목"]
    }

    fn label(&self) -> String {
        format!("{}/{}/{}", self.region, self.school_name, self.teacher_name)
    }

    fn error_row(&self, reason: &str) -> Vec<String> {
        vec![
            self.region.clone(),
            self.school_name.clone(),
            self.teacher_name.clone(),
            reason.to_string(),
        ]
    }
}
