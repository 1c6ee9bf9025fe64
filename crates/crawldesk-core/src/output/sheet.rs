//! Results sheet for one task run.
//!
//! Every append rewrites the whole file. Item volumes per task are small, and
//! a crash between two items still leaves a complete, readable sheet behind.
//! The file starts with a UTF-8 byte order mark so spreadsheet viewers on a
//! Korean locale do not fall back to CP949 for the Hangul headers.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::models::{CoreError, CoreErrorKind};

pub const RESULT_COLUMN: &str = "result";
pub const SUCCESS_MARKER: &str = "OK";
pub const ERROR_MARKER: &str = "ERROR";
pub const UTF8_BOM: char = '\u{feff}';

pub trait ResultsWriter: Send + Sync {
    fn append_success_row(&self, fields: &[String]) -> Result<(), CoreError>;

    fn append_error_row(&self, fields: &[String]) -> Result<(), CoreError>;

    fn path(&self) -> &Path;
}

pub struct SheetWriter {
    path: PathBuf,
    header: Vec<String>,
    rows: Mutex<Option<Vec<Vec<String>>>>,
}

impl SheetWriter {
    pub fn new(path: impl Into<PathBuf>, header: &[&str]) -> Self {
        let mut columns = vec![RESULT_COLUMN.to_string()];
        columns.extend(header.iter().map(|column| column.to_string()));
        Self {
            path: path.into(),
            header: columns,
            rows: Mutex::new(None),
        }
    }

    fn append(&self, marker: &str, fields: &[String]) -> Result<(), CoreError> {
        let mut guard = self
            .rows
            .lock()
            .map_err(|_| CoreError::poisoned("results sheet"))?;

        if guard.is_none() {
            *guard = Some(self.load_existing()?);
        }
        let Some(rows) = guard.as_mut() else {
            return Err(CoreError::new(
                CoreErrorKind::Internal,
                "results sheet rows missing after load",
            ));
        };

        let mut row = Vec::with_capacity(fields.len() + 1);
        row.push(marker.to_string());
        row.extend(fields.iter().cloned());
        rows.push(row);

        self.save(rows)
    }

    fn load_existing(&self) -> Result<Vec<Vec<String>>, CoreError> {
        if !self.path.exists() {
            return Ok(vec![self.header.clone()]);
        }

        let text = std::fs::read_to_string(&self.path).map_err(|error| {
            storage_failure(format!(
                "failed to read results sheet '{}': {error}",
                self.path.display()
            ))
        })?;
        let rows = parse_csv(&text);
        if rows.is_empty() {
            Ok(vec![self.header.clone()])
        } else {
            Ok(rows)
        }
    }

    fn save(&self, rows: &[Vec<String>]) -> Result<(), CoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                storage_failure(format!(
                    "failed to create results folder '{}': {error}",
                    parent.display()
                ))
            })?;
        }

        let mut text = String::from(UTF8_BOM);
        for row in rows {
            let line = row
                .iter()
                .map(|field| escape_field(field))
                .collect::<Vec<_>>()
                .join(",");
            text.push_str(&line);
            text.push_str("\r\n");
        }

        let staging = self.path.with_extension("csv.partial");
        std::fs::write(&staging, text.as_bytes())
            .and_then(|()| std::fs::rename(&staging, &self.path))
            .map_err(|error| {
                storage_failure(format!(
                    "failed to save results sheet '{}': {error}",
                    self.path.display()
                ))
            })
    }
}

impl ResultsWriter for SheetWriter {
    fn append_success_row(&self, fields: &[String]) -> Result<(), CoreError> {
        self.append(SUCCESS_MARKER, fields)
    }

    fn append_error_row(&self, fields: &[String]) -> Result<(), CoreError> {
        self.append(ERROR_MARKER, fields)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

fn storage_failure(message: String) -> CoreError {
    CoreError::new(CoreErrorKind::StorageFailure, message)
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub(crate) fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let text = text.strip_prefix(UTF8_BOM).unwrap_or(text);
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match (quoted, ch) {
            (true, '"') if chars.peek() == Some(&'"') => {
                chars.next();
                field.push('"');
            }
            (true, '"') => quoted = false,
            (true, other) => field.push(other),
            (false, '"') if field.is_empty() => quoted = true,
            (false, ',') => row.push(std::mem::take(&mut field)),
            (false, '\r') => {}
            (false, '\n') => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            (false, other) => field.push(other),
        }
    }

    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }

    rows
}
