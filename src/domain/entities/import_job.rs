use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::entities::record::ResourceKind;

pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

pub const XLS_MIME: &str = "application/vnd.ms-excel";
pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const CSV_MIME: &str = "text/csv";
pub const ACCEPTED_MIME_TYPES: [&str; 3] = [XLS_MIME, XLSX_MIME, CSV_MIME];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub content: Vec<u8>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size: content.len() as u64,
            content,
        }
    }
}

/// Guesses the declared MIME type from a file extension.
pub fn mime_for_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("xls") => XLS_MIME,
        Some("xlsx") => XLSX_MIME,
        Some("csv") => CSV_MIME,
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TabularData {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// One source row transformed into the target record schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedRow {
    pub row_index: usize,
    pub record: BTreeMap<String, String>,
}

/// Static header -> target field table for one resource.
#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    pub resource: ResourceKind,
    pub headers: &'static [(&'static str, &'static str)],
    pub targets: &'static [&'static str],
    pub required: &'static str,
}

pub const PERSON_MAPPING: FieldMapping = FieldMapping {
    resource: ResourceKind::Person,
    headers: &[
        ("name", "name"),
        ("full name", "name"),
        ("phone", "phone"),
        ("phone number", "phone"),
        ("email", "email"),
        ("street", "street"),
        ("address", "street"),
        ("city", "city"),
        ("state", "state"),
        ("zip", "zip"),
        ("zip code", "zip"),
        ("relationship", "relationshipType"),
        ("relationship type", "relationshipType"),
        ("relationshiptype", "relationshipType"),
    ],
    targets: &[
        "name",
        "phone",
        "email",
        "street",
        "city",
        "state",
        "zip",
        "relationshipType",
    ],
    required: "name",
};

impl FieldMapping {
    pub fn target_for(&self, header: &str) -> Option<&'static str> {
        let header = header.trim().to_lowercase();
        self.headers
            .iter()
            .find(|(source, _)| *source == header)
            .map(|(_, target)| *target)
    }

    pub fn map_row(&self, columns: &[String], row: &[String]) -> BTreeMap<String, String> {
        let mut record: BTreeMap<String, String> = self
            .targets
            .iter()
            .map(|target| (target.to_string(), String::new()))
            .collect();

        for (col_idx, header) in columns.iter().enumerate() {
            let Some(target) = self.target_for(header) else {
                continue;
            };
            let value = row.get(col_idx).map(|v| v.trim()).unwrap_or("");
            let slot = record.entry(target.to_string()).or_default();
            if slot.is_empty() {
                *slot = value.to_string();
            }
        }

        record
    }

    pub fn is_valid(&self, record: &BTreeMap<String, String>) -> bool {
        record
            .get(self.required)
            .is_some_and(|value| !value.trim().is_empty())
    }

    /// Maps every row and drops the ones failing the required-field check.
    ///
    /// Returns the kept rows and the indices of the dropped ones.
    pub fn map_table(&self, data: &TabularData) -> (Vec<MappedRow>, Vec<usize>) {
        let mut kept = Vec::new();
        let mut skipped = Vec::new();
        for (row_index, row) in data.rows.iter().enumerate() {
            let record = self.map_row(&data.columns, row);
            if self.is_valid(&record) {
                kept.push(MappedRow { row_index, record });
            } else {
                skipped.push(row_index);
            }
        }
        (kept, skipped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    Success,
    Failure,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowOutcome {
    pub row_index: usize,
    pub status: RowStatus,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportProgress {
    #[serde(default)]
    pub processed: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub succeeded: u64,
    #[serde(default)]
    pub failed: u64,
    /// Subset of `failed`.
    #[serde(default)]
    pub duplicates: u64,
}

impl ImportProgress {
    pub fn is_finished(&self) -> bool {
        self.processed >= self.total
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
    Completed,
    Aborted(String),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Aborted(_))
    }

    fn name(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Aborted(_) => "aborted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("cannot {action} an import job that is {state}")]
    InvalidTransition {
        state: &'static str,
        action: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Rows are submitted one by one from this process.
    Local,
    /// The server does the row work and pushes progress.
    Remote,
}

/// One pass of a spreadsheet import.
///
/// The outcome log is append-only and its length is the cursor of the
/// next row to report; a terminal job never transitions again.
#[derive(Debug, Clone)]
pub struct ImportJob {
    file_name: String,
    mode: ImportMode,
    state: JobState,
    pending: Option<Vec<MappedRow>>,
    skipped_rows: Vec<usize>,
    outcomes: Vec<RowOutcome>,
    progress: ImportProgress,
}

impl ImportJob {
    pub fn local(
        file_name: impl Into<String>,
        rows: Vec<MappedRow>,
        skipped_rows: Vec<usize>,
    ) -> Self {
        let total = rows.len() as u64;
        Self {
            file_name: file_name.into(),
            mode: ImportMode::Local,
            state: JobState::Idle,
            pending: Some(rows),
            skipped_rows,
            outcomes: Vec::new(),
            progress: ImportProgress {
                total,
                ..ImportProgress::default()
            },
        }
    }

    pub fn remote(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            mode: ImportMode::Remote,
            state: JobState::Idle,
            pending: None,
            skipped_rows: Vec::new(),
            outcomes: Vec::new(),
            progress: ImportProgress::default(),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn mode(&self) -> ImportMode {
        self.mode
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn progress(&self) -> ImportProgress {
        self.progress
    }

    pub fn outcomes(&self) -> &[RowOutcome] {
        &self.outcomes
    }

    pub fn skipped_rows(&self) -> &[usize] {
        &self.skipped_rows
    }

    fn invalid(&self, action: &'static str) -> JobError {
        JobError::InvalidTransition {
            state: self.state.name(),
            action,
        }
    }

    /// Idle -> Running, handing out the rows to submit exactly once.
    pub fn start(&mut self) -> Result<Vec<MappedRow>, JobError> {
        if self.state != JobState::Idle {
            return Err(self.invalid("start"));
        }
        let rows = self.pending.take().unwrap_or_default();
        self.state = JobState::Running;
        if self.mode == ImportMode::Local && self.progress.total == 0 {
            self.state = JobState::Completed;
        }
        Ok(rows)
    }

    pub fn record(&mut self, outcome: RowOutcome) -> Result<(), JobError> {
        if self.state != JobState::Running || self.mode != ImportMode::Local {
            return Err(self.invalid("record a row outcome on"));
        }

        self.progress.processed += 1;
        match outcome.status {
            RowStatus::Success => self.progress.succeeded += 1,
            RowStatus::Failure => self.progress.failed += 1,
            RowStatus::Duplicate => {
                self.progress.failed += 1;
                self.progress.duplicates += 1;
            }
        }
        self.outcomes.push(outcome);

        if self.progress.is_finished() {
            self.state = JobState::Completed;
        }
        Ok(())
    }

    /// Applies a pushed progress snapshot; snapshots that would move
    /// `processed` backwards are ignored.
    pub fn observe(&mut self, snapshot: ImportProgress) -> Result<bool, JobError> {
        if self.state != JobState::Running || self.mode != ImportMode::Remote {
            return Err(self.invalid("observe progress on"));
        }
        if snapshot.processed < self.progress.processed {
            return Ok(false);
        }
        self.progress = snapshot;
        Ok(true)
    }

    pub fn complete(&mut self) -> Result<(), JobError> {
        if self.state != JobState::Running {
            return Err(self.invalid("complete"));
        }
        self.state = JobState::Completed;
        Ok(())
    }

    pub fn abort(&mut self, reason: impl Into<String>) -> Result<(), JobError> {
        if self.state.is_terminal() {
            return Err(self.invalid("abort"));
        }
        self.pending = None;
        self.state = JobState::Aborted(reason.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn mapped(row_index: usize, name: &str) -> MappedRow {
        let mut record = BTreeMap::new();
        record.insert("name".to_string(), name.to_string());
        MappedRow { row_index, record }
    }

    #[test]
    fn map_row_defaults_missing_targets_and_ignores_unknown_columns() {
        let columns = strings(&[" Name ", "Email", "Favourite Colour"]);
        let row = strings(&["Ann", "ann@example.com", "green"]);

        let record = PERSON_MAPPING.map_row(&columns, &row);

        assert_eq!(record.get("name").map(String::as_str), Some("Ann"));
        assert_eq!(record.get("email").map(String::as_str), Some("ann@example.com"));
        assert_eq!(record.get("zip").map(String::as_str), Some(""));
        assert_eq!(record.get("relationshipType").map(String::as_str), Some(""));
        assert!(!record.contains_key("Favourite Colour"));
        assert_eq!(record.len(), PERSON_MAPPING.targets.len());
    }

    #[test]
    fn map_table_drops_rows_without_required_field() {
        let data = TabularData {
            columns: strings(&["Name", "City"]),
            rows: vec![
                strings(&["Ann", "Oslo"]),
                strings(&["  ", "Rome"]),
                strings(&["Bob"]),
            ],
        };

        let (kept, skipped) = PERSON_MAPPING.map_table(&data);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].row_index, 2);
        assert_eq!(kept[1].record.get("city").map(String::as_str), Some(""));
        assert_eq!(skipped, vec![1]);
    }

    #[test]
    fn local_job_completes_after_last_row_regardless_of_failures() {
        let mut job = ImportJob::local("people.csv", vec![mapped(0, "A"), mapped(1, "B")], vec![]);
        assert_eq!(job.state(), &JobState::Idle);

        let rows = job.start().expect("job should start");
        assert_eq!(rows.len(), 2);
        assert_eq!(job.state(), &JobState::Running);

        job.record(RowOutcome {
            row_index: 0,
            status: RowStatus::Failure,
            message: Some("boom".to_string()),
        })
        .expect("record first");
        assert_eq!(job.state(), &JobState::Running);

        job.record(RowOutcome {
            row_index: 1,
            status: RowStatus::Duplicate,
            message: None,
        })
        .expect("record second");

        assert_eq!(job.state(), &JobState::Completed);
        let progress = job.progress();
        assert_eq!(progress.processed, 2);
        assert_eq!(progress.succeeded, 0);
        assert_eq!(progress.failed, 2);
        assert_eq!(progress.duplicates, 1);
    }

    #[test]
    fn terminal_job_rejects_further_transitions() {
        let mut job = ImportJob::local("people.csv", vec![mapped(0, "A")], vec![]);
        job.start().expect("job should start");
        job.abort("operator closed the import").expect("abort running job");

        assert!(job.state().is_terminal());
        assert!(job.start().is_err());
        assert!(job.abort("again").is_err());
        assert!(job
            .record(RowOutcome {
                row_index: 0,
                status: RowStatus::Success,
                message: None,
            })
            .is_err());
    }

    #[test]
    fn empty_local_job_is_completed_on_start() {
        let mut job = ImportJob::local("empty.csv", vec![], vec![0, 1]);
        let rows = job.start().expect("job should start");

        assert!(rows.is_empty());
        assert_eq!(job.state(), &JobState::Completed);
        assert_eq!(job.skipped_rows(), &[0, 1]);
    }

    #[test]
    fn remote_job_ignores_snapshots_going_backwards() {
        let mut job = ImportJob::remote("people.xlsx");
        job.start().expect("job should start");

        let ahead = ImportProgress {
            processed: 5,
            total: 10,
            succeeded: 5,
            ..ImportProgress::default()
        };
        let behind = ImportProgress {
            processed: 3,
            total: 10,
            succeeded: 3,
            ..ImportProgress::default()
        };

        assert_eq!(job.observe(ahead), Ok(true));
        assert_eq!(job.observe(behind), Ok(false));
        assert_eq!(job.progress(), ahead);
        assert_eq!(job.state(), &JobState::Running);

        job.complete().expect("complete running job");
        assert_eq!(job.state(), &JobState::Completed);
    }

    #[test]
    fn mime_is_guessed_from_extension() {
        assert_eq!(mime_for_path(Path::new("people.XLSX")), XLSX_MIME);
        assert_eq!(mime_for_path(Path::new("people.csv")), CSV_MIME);
        assert_eq!(mime_for_path(Path::new("notes.txt")), "text/plain");
    }
}
