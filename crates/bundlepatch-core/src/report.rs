//! Per-entry and per-file outcomes collected into batch reports.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PatchError;

/// What happened to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Patched,
    Exported,
    Decompressed,
    Skipped,
    Failed,
}

/// What happened to one entry or object within a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOutcome {
    pub name: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EntryOutcome {
    pub fn ok(name: impl Into<String>, output: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            ok: true,
            output,
            error: None,
        }
    }

    pub fn failed(name: impl Into<String>, error: &PatchError) -> Self {
        Self {
            name: name.into(),
            ok: false,
            output: None,
            error: Some(error.to_string()),
        }
    }
}

/// Result of processing one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub status: FileStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<EntryOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
    /// File produced by the run, when it is not the input itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    /// Digest of the written image (`sha256:<hex>`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileOutcome {
    pub fn new(path: &Path, status: FileStatus) -> Self {
        Self {
            path: path.to_path_buf(),
            status,
            entries: Vec::new(),
            backup: None,
            output: None,
            output_sha256: None,
            error: None,
        }
    }

    pub fn skipped(path: &Path) -> Self {
        Self::new(path, FileStatus::Skipped)
    }

    pub fn failed(path: &Path, error: &PatchError) -> Self {
        let mut outcome = Self::new(path, FileStatus::Failed);
        outcome.error = Some(error.to_string());
        outcome
    }

    /// Entries that failed.
    pub fn failed_entries(&self) -> impl Iterator<Item = &EntryOutcome> {
        self.entries.iter().filter(|e| !e.ok)
    }
}

/// Outcomes of a batch run in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub files: Vec<FileOutcome>,
}

impl BatchReport {
    pub fn push(&mut self, outcome: FileOutcome) {
        self.files.push(outcome);
    }

    pub fn count(&self, status: FileStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
    }

    /// No file failed and no file reported a failed entry.
    pub fn is_success(&self) -> bool {
        self.files
            .iter()
            .all(|f| f.status != FileStatus::Failed && f.failed_entries().next().is_none())
    }

    pub fn file(&self, path: &Path) -> Option<&FileOutcome> {
        self.files.iter().find(|f| f.path == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_success_tracking() {
        let mut report = BatchReport::default();
        report.push(FileOutcome::new(Path::new("a"), FileStatus::Patched));
        report.push(FileOutcome::skipped(Path::new("b")));
        assert!(report.is_success());

        report.push(FileOutcome::failed(
            Path::new("c"),
            &PatchError::MissingInput {
                path: PathBuf::from("c"),
            },
        ));
        assert!(!report.is_success());
        assert_eq!(report.count(FileStatus::Failed), 1);
        assert!(report.file(Path::new("c")).unwrap().error.is_some());
    }

    #[test]
    fn test_report_json_omits_empty_fields() {
        let outcome = FileOutcome::new(Path::new("a.bundle"), FileStatus::Skipped);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "skipped");
        assert!(json.get("backup").is_none());
        assert!(json.get("entries").is_none());
    }
}
