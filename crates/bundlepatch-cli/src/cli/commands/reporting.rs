//! Human and JSON rendering of run reports.

use bundlepatch_core::{BatchReport, FileOutcome, FileStatus};

use crate::cli::args::ReportArgs;
use crate::exit_codes;

/// Print `report` and return the exit code for it.
pub fn finish(report: &BatchReport, output: &ReportArgs) -> anyhow::Result<i32> {
    if output.json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        for file in &report.files {
            eprintln!("{}", summary_line(file));
            for entry in file.failed_entries() {
                eprintln!(
                    "  failed {}: {}",
                    entry.name,
                    entry.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        eprintln!(
            "{} patched, {} exported, {} decompressed, {} skipped, {} failed",
            report.count(FileStatus::Patched),
            report.count(FileStatus::Exported),
            report.count(FileStatus::Decompressed),
            report.count(FileStatus::Skipped),
            report.count(FileStatus::Failed),
        );
    }
    Ok(exit_codes::for_report(report))
}

fn summary_line(file: &FileOutcome) -> String {
    let path = file.path.display();
    match file.status {
        FileStatus::Patched => match &file.backup {
            Some(backup) => format!("patched {path} (backup {})", backup.display()),
            None => format!("patched {path}"),
        },
        FileStatus::Exported => format!("exported {path} ({} outputs)", file.entries.len()),
        FileStatus::Decompressed => match &file.output {
            Some(out) => format!("decompressed {path} -> {}", out.display()),
            None => format!("decompressed {path}"),
        },
        FileStatus::Skipped => format!("skipped {path}"),
        FileStatus::Failed => format!(
            "failed {path}: {}",
            file.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    #[test]
    fn test_summary_line_names_backup() {
        let mut outcome = FileOutcome::new(Path::new("a.bundle"), FileStatus::Patched);
        outcome.backup = Some(PathBuf::from("a.bundle.bak0002"));
        assert_eq!(
            summary_line(&outcome),
            "patched a.bundle (backup a.bundle.bak0002)"
        );
    }
}
