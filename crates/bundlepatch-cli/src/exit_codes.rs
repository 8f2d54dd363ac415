//! Process exit codes.
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Success |
//! | 1 | Missing input, bad configuration or bad package |
//! | 2 | Usage error (reported by the argument parser) |
//! | 3 | Backup slots exhausted, nothing was touched |
//! | 4 | Swap failed halfway, original is at the reported backup path |
//! | 5 | Container or content error |
//! | 6 | Filesystem error |
//! | 7 | Batch finished but some files or entries failed |

use bundlepatch_core::{BatchReport, PatchError};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_INPUT_ERROR: i32 = 1;
pub const EXIT_BATCH_FAILURES: i32 = 7;

/// Exit code for a fatal error.
pub fn for_error(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<PatchError>()
        .map_or(EXIT_INPUT_ERROR, PatchError::exit_code)
}

/// Exit code for a completed batch.
pub fn for_report(report: &BatchReport) -> i32 {
    if report.is_success() {
        EXIT_SUCCESS
    } else {
        EXIT_BATCH_FAILURES
    }
}
