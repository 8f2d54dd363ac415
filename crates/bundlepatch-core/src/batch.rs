//! Batch drivers over files and directories.
//!
//! Files are processed one at a time in name order. A recoverable error
//! fails that file and the batch moves on; the others end the batch.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::backup::{is_derived_file, BackupManager};
use crate::config::PatchOptions;
use crate::container::{AssetsCodec, ContainerCodec};
use crate::error::{PatchError, PatchResult};
use crate::pipeline::{PatchJob, PatchPipeline, ReplacerSource};
use crate::report::{BatchReport, FileOutcome};

/// Bytes read from the start of a file for container detection.
pub const SNIFF_LEN: usize = 64;

/// Files named by `input`: the file itself, or the regular files of a
/// directory (non-recursive, derived files excluded) sorted by name.
pub fn collect_inputs(input: &Path) -> PatchResult<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        return Err(PatchError::MissingInput {
            path: input.to_path_buf(),
        });
    }

    let read_err =
        |e: std::io::Error| PatchError::io(format!("failed to list {}", input.display()), e);
    let mut files = Vec::new();
    for entry in std::fs::read_dir(input).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if path.is_file() && !is_derived_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Whether the file at `path` starts like a container.
pub fn sniff_file(codec: &dyn ContainerCodec, path: &Path) -> PatchResult<bool> {
    let file = File::open(path)
        .map_err(|e| PatchError::io(format!("failed to open {}", path.display()), e))?;
    let mut header = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64)
        .read_to_end(&mut header)
        .map_err(|e| PatchError::io(format!("failed to read {}", path.display()), e))?;
    Ok(codec.sniff(&header))
}

/// Re-import edited entries into every container of `dir`.
///
/// Entry `E` of container `C` is replaced by `dir/C_E` (or `dir/E` with
/// `keep_original_entry_names`). Files that are not containers are skipped.
pub fn import_directory(
    codec: &dyn ContainerCodec,
    assets: &dyn AssetsCodec,
    options: &PatchOptions,
    backups: &BackupManager,
    dir: &Path,
) -> PatchResult<BatchReport> {
    if !dir.is_dir() {
        return Err(PatchError::MissingInput {
            path: dir.to_path_buf(),
        });
    }

    let mut pipeline = PatchPipeline::new(codec, assets, options, backups);
    let mut report = BatchReport::default();

    for path in collect_inputs(dir)? {
        match sniff_file(codec, &path) {
            Ok(true) => {}
            Ok(false) => {
                debug!(path = %path.display(), "not a container, skipping");
                continue;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "import failed");
                report.push(FileOutcome::failed(&path, &e));
                continue;
            }
        }

        info!(path = %path.display(), "importing into container");
        let job = PatchJob::new(&path, ReplacerSource::Directory(dir.to_path_buf()));
        match pipeline.run(job) {
            Ok(outcome) => report.push(outcome),
            Err(e) if e.is_recoverable() => {
                warn!(path = %path.display(), error = %e, "import failed");
                report.push(FileOutcome::failed(&path, &e));
            }
            Err(e) => return Err(e),
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::backup_path;
    use crate::container::OutputEntry;
    use crate::flat::FlatCodec;
    use crate::report::FileStatus;
    use std::fs;

    fn entry(name: &str, data: &[u8]) -> OutputEntry {
        OutputEntry {
            name: name.into(),
            data: data.to_vec(),
        }
    }

    #[test]
    fn test_collect_inputs_skips_derived() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.bundle", "a.bundle", "a.bundle.bak0000", "a.bundle.mod"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("sub")).unwrap();

        let files = collect_inputs(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![dir.path().join("a.bundle"), dir.path().join("b.bundle")]
        );
    }

    #[test]
    fn test_collect_inputs_missing() {
        let err = collect_inputs(Path::new("/nonexistent/input")).unwrap_err();
        assert!(matches!(err, PatchError::MissingInput { .. }));
    }

    #[test]
    fn test_import_directory() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("level0.bundle");
        fs::write(
            &bundle,
            FlatCodec
                .pack_to_vec(None, &[entry("A", &[1, 2, 3]), entry("B", &[4, 5])], true)
                .unwrap(),
        )
        .unwrap();
        fs::write(dir.path().join("level0.bundle_A"), [9u8, 9]).unwrap();
        fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

        let options = PatchOptions::default();
        let backups = BackupManager::new();
        let report =
            import_directory(&FlatCodec, &FlatCodec, &options, &backups, dir.path()).unwrap();

        assert_eq!(report.files.len(), 1);
        assert_eq!(report.files[0].status, FileStatus::Patched);
        let (_, entries) = FlatCodec.unpack(&fs::read(&bundle).unwrap()).unwrap();
        assert_eq!(entries, vec![entry("A", &[9, 9]), entry("B", &[4, 5])]);
        assert!(backup_path(&bundle, 0).exists());
    }
}
