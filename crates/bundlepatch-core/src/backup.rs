//! Numbered backups and the rename swap that puts a patched file in place.
//!
//! Derived file names are siblings of the target:
//!
//! ```text
//! level0.bundle.decomp    # decompressed temp image
//! level0.bundle.mod       # rewritten image, not yet in place
//! level0.bundle.bak0000   # first backup, then .bak0001, ...
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info};

use crate::error::{PatchError, PatchResult};

/// Number of backup slots per target (`.bak0000` to `.bak9999`).
pub const MAX_BACKUP_SLOTS: u32 = 10_000;

/// Suffix of the decompressed temp image.
pub const DECOMP_SUFFIX: &str = ".decomp";

/// Suffix of the rewritten image before the swap.
pub const MOD_SUFFIX: &str = ".mod";

/// `path` with `suffix` appended to its final component.
pub fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Backup path for slot `index`.
pub fn backup_path(target: &Path, index: u32) -> PathBuf {
    sibling_path(target, &format!(".bak{index:04}"))
}

/// Whether `path` is a derived file (`.decomp`, `.mod` or `.bakNNNN`).
///
/// Batch drivers skip these; a backup still sniffs as a container.
pub fn is_derived_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.ends_with(DECOMP_SUFFIX) || name.ends_with(MOD_SUFFIX) {
        return true;
    }
    match name.rsplit_once(".bak") {
        Some((stem, index)) => {
            !stem.is_empty() && index.len() == 4 && index.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

/// Lowest free backup slot for `target`.
///
/// Fails with [`PatchError::BackupExhausted`] when all slots exist; callers
/// must not touch the target in that case.
pub fn next_backup_path(target: &Path) -> PatchResult<PathBuf> {
    next_free_slot(target, |_| false)
}

fn next_free_slot(target: &Path, reserved: impl Fn(&Path) -> bool) -> PatchResult<PathBuf> {
    (0..MAX_BACKUP_SLOTS)
        .map(|i| backup_path(target, i))
        .find(|candidate| !candidate.exists() && !reserved(candidate))
        .ok_or_else(|| PatchError::BackupExhausted {
            path: target.to_path_buf(),
        })
}

/// Move `original` to `backup`, then `replacement` to `original`.
///
/// The first failure leaves everything as it was. A failure of the second
/// rename is reported as [`PatchError::PartialSwap`]; the original content
/// is then only at `backup`.
pub fn atomic_swap(original: &Path, replacement: &Path, backup: &Path) -> PatchResult<()> {
    std::fs::rename(original, backup).map_err(|e| {
        PatchError::io(
            format!(
                "failed to move {} to {}",
                original.display(),
                backup.display()
            ),
            e,
        )
    })?;

    std::fs::rename(replacement, original).map_err(|e| PatchError::PartialSwap {
        original: original.to_path_buf(),
        backup: backup.to_path_buf(),
        message: e.to_string(),
    })?;

    info!(
        target = %original.display(),
        backup = %backup.display(),
        "swapped patched file into place"
    );
    Ok(())
}

/// Serializes backup slot selection across concurrent patch runs.
///
/// A slot handed out by [`BackupManager::reserve`] is skipped by other
/// reservations until the returned [`BackupSlot`] is dropped, by which time
/// the swap has created the backup file.
#[derive(Debug, Default)]
pub struct BackupManager {
    reserved: Mutex<HashSet<PathBuf>>,
}

impl BackupManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick and hold the lowest free backup slot for `target`.
    pub fn reserve(&self, target: &Path) -> PatchResult<BackupSlot<'_>> {
        let mut reserved = self.reserved.lock().map_err(|_| PatchError::Config {
            message: "backup reservation table poisoned".to_string(),
        })?;
        let path = next_free_slot(target, |p| reserved.contains(p))?;
        reserved.insert(path.clone());
        debug!(target = %target.display(), backup = %path.display(), "reserved backup slot");

        Ok(BackupSlot {
            manager: self,
            path,
        })
    }

    fn release(&self, path: &Path) {
        if let Ok(mut reserved) = self.reserved.lock() {
            reserved.remove(path);
        }
    }
}

/// A reserved backup path.
#[derive(Debug)]
pub struct BackupSlot<'a> {
    manager: &'a BackupManager,
    path: PathBuf,
}

impl BackupSlot<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Swap `replacement` into `original`, moving the original to this slot.
    pub fn swap(&self, original: &Path, replacement: &Path) -> PatchResult<()> {
        atomic_swap(original, replacement, &self.path)
    }
}

impl Drop for BackupSlot<'_> {
    fn drop(&mut self) {
        self.manager.release(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_backup_path_is_zero_padded() {
        let target = Path::new("/data/level0.bundle");
        assert_eq!(
            backup_path(target, 7),
            PathBuf::from("/data/level0.bundle.bak0007")
        );
        assert_eq!(
            backup_path(target, 9999),
            PathBuf::from("/data/level0.bundle.bak9999")
        );
        assert_eq!(
            sibling_path(target, DECOMP_SUFFIX),
            PathBuf::from("/data/level0.bundle.decomp")
        );
    }

    #[test]
    fn test_derived_files() {
        assert!(is_derived_file(Path::new("d/level0.bundle.decomp")));
        assert!(is_derived_file(Path::new("d/level0.bundle.mod")));
        assert!(is_derived_file(Path::new("d/level0.bundle.bak0042")));
        assert!(!is_derived_file(Path::new("d/level0.bundle")));
        assert!(!is_derived_file(Path::new("d/level0.bundle.bak42")));
        assert!(!is_derived_file(Path::new("d/level0.bundle_CAB-a")));
    }

    #[test]
    fn test_next_backup_skips_existing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("level0.bundle");
        fs::write(&target, b"orig").unwrap();
        for i in 0..4 {
            fs::write(backup_path(&target, i), b"old").unwrap();
        }

        assert_eq!(next_backup_path(&target).unwrap(), backup_path(&target, 4));
    }

    #[test]
    fn test_next_backup_takes_first_gap() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("level0.bundle");
        fs::write(backup_path(&target, 0), b"old").unwrap();
        fs::write(backup_path(&target, 2), b"old").unwrap();

        assert_eq!(next_backup_path(&target).unwrap(), backup_path(&target, 1));
    }

    #[test]
    fn test_reservations_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("level0.bundle");
        let manager = BackupManager::new();

        let first = manager.reserve(&target).unwrap();
        let second = manager.reserve(&target).unwrap();
        assert_eq!(first.path(), backup_path(&target, 0));
        assert_eq!(second.path(), backup_path(&target, 1));

        drop(first);
        let third = manager.reserve(&target).unwrap();
        assert_eq!(third.path(), backup_path(&target, 0));
    }

    #[test]
    fn test_swap_moves_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("level0.bundle");
        let modded = sibling_path(&target, MOD_SUFFIX);
        let backup = backup_path(&target, 0);
        fs::write(&target, b"orig").unwrap();
        fs::write(&modded, b"new").unwrap();

        atomic_swap(&target, &modded, &backup).unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"new");
        assert_eq!(fs::read(&backup).unwrap(), b"orig");
        assert!(!modded.exists());
    }

    #[test]
    fn test_swap_missing_replacement_is_partial() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("level0.bundle");
        let backup = backup_path(&target, 0);
        fs::write(&target, b"orig").unwrap();

        let err = atomic_swap(&target, &dir.path().join("nope.mod"), &backup).unwrap_err();

        assert!(matches!(err, PatchError::PartialSwap { .. }));
        assert_eq!(fs::read(&backup).unwrap(), b"orig");
    }

    #[test]
    fn test_swap_missing_original_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("level0.bundle");
        let modded = sibling_path(&target, MOD_SUFFIX);
        fs::write(&modded, b"new").unwrap();

        let err = atomic_swap(&target, &modded, &backup_path(&target, 0)).unwrap_err();

        assert!(matches!(err, PatchError::Io { .. }));
        assert!(modded.exists());
    }
}
