//! Installer packages: pre-built replacers for several files, applied in one go.
//!
//! A package is a JSON document:
//!
//! ```json
//! {
//!   "name": "Bigger bosses",
//!   "creators": "someone",
//!   "description": "Doubles boss health",
//!   "affectedFiles": [
//!     { "path": "data/level0.bundle", "isBundle": true,
//!       "replacers": [ { "kind": "bytes", "original": "CAB-a", "data": "AQID" } ] },
//!     { "path": "data/sharedassets0.assets", "isBundle": false,
//!       "replacers": [ { "kind": "remove", "path_id": 12 } ] }
//!   ]
//! }
//! ```
//!
//! Byte payloads are base64. Paths are relative to the root the package is
//! applied to.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backup::BackupManager;
use crate::config::PatchOptions;
use crate::container::{AssetsCodec, ContainerCodec, TypeDefinition};
use crate::error::{PatchError, PatchResult};
use crate::pipeline::{PatchJob, PatchPipeline, ReplacerSource};
use crate::replacer::{base64_bytes, AssetReplacer, ContainerSlice, PendingReplacer, Replacer};
use crate::report::{BatchReport, FileOutcome};

/// Parsed installer package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallerPackage {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub creators: String,
    #[serde(default)]
    pub description: String,
    pub affected_files: Vec<AffectedFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added_types: Vec<TypeDefinition>,
}

/// One file touched by a package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedFile {
    pub path: PathBuf,
    /// Container (`true`) or leaf structured file (`false`).
    pub is_bundle: bool,
    #[serde(default)]
    pub replacers: Vec<ReplacerSpec>,
}

/// Replacer descriptor as written in a package.
///
/// Containers take `bytes`, `container_slice` and `delete`; leaf files take
/// `replace` and `remove`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplacerSpec {
    Bytes {
        original: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new: Option<String>,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    ContainerSlice {
        original: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        assets: Vec<AssetReplacer>,
    },
    Delete {
        original: String,
    },
    Replace {
        path_id: i64,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    Remove {
        path_id: i64,
    },
}

impl ReplacerSpec {
    /// Container-level replacer; slices stay unbound until the container is open.
    pub fn into_pending(self) -> PatchResult<PendingReplacer> {
        match self {
            Self::Bytes {
                original,
                new,
                data,
            } => Ok(PendingReplacer::Ready(Replacer::FromExternalBytes {
                new_name: new.unwrap_or_else(|| original.clone()),
                original_name: original,
                data,
            })),
            Self::ContainerSlice {
                original,
                new,
                assets,
            } => {
                let new = new.unwrap_or_else(|| original.clone());
                Ok(PendingReplacer::Slice(
                    ContainerSlice::new(original, new).with_assets(assets),
                ))
            }
            Self::Delete { original } => Ok(PendingReplacer::Ready(Replacer::delete(original))),
            Self::Replace { path_id, .. } | Self::Remove { path_id } => Err(PatchError::Package {
                message: format!("asset replacer for object {path_id} in a container file"),
            }),
        }
    }

    /// Leaf-level replacer.
    pub fn into_asset(self) -> PatchResult<AssetReplacer> {
        match self {
            Self::Replace { path_id, data } => Ok(AssetReplacer::Replace { path_id, data }),
            Self::Remove { path_id } => Ok(AssetReplacer::Remove { path_id }),
            Self::Bytes { original, .. }
            | Self::ContainerSlice { original, .. }
            | Self::Delete { original } => Err(PatchError::Package {
                message: format!("container replacer for entry {original} in a leaf file"),
            }),
        }
    }
}

impl InstallerPackage {
    pub fn from_json(content: &str) -> PatchResult<Self> {
        serde_json::from_str(content).map_err(|e| PatchError::Package {
            message: format!("invalid package: {e}"),
        })
    }

    pub fn load(path: impl AsRef<Path>) -> PatchResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(PatchError::MissingInput {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| PatchError::io(format!("failed to read {}", path.display()), e))?;
        Self::from_json(&content)
    }
}

/// Applies installer packages.
pub struct PackageApplier<'a> {
    codec: &'a dyn ContainerCodec,
    assets: &'a dyn AssetsCodec,
    options: &'a PatchOptions,
    backups: &'a BackupManager,
}

impl<'a> PackageApplier<'a> {
    pub fn new(
        codec: &'a dyn ContainerCodec,
        assets: &'a dyn AssetsCodec,
        options: &'a PatchOptions,
        backups: &'a BackupManager,
    ) -> Self {
        Self {
            codec,
            assets,
            options,
            backups,
        }
    }

    /// Apply every affected file of `package` below `root`, in order.
    ///
    /// Failures of single files are recorded and the next file is tried.
    /// Backup exhaustion and partial swaps stop the whole package.
    pub fn apply(&self, package: &InstallerPackage, root: &Path) -> PatchResult<BatchReport> {
        info!(
            name = %package.name,
            creators = %package.creators,
            files = package.affected_files.len(),
            "installing package"
        );
        if !package.description.is_empty() {
            info!(description = %package.description, "package description");
        }

        let mut pipeline = PatchPipeline::new(self.codec, self.assets, self.options, self.backups);
        let mut report = BatchReport::default();

        for affected in &package.affected_files {
            let target = root.join(&affected.path);
            match self.apply_file(&mut pipeline, affected, &target, &package.added_types) {
                Ok(outcome) => report.push(outcome),
                Err(e) if e.is_recoverable() => {
                    warn!(path = %target.display(), error = %e, "package file failed");
                    report.push(FileOutcome::failed(&target, &e));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    fn apply_file(
        &self,
        pipeline: &mut PatchPipeline<'_>,
        affected: &AffectedFile,
        target: &Path,
        added_types: &[TypeDefinition],
    ) -> PatchResult<FileOutcome> {
        check_relative(&affected.path)?;

        if affected.is_bundle {
            let pending = affected
                .replacers
                .iter()
                .cloned()
                .map(ReplacerSpec::into_pending)
                .collect::<PatchResult<Vec<_>>>()?;
            let job = PatchJob::new(target, ReplacerSource::Package(pending))
                .with_added_types(added_types.to_vec());
            pipeline.run(job)
        } else {
            let assets = affected
                .replacers
                .iter()
                .cloned()
                .map(ReplacerSpec::into_asset)
                .collect::<PatchResult<Vec<_>>>()?;
            pipeline.rewrite_leaf(target, &assets, added_types)
        }
    }
}

fn check_relative(path: &Path) -> PatchResult<()> {
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(PatchError::Package {
            message: format!("path {} is not relative to the package root", path.display()),
        });
    }
    Ok(())
}
