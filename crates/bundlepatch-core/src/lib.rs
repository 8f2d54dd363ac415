//! Export and patch engine for multi-entry asset bundle containers.
//!
//! This crate provides:
//!
//! - A field-tree to JSON document serializer for exported objects
//! - A staged patch pipeline (decompress, substitute, write, swap, clean up)
//! - Numbered backups and a two-step rename swap
//! - Batch export/import drivers and installer package application
//!
//! The binary container format and type resolution are reached through the
//! [`ContainerCodec`], [`AssetsCodec`] and [`TypeResolver`] traits.
//! [`FlatCodec`] and [`TypeTreeDumpResolver`] implement them for the crate's
//! own reference format.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use bundlepatch_core::{BackupManager, FlatCodec, PatchJob, PatchOptions, PatchPipeline, ReplacerSource};
//!
//! # fn example() -> bundlepatch_core::PatchResult<()> {
//! let options = PatchOptions::from_env();
//! let backups = BackupManager::new();
//! let mut pipeline = PatchPipeline::new(&FlatCodec, &FlatCodec, &options, &backups);
//!
//! let job = PatchJob::new(
//!     "data/level0.bundle",
//!     ReplacerSource::Directory(Path::new("edited").to_path_buf()),
//! );
//! let outcome = pipeline.run(job)?;
//! println!("backup at {:?}", outcome.backup);
//! # Ok(())
//! # }
//! ```
//!
//! # Derived files
//!
//! | File | Meaning |
//! |------|---------|
//! | `<target>.decomp` | Decompressed image, removed unless kept |
//! | `<target>.mod` | Rewritten image before the swap |
//! | `<target>.bak0000` .. `.bak9999` | Pre-patch content |

pub mod backup;
pub mod batch;
pub mod config;
pub mod container;
pub mod document;
pub mod error;
pub mod export;
pub mod field;
pub mod flat;
pub mod package;
pub mod pipeline;
pub mod replacer;
pub mod report;
pub mod resolver;

// Re-export main types
pub use backup::{
    atomic_swap, backup_path, next_backup_path, BackupManager, BackupSlot, MAX_BACKUP_SLOTS,
};
pub use batch::{collect_inputs, import_directory, sniff_file};
pub use config::PatchOptions;
pub use container::{
    AssetsCodec, ContainerCodec, ContainerData, ContainerDirectory, ContainerEntry, OutputEntry,
    ReadSeek, TypeDefinition,
};
pub use document::serialize;
pub use error::{PatchError, PatchResult, SerializeError};
pub use export::ExportContext;
pub use field::{
    ArrayItems, FieldKind, FieldNode, ManagedReferenceRegistry, ReferencedObject, ScalarValue,
};
pub use flat::FlatCodec;
pub use package::{AffectedFile, InstallerPackage, PackageApplier, ReplacerSpec};
pub use pipeline::{OpenContainer, PatchJob, PatchPipeline, ReplacerSource, Stage};
pub use replacer::{AssetReplacer, ContainerSlice, PendingReplacer, Replacer, ReplacerSet};
pub use report::{BatchReport, EntryOutcome, FileOutcome, FileStatus};
pub use resolver::{ClassDatabaseCache, ResolvedObject, TypeResolver, TypeTreeDumpResolver};
