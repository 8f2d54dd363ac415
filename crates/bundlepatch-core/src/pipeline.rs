//! Patch pipeline for one container file.
//!
//! ```text
//! Idle -> Decompressing -> Substituting -> Writing -> Swapping -> CleaningUp -> Done
//!   \__________________________ Aborted ____________________________/
//! ```
//!
//! The original file is only touched in `Swapping`, and only after the
//! complete rewritten image is on disk as `<target>.mod`. The output image
//! is never recompressed, whatever the input's compression state.

use std::fs::File;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::backup::{sibling_path, BackupManager, BackupSlot, DECOMP_SUFFIX, MOD_SUFFIX};
use crate::config::PatchOptions;
use crate::container::{
    AssetsCodec, ContainerCodec, ContainerData, ContainerDirectory, OutputEntry, TypeDefinition,
};
use crate::error::{PatchError, PatchResult};
use crate::replacer::{AssetReplacer, PendingReplacer, Replacer, ReplacerSet};
use crate::report::{EntryOutcome, FileOutcome, FileStatus};

/// Pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Decompressing,
    Substituting,
    Writing,
    Swapping,
    CleaningUp,
    Done,
    Aborted,
}

/// Where the replacers of a job come from.
#[derive(Debug, Clone)]
pub enum ReplacerSource {
    /// Replacement files in a directory, matched by entry name.
    Directory(PathBuf),
    /// Package replacers, bound once the container is open.
    Package(Vec<PendingReplacer>),
    /// Ready replacers.
    Replacers(Vec<Replacer>),
}

/// One container to patch.
#[derive(Debug, Clone)]
pub struct PatchJob {
    pub target: PathBuf,
    pub replacers: ReplacerSource,
    /// Carried to the writer; currently inert.
    pub added_types: Vec<TypeDefinition>,
}

impl PatchJob {
    pub fn new(target: impl Into<PathBuf>, replacers: ReplacerSource) -> Self {
        Self {
            target: target.into(),
            replacers,
            added_types: Vec::new(),
        }
    }

    pub fn with_added_types(mut self, added_types: Vec<TypeDefinition>) -> Self {
        self.added_types = added_types;
        self
    }
}

/// An opened, decompressed container.
///
/// Holds the only file handle on its data; drop it (or call
/// [`OpenContainer::close`]) before renaming or deleting anything it reads.
#[derive(Debug)]
pub struct OpenContainer {
    pub directory: ContainerDirectory,
    pub data: ContainerData,
    /// `.decomp` file written for this container, if any.
    pub decomp_path: Option<PathBuf>,
}

impl OpenContainer {
    /// Open `path`, decompressing it when needed.
    ///
    /// Compressed containers are decompressed into memory when
    /// `decompress_to_memory` is set and into `<path>.decomp` otherwise.
    /// Uncompressed containers are read in place.
    pub fn open(codec: &dyn ContainerCodec, path: &Path, options: &PatchOptions) -> PatchResult<Self> {
        if !path.is_file() {
            return Err(PatchError::MissingInput {
                path: path.to_path_buf(),
            });
        }

        let mut source = ContainerData::open(path)?;
        let directory = codec.read_directory(source.rewind()?)?;
        if !directory.compressed {
            debug!(path = %path.display(), "container is not compressed");
            return Ok(Self {
                directory,
                data: source,
                decomp_path: None,
            });
        }

        if options.decompress_to_memory {
            info!(path = %path.display(), "decompressing to memory");
            let mut buf = Vec::new();
            codec.decompress(source.rewind()?, &mut buf)?;
            drop(source);
            let mut data = ContainerData::memory(buf);
            let directory = codec.read_directory(data.rewind()?)?;
            return Ok(Self {
                directory,
                data,
                decomp_path: None,
            });
        }

        let decomp = sibling_path(path, DECOMP_SUFFIX);
        if decomp.exists() {
            debug!(
                path = %decomp.display(),
                force = options.force_overwrite_decompressed_file,
                "overwriting existing decompressed file"
            );
        }
        info!(path = %path.display(), decomp = %decomp.display(), "decompressing");

        let written = File::create(&decomp)
            .map_err(|e| PatchError::io(format!("failed to create {}", decomp.display()), e))
            .and_then(|mut sink| codec.decompress(source.rewind()?, &mut sink));
        drop(source);
        if let Err(e) = written {
            remove_quietly(&decomp);
            return Err(e);
        }

        let mut data = ContainerData::open(&decomp)?;
        let directory = codec.read_directory(data.rewind()?)?;
        Ok(Self {
            directory,
            data,
            decomp_path: Some(decomp),
        })
    }

    /// Release the data handle and delete the `.decomp` file unless kept.
    pub fn close(self, options: &PatchOptions) {
        let Self {
            data, decomp_path, ..
        } = self;
        drop(data);
        if let Some(decomp) = decomp_path {
            if options.removes_decompressed_file() {
                remove_quietly(&decomp);
            }
        }
    }
}

/// Build the output entry list.
///
/// Entries keep directory order. Entries without a replacer are copied from
/// `data`, deletions are dropped, renames take their new name. Replacers for
/// names the directory does not have are appended as new entries.
pub fn compose_entries(
    directory: &ContainerDirectory,
    replacers: &ReplacerSet,
    data: &mut ContainerData,
    assets: &dyn AssetsCodec,
    added_types: &[TypeDefinition],
) -> PatchResult<Vec<OutputEntry>> {
    let by_name = replacers.by_original_name();
    let mut out = Vec::with_capacity(directory.entries.len());

    for entry in &directory.entries {
        match by_name.get(entry.name.as_str()) {
            None => out.push(OutputEntry {
                name: entry.name.clone(),
                data: data.read_entry(entry)?,
            }),
            Some(Replacer::Deletion { .. }) => {
                debug!(entry = %entry.name, "deleting entry");
            }
            Some(replacer) => out.push(replacement_entry(replacer, data, assets, added_types)?),
        }
    }

    for replacer in replacers.iter() {
        let name = replacer.original_name();
        let last = by_name.get(name).is_some_and(|r| std::ptr::eq(*r, replacer));
        if directory.entry(name).is_some() || !last {
            continue;
        }
        match replacer {
            Replacer::Deletion { original_name } => {
                debug!(entry = %original_name, "deletion of absent entry ignored");
            }
            _ => {
                debug!(entry = %replacer.original_name(), "adding entry");
                out.push(replacement_entry(replacer, data, assets, added_types)?);
            }
        }
    }

    Ok(out)
}

fn replacement_entry(
    replacer: &Replacer,
    data: &mut ContainerData,
    assets: &dyn AssetsCodec,
    added_types: &[TypeDefinition],
) -> PatchResult<OutputEntry> {
    match replacer {
        Replacer::FromExternalBytes {
            new_name, data: bytes, ..
        } => Ok(OutputEntry {
            name: new_name.clone(),
            data: bytes.clone(),
        }),
        Replacer::FromContainerSlice(slice) => {
            let bytes = data.read_at(slice.offset(), slice.length())?;
            let bytes = if slice.assets().is_empty() {
                bytes
            } else {
                let mut rewritten = Vec::new();
                assets.rewrite(&bytes, slice.assets(), added_types, &mut rewritten)?;
                rewritten
            };
            Ok(OutputEntry {
                name: slice.new_name().to_string(),
                data: bytes,
            })
        }
        Replacer::Deletion { original_name } => Err(PatchError::container(format!(
            "deletion of {original_name} has no output"
        ))),
    }
}

/// Runs patch jobs against container files.
pub struct PatchPipeline<'a> {
    codec: &'a dyn ContainerCodec,
    assets: &'a dyn AssetsCodec,
    options: &'a PatchOptions,
    backups: &'a BackupManager,
    stage: Stage,
}

impl<'a> PatchPipeline<'a> {
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
            stage: Stage::Idle,
        }
    }

    /// Stage reached by the last run.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn enter(&mut self, stage: Stage, target: &Path) {
        debug!(target = %target.display(), from = ?self.stage, to = ?stage, "pipeline stage");
        self.stage = stage;
    }

    /// Patch one container.
    ///
    /// On error the pipeline ends in [`Stage::Aborted`]; unless the error is
    /// [`PatchError::PartialSwap`] the target is unchanged.
    pub fn run(&mut self, job: PatchJob) -> PatchResult<FileOutcome> {
        self.stage = Stage::Idle;
        let target = job.target.clone();
        let result = self.run_stages(job);
        if let Err(e) = &result {
            warn!(target = %target.display(), stage = ?self.stage, error = %e, "patch aborted");
            self.stage = Stage::Aborted;
        }
        result
    }

    fn run_stages(&mut self, job: PatchJob) -> PatchResult<FileOutcome> {
        let target = job.target.as_path();
        if !target.is_file() {
            return Err(PatchError::MissingInput {
                path: target.to_path_buf(),
            });
        }
        let slot = self.backups.reserve(target)?;

        self.enter(Stage::Decompressing, target);
        let mut open = OpenContainer::open(self.codec, target, self.options)?;

        let image = match self.substitute_and_write(&job, &mut open) {
            Ok(image) => image,
            Err(e) => {
                open.close(self.options);
                return Err(e);
            }
        };
        let OpenContainer {
            data, decomp_path, ..
        } = open;
        drop(data);

        self.enter(Stage::Swapping, target);
        let (image, entries) = image;
        let digest = match swap_in(target, &image, &slot) {
            Ok(digest) => digest,
            Err(e) => {
                self.clean_decomp(decomp_path.as_deref());
                return Err(e);
            }
        };

        self.enter(Stage::CleaningUp, target);
        self.clean_decomp(decomp_path.as_deref());

        self.enter(Stage::Done, target);
        let mut outcome = FileOutcome::new(target, FileStatus::Patched);
        outcome.entries = entries;
        outcome.backup = Some(slot.path().to_path_buf());
        outcome.output_sha256 = Some(digest);
        Ok(outcome)
    }

    fn substitute_and_write(
        &mut self,
        job: &PatchJob,
        open: &mut OpenContainer,
    ) -> PatchResult<(Vec<u8>, Vec<EntryOutcome>)> {
        let target = job.target.as_path();

        self.enter(Stage::Substituting, target);
        let replacers = match &job.replacers {
            ReplacerSource::Directory(dir) => ReplacerSet::from_directory(
                target,
                &open.directory,
                dir,
                self.options.keep_original_entry_names,
            )?,
            ReplacerSource::Package(pending) => ReplacerSet::bind(pending.clone(), &open.directory)?,
            ReplacerSource::Replacers(ready) => ReplacerSet::new(ready.clone()),
        };
        if replacers.is_empty() {
            debug!(target = %target.display(), "no replacers, entries are copied unchanged");
        }

        self.enter(Stage::Writing, target);
        let entries = compose_entries(
            &open.directory,
            &replacers,
            &mut open.data,
            self.assets,
            &job.added_types,
        )?;
        let mut image = Vec::new();
        self.codec
            .write(&open.directory, &entries, &job.added_types, &mut image)?;

        let applied = replacers
            .iter()
            .map(|r| EntryOutcome::ok(r.original_name(), None))
            .collect();
        Ok((image, applied))
    }

    /// Rewrite a leaf structured file with asset replacers.
    ///
    /// The file is read whole; there is no decompression stage. Writing and
    /// swapping follow [`PatchPipeline::run`].
    pub fn rewrite_leaf(
        &mut self,
        target: &Path,
        replacers: &[AssetReplacer],
        added_types: &[TypeDefinition],
    ) -> PatchResult<FileOutcome> {
        self.stage = Stage::Idle;
        let result = self.rewrite_leaf_stages(target, replacers, added_types);
        if let Err(e) = &result {
            warn!(target = %target.display(), stage = ?self.stage, error = %e, "leaf rewrite aborted");
            self.stage = Stage::Aborted;
        }
        result
    }

    fn rewrite_leaf_stages(
        &mut self,
        target: &Path,
        replacers: &[AssetReplacer],
        added_types: &[TypeDefinition],
    ) -> PatchResult<FileOutcome> {
        if !target.is_file() {
            return Err(PatchError::MissingInput {
                path: target.to_path_buf(),
            });
        }
        let slot = self.backups.reserve(target)?;

        self.enter(Stage::Writing, target);
        let original = std::fs::read(target)
            .map_err(|e| PatchError::io(format!("failed to read {}", target.display()), e))?;
        let mut image = Vec::new();
        self.assets
            .rewrite(&original, replacers, added_types, &mut image)?;
        drop(original);

        self.enter(Stage::Swapping, target);
        let digest = swap_in(target, &image, &slot)?;

        self.enter(Stage::Done, target);
        let mut outcome = FileOutcome::new(target, FileStatus::Patched);
        outcome.entries = replacers
            .iter()
            .map(|r| EntryOutcome::ok(r.path_id().to_string(), None))
            .collect();
        outcome.backup = Some(slot.path().to_path_buf());
        outcome.output_sha256 = Some(digest);
        Ok(outcome)
    }

    /// Decompress `target` into `<target>.decomp` and keep it.
    pub fn decompress_only(&mut self, target: &Path) -> PatchResult<FileOutcome> {
        let options = self
            .options
            .clone()
            .with_decompress_to_memory(false)
            .with_keep_decompressed_file(true);

        self.enter(Stage::Decompressing, target);
        let open = match OpenContainer::open(self.codec, target, &options) {
            Ok(open) => open,
            Err(e) => {
                self.stage = Stage::Aborted;
                return Err(e);
            }
        };

        let mut outcome = FileOutcome::new(target, FileStatus::Decompressed);
        outcome.entries = open
            .directory
            .entries
            .iter()
            .map(|e| EntryOutcome::ok(e.name.clone(), None))
            .collect();
        outcome.output = open.decomp_path.clone();
        if outcome.output.is_none() {
            info!(target = %target.display(), "already decompressed");
            outcome.status = FileStatus::Skipped;
        }
        open.close(&options);

        self.enter(Stage::Done, target);
        Ok(outcome)
    }

    fn clean_decomp(&self, decomp: Option<&Path>) {
        if let Some(decomp) = decomp {
            if self.options.removes_decompressed_file() {
                remove_quietly(decomp);
            }
        }
    }
}

/// Write `image` to `<target>.mod`, then swap it into place through `slot`.
///
/// Returns the image digest. A failed `.mod` write removes the partial file
/// and leaves the target alone.
pub(crate) fn swap_in(target: &Path, image: &[u8], slot: &BackupSlot<'_>) -> PatchResult<String> {
    let modded = sibling_path(target, MOD_SUFFIX);
    info!(path = %modded.display(), bytes = image.len(), "writing patched image");

    if let Err(e) = std::fs::write(&modded, image) {
        remove_quietly(&modded);
        return Err(PatchError::io(
            format!("failed to write {}", modded.display()),
            e,
        ));
    }

    if let Err(e) = slot.swap(target, &modded) {
        if !matches!(e, PatchError::PartialSwap { .. }) {
            remove_quietly(&modded);
        }
        return Err(e);
    }

    Ok(format!("sha256:{}", hex::encode(Sha256::digest(image))))
}

fn remove_quietly(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "failed to remove temp file");
        }
    }
}
