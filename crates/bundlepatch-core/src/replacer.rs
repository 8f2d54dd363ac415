//! Entry replacers and replacer-set resolution.
//!
//! A [`Replacer`] is one pending substitution for a container entry. The
//! container-slice variant reads its bytes from an open container and has
//! to be bound to an offset and length first; [`ContainerSlice`] encodes that
//! as a type state, so only bound slices can ever reach a [`Replacer`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::container::ContainerDirectory;
use crate::error::{PatchError, PatchResult};

/// Type state of a slice that has not been located yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unbound;

/// Type state of a slice located in the open container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bound {
    offset: u64,
    length: u64,
}

/// Replacement whose bytes come from a region of the open container.
///
/// Optional asset replacers are applied to the region's bytes before they
/// are written, which is how packages patch objects inside an entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSlice<S = Bound> {
    original_name: String,
    new_name: String,
    assets: Vec<AssetReplacer>,
    state: S,
}

impl ContainerSlice<Unbound> {
    pub fn new(original_name: impl Into<String>, new_name: impl Into<String>) -> Self {
        Self {
            original_name: original_name.into(),
            new_name: new_name.into(),
            assets: Vec::new(),
            state: Unbound,
        }
    }

    pub fn with_assets(mut self, assets: Vec<AssetReplacer>) -> Self {
        self.assets = assets;
        self
    }

    /// Bind to an explicit region of the container data stream.
    pub fn bind(self, offset: u64, length: u64) -> ContainerSlice<Bound> {
        ContainerSlice {
            original_name: self.original_name,
            new_name: self.new_name,
            assets: self.assets,
            state: Bound { offset, length },
        }
    }

    /// Bind to the region of the entry named by `original_name`.
    pub fn bind_to(self, directory: &ContainerDirectory) -> PatchResult<ContainerSlice<Bound>> {
        let entry = directory.entry(&self.original_name).ok_or_else(|| {
            PatchError::Package {
                message: format!(
                    "entry {} not found in source container",
                    self.original_name
                ),
            }
        })?;
        let (offset, length) = (entry.offset, entry.decompressed_size);
        Ok(self.bind(offset, length))
    }
}

impl<S> ContainerSlice<S> {
    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn new_name(&self) -> &str {
        &self.new_name
    }

    pub fn assets(&self) -> &[AssetReplacer] {
        &self.assets
    }
}

impl ContainerSlice<Bound> {
    pub fn offset(&self) -> u64 {
        self.state.offset
    }

    pub fn length(&self) -> u64 {
        self.state.length
    }
}

/// Pending substitution for one container entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Replacer {
    /// Bytes supplied directly, e.g. read from disk.
    FromExternalBytes {
        original_name: String,
        new_name: String,
        data: Vec<u8>,
    },
    /// Bytes read from the open container at write time.
    FromContainerSlice(ContainerSlice<Bound>),
    /// Entry is dropped from the output.
    Deletion { original_name: String },
}

impl Replacer {
    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        let name = name.into();
        Self::FromExternalBytes {
            original_name: name.clone(),
            new_name: name,
            data,
        }
    }

    pub fn delete(name: impl Into<String>) -> Self {
        Self::Deletion {
            original_name: name.into(),
        }
    }

    pub fn original_name(&self) -> &str {
        match self {
            Self::FromExternalBytes { original_name, .. } => original_name,
            Self::FromContainerSlice(slice) => slice.original_name(),
            Self::Deletion { original_name } => original_name,
        }
    }

    /// Name the entry is written under; `None` for deletions.
    pub fn new_name(&self) -> Option<&str> {
        match self {
            Self::FromExternalBytes { new_name, .. } => Some(new_name),
            Self::FromContainerSlice(slice) => Some(slice.new_name()),
            Self::Deletion { .. } => None,
        }
    }
}

/// Replacer as carried by a package, before the target container is open.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingReplacer {
    Ready(Replacer),
    Slice(ContainerSlice<Unbound>),
}

impl PendingReplacer {
    /// Bind against the directory of the currently open container.
    pub fn bind(self, directory: &ContainerDirectory) -> PatchResult<Replacer> {
        match self {
            Self::Ready(replacer) => Ok(replacer),
            Self::Slice(slice) => slice.bind_to(directory).map(Replacer::FromContainerSlice),
        }
    }

    pub fn original_name(&self) -> &str {
        match self {
            Self::Ready(replacer) => replacer.original_name(),
            Self::Slice(slice) => slice.original_name(),
        }
    }
}

/// Substitution for one object inside a leaf structured file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssetReplacer {
    Replace {
        path_id: i64,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    Remove {
        path_id: i64,
    },
}

impl AssetReplacer {
    pub fn path_id(&self) -> i64 {
        match self {
            Self::Replace { path_id, .. } | Self::Remove { path_id } => *path_id,
        }
    }
}

/// Ordered replacers for one container, at most one per original entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplacerSet {
    replacers: Vec<Replacer>,
}

impl ReplacerSet {
    pub fn new(replacers: Vec<Replacer>) -> Self {
        Self { replacers }
    }

    /// Match replacement files in `source_dir` against the container's entries.
    ///
    /// Entry `E` of container `bundle.unity3d` is replaced by
    /// `source_dir/bundle.unity3d_E`, or by `source_dir/E` when
    /// `keep_original_names` is set. Entries without a file are left out and
    /// copied verbatim by the writer. The result follows directory order.
    pub fn from_directory(
        container_path: &Path,
        directory: &ContainerDirectory,
        source_dir: &Path,
        keep_original_names: bool,
    ) -> PatchResult<Self> {
        let mut replacers = Vec::new();

        for entry in &directory.entries {
            let candidate = source_dir.join(replacement_file_name(
                container_path,
                &entry.name,
                keep_original_names,
            ));
            if !candidate.is_file() {
                continue;
            }

            let data = std::fs::read(&candidate).map_err(|e| {
                PatchError::io(format!("failed to read {}", candidate.display()), e)
            })?;
            info!(
                entry = %entry.name,
                source = %candidate.display(),
                bytes = data.len(),
                "importing entry"
            );
            replacers.push(Replacer::from_bytes(entry.name.clone(), data));
        }

        debug!(
            container = %container_path.display(),
            matched = replacers.len(),
            "built replacer set"
        );
        Ok(Self { replacers })
    }

    /// Bind package replacers against the open container's directory.
    pub fn bind(pending: Vec<PendingReplacer>, directory: &ContainerDirectory) -> PatchResult<Self> {
        pending
            .into_iter()
            .map(|p| p.bind(directory))
            .collect::<PatchResult<Vec<_>>>()
            .map(Self::new)
    }

    pub fn is_empty(&self) -> bool {
        self.replacers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.replacers.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Replacer> {
        self.replacers.iter()
    }

    /// Index replacers by original entry name. Later duplicates win.
    pub fn by_original_name(&self) -> HashMap<&str, &Replacer> {
        self.replacers
            .iter()
            .map(|r| (r.original_name(), r))
            .collect()
    }
}

/// File name under which an entry is exported and looked up for import.
pub fn replacement_file_name(
    container_path: &Path,
    entry_name: &str,
    keep_original_names: bool,
) -> PathBuf {
    if keep_original_names {
        return PathBuf::from(entry_name);
    }
    let container_name = container_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    PathBuf::from(format!("{container_name}_{entry_name}"))
}

pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerEntry;

    fn directory() -> ContainerDirectory {
        ContainerDirectory {
            compressed: false,
            engine_version: None,
            entries: vec![
                ContainerEntry {
                    name: "CAB-a".into(),
                    offset: 40,
                    decompressed_size: 3,
                },
                ContainerEntry {
                    name: "CAB-b".into(),
                    offset: 43,
                    decompressed_size: 2,
                },
            ],
        }
    }

    #[test]
    fn test_replacement_file_name_modes() {
        let container = Path::new("/games/data/level0.bundle");
        assert_eq!(
            replacement_file_name(container, "CAB-a", false),
            PathBuf::from("level0.bundle_CAB-a")
        );
        assert_eq!(
            replacement_file_name(container, "CAB-a", true),
            PathBuf::from("CAB-a")
        );
    }

    #[test]
    fn test_slice_binds_to_named_entry() {
        let slice = ContainerSlice::new("CAB-b", "CAB-b").bind_to(&directory()).unwrap();
        assert_eq!(slice.offset(), 43);
        assert_eq!(slice.length(), 2);
    }

    #[test]
    fn test_slice_bind_unknown_entry_fails() {
        let err = ContainerSlice::new("CAB-z", "CAB-z")
            .bind_to(&directory())
            .unwrap_err();
        assert!(err.to_string().contains("CAB-z"));
    }

    #[test]
    fn test_from_directory_follows_entry_order() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("level0.bundle");
        std::fs::write(dir.path().join("level0.bundle_CAB-b"), [9u8, 9]).unwrap();
        std::fs::write(dir.path().join("level0.bundle_CAB-a"), [7u8]).unwrap();
        std::fs::write(dir.path().join("CAB-a"), [1u8]).unwrap();

        let set = ReplacerSet::from_directory(&container, &directory(), dir.path(), false).unwrap();
        let names: Vec<&str> = set.iter().map(|r| r.original_name()).collect();
        assert_eq!(names, vec!["CAB-a", "CAB-b"]);
        assert_eq!(
            set.iter().next(),
            Some(&Replacer::from_bytes("CAB-a", vec![7]))
        );

        let kept = ReplacerSet::from_directory(&container, &directory(), dir.path(), true).unwrap();
        assert!(!kept.is_empty());
        assert_eq!(kept.len(), 1);

        let empty = dir.path().join("empty");
        std::fs::create_dir(&empty).unwrap();
        let none = ReplacerSet::from_directory(&container, &directory(), &empty, false).unwrap();
        assert!(none.is_empty());
        assert_eq!(
            kept.iter().next(),
            Some(&Replacer::from_bytes("CAB-a", vec![1]))
        );
    }

    #[test]
    fn test_pending_bind_mixes_variants() {
        let pending = vec![
            PendingReplacer::Ready(Replacer::delete("CAB-a")),
            PendingReplacer::Slice(ContainerSlice::new("CAB-b", "CAB-c")),
        ];
        let set = ReplacerSet::bind(pending, &directory()).unwrap();
        let by_name = set.by_original_name();
        assert_eq!(by_name["CAB-a"].new_name(), None);
        assert_eq!(by_name["CAB-b"].new_name(), Some("CAB-c"));
    }

    #[test]
    fn test_asset_replacer_wire_form() {
        let rep = AssetReplacer::Replace {
            path_id: -4,
            data: vec![0xde, 0xad],
        };
        let json = serde_json::to_value(&rep).unwrap();
        assert_eq!(json["kind"], "replace");
        assert_eq!(json["data"], "3q0=");
        assert_eq!(serde_json::from_value::<AssetReplacer>(json).unwrap(), rep);
    }
}
