//! Container codec boundary.
//!
//! The binary container format (directory layout, block compression) is
//! not implemented here; it is reached through [`ContainerCodec`]. Leaf
//! structured files that live outside containers go through
//! [`AssetsCodec`]. [`crate::flat::FlatCodec`] implements both for the
//! crate's own reference format.

use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PatchError, PatchResult};
use crate::replacer::AssetReplacer;

/// Readable and seekable byte source.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// One named member of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEntry {
    /// Entry name, unique within the container.
    pub name: String,
    /// Absolute offset of the entry's bytes in the decompressed image.
    pub offset: u64,
    /// Size of the entry's bytes.
    pub decompressed_size: u64,
}

/// Parsed container directory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerDirectory {
    /// Whether the payload is block-compressed. Entry offsets are only
    /// meaningful once this is `false`.
    pub compressed: bool,
    /// Engine version recorded in the container header.
    pub engine_version: Option<String>,
    /// Entries in directory order.
    pub entries: Vec<ContainerEntry>,
}

impl ContainerDirectory {
    pub fn entry(&self, name: &str) -> Option<&ContainerEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// An entry as it will be written to the output image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEntry {
    pub name: String,
    pub data: Vec<u8>,
}

/// Type definition carried by an installer package.
///
/// Passed through to the writers untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub class_id: i32,
    #[serde(default)]
    pub script_index: Option<u16>,
    #[serde(default)]
    pub type_hash: Option<String>,
}

/// Container read/decompress/write service.
pub trait ContainerCodec {
    /// Whether `header` (a prefix of a file) looks like a container.
    fn sniff(&self, header: &[u8]) -> bool;

    /// Parse the directory of a container image.
    fn read_directory(&self, image: &mut dyn ReadSeek) -> PatchResult<ContainerDirectory>;

    /// Write the fully decompressed form of `image` to `sink`.
    fn decompress(&self, image: &mut dyn ReadSeek, sink: &mut dyn Write) -> PatchResult<()>;

    /// Encode an uncompressed container holding `entries` in order.
    fn write(
        &self,
        directory: &ContainerDirectory,
        entries: &[OutputEntry],
        added_types: &[TypeDefinition],
        sink: &mut dyn Write,
    ) -> PatchResult<()>;
}

/// Leaf structured-file rewrite service.
pub trait AssetsCodec {
    /// Rewrite `original` with `replacers` applied.
    fn rewrite(
        &self,
        original: &[u8],
        replacers: &[AssetReplacer],
        added_types: &[TypeDefinition],
        sink: &mut dyn Write,
    ) -> PatchResult<()>;
}

/// Decompressed container bytes, in memory or in a `.decomp` sibling file.
///
/// Reads are positioned, so one source can serve the directory, the
/// pass-through entries and bound slice replacers.
#[derive(Debug)]
pub enum ContainerData {
    Memory(Cursor<Vec<u8>>),
    File { path: PathBuf, file: File },
}

impl ContainerData {
    pub fn memory(bytes: Vec<u8>) -> Self {
        Self::Memory(Cursor::new(bytes))
    }

    pub fn open(path: &Path) -> PatchResult<Self> {
        let file = File::open(path)
            .map_err(|e| PatchError::io(format!("failed to open {}", path.display()), e))?;
        Ok(Self::File {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Memory(_) => None,
            Self::File { path, .. } => Some(path),
        }
    }

    /// Read `length` bytes starting at absolute `offset`.
    ///
    /// The region must lie inside the source; it is checked before any
    /// buffer is allocated.
    pub fn read_at(&mut self, offset: u64, length: u64) -> PatchResult<Vec<u8>> {
        let reader: &mut dyn ReadSeek = self.reader();
        let source_len = reader
            .seek(SeekFrom::End(0))
            .map_err(|e| PatchError::io("failed to read container data length", e))?;
        let in_bounds = offset
            .checked_add(length)
            .is_some_and(|end| end <= source_len);
        if !in_bounds {
            return Err(PatchError::container(format!(
                "region of {length} bytes at offset {offset} exceeds {source_len} bytes of data"
            )));
        }
        let len = usize::try_from(length)
            .map_err(|_| PatchError::container(format!("entry too large: {length} bytes")))?;
        let mut buf = vec![0u8; len];
        reader
            .seek(SeekFrom::Start(offset))
            .and_then(|_| reader.read_exact(&mut buf))
            .map_err(|e| {
                PatchError::io(format!("failed to read {length} bytes at offset {offset}"), e)
            })?;
        Ok(buf)
    }

    /// Read the bytes of one directory entry.
    pub fn read_entry(&mut self, entry: &ContainerEntry) -> PatchResult<Vec<u8>> {
        self.read_at(entry.offset, entry.decompressed_size)
    }

    /// Rewind and expose the source as a reader.
    pub fn rewind(&mut self) -> PatchResult<&mut dyn ReadSeek> {
        let reader = self.reader();
        reader
            .seek(SeekFrom::Start(0))
            .map_err(|e| PatchError::io("failed to rewind container data", e))?;
        Ok(reader)
    }

    fn reader(&mut self) -> &mut dyn ReadSeek {
        match self {
            Self::Memory(cursor) => cursor,
            Self::File { file, .. } => file,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_at_memory() {
        let mut data = ContainerData::memory(vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(data.read_at(2, 3).unwrap(), vec![2, 3, 4]);
        assert_eq!(data.read_at(0, 1).unwrap(), vec![0]);
        assert!(data.path().is_none());
    }

    #[test]
    fn test_read_past_end_is_error() {
        let mut data = ContainerData::memory(vec![0, 1]);
        let err = data.read_at(1, 4).unwrap_err();
        assert!(matches!(err, PatchError::Container { .. }));
    }

    #[test]
    fn test_oversized_region_fails_without_allocating() {
        let mut data = ContainerData::memory(vec![0; 16]);
        let err = data.read_at(8, 1 << 46).unwrap_err();
        assert!(err.to_string().contains("exceeds 16 bytes"));

        let err = data.read_at(u64::MAX, 2).unwrap_err();
        assert!(matches!(err, PatchError::Container { .. }));
    }

    #[test]
    fn test_read_entry_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.decomp");
        std::fs::write(&path, b"headerABCDE").unwrap();

        let mut data = ContainerData::open(&path).unwrap();
        let entry = ContainerEntry {
            name: "cab".into(),
            offset: 6,
            decompressed_size: 5,
        };
        assert_eq!(data.read_entry(&entry).unwrap(), b"ABCDE".to_vec());
        assert_eq!(data.path(), Some(path.as_path()));
    }
}
