//! Reference container format.
//!
//! A small self-describing format used by the CLI and the test suites. It
//! implements [`ContainerCodec`] for bundles and [`AssetsCodec`] for leaf
//! files, where objects are entries named by their decimal path id.
//!
//! ```text
//! magic        b"BPAK"
//! version      u8   (1)
//! flags        u8   (bit 0: payload deflate-compressed)
//! engine       u16 length + UTF-8
//! count        u32
//! entries      count * (u16 length + UTF-8 name, u64 size)
//! payload      entry bytes in directory order
//! ```
//!
//! All integers are little-endian.

use std::collections::BTreeMap;
use std::io::{self, Read, SeekFrom, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use tracing::debug;

use crate::container::{
    AssetsCodec, ContainerCodec, ContainerDirectory, ContainerEntry, OutputEntry, ReadSeek,
    TypeDefinition,
};
use crate::error::{PatchError, PatchResult};
use crate::replacer::AssetReplacer;

pub const MAGIC: &[u8; 4] = b"BPAK";
pub const FORMAT_VERSION: u8 = 1;
const FLAG_COMPRESSED: u8 = 0x01;

/// Reference codec for `BPAK` containers and leaf files.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatCodec;

impl FlatCodec {
    /// Encode a container, optionally compressing the payload.
    pub fn pack(
        &self,
        engine_version: Option<&str>,
        entries: &[OutputEntry],
        compress: bool,
        sink: &mut dyn Write,
    ) -> PatchResult<()> {
        let flags = if compress { FLAG_COMPRESSED } else { 0 };
        let sizes: Vec<(&str, u64)> = entries
            .iter()
            .map(|e| (e.name.as_str(), e.data.len() as u64))
            .collect();
        write_header(sink, flags, engine_version, &sizes).map_err(write_err)?;

        if compress {
            let mut encoder = DeflateEncoder::new(sink, Compression::default());
            for entry in entries {
                encoder.write_all(&entry.data).map_err(write_err)?;
            }
            encoder.finish().map_err(write_err)?;
        } else {
            for entry in entries {
                sink.write_all(&entry.data).map_err(write_err)?;
            }
        }
        Ok(())
    }

    /// Pack into a byte vector.
    pub fn pack_to_vec(
        &self,
        engine_version: Option<&str>,
        entries: &[OutputEntry],
        compress: bool,
    ) -> PatchResult<Vec<u8>> {
        let mut out = Vec::new();
        self.pack(engine_version, entries, compress, &mut out)?;
        Ok(out)
    }

    /// Decode every entry of an image, decompressing if needed.
    pub fn unpack(&self, image: &[u8]) -> PatchResult<(ContainerDirectory, Vec<OutputEntry>)> {
        let mut plain = Vec::new();
        self.decompress(&mut io::Cursor::new(image), &mut plain)?;
        let directory = self.read_directory(&mut io::Cursor::new(&plain))?;

        let mut entries = Vec::with_capacity(directory.entries.len());
        for entry in &directory.entries {
            let start = usize::try_from(entry.offset).map_err(|_| truncated())?;
            let end = entry
                .offset
                .checked_add(entry.decompressed_size)
                .and_then(|end| usize::try_from(end).ok())
                .ok_or_else(truncated)?;
            let data = plain.get(start..end).ok_or_else(truncated)?;
            entries.push(OutputEntry {
                name: entry.name.clone(),
                data: data.to_vec(),
            });
        }
        Ok((directory, entries))
    }
}

impl ContainerCodec for FlatCodec {
    fn sniff(&self, header: &[u8]) -> bool {
        header.len() >= 5 && &header[..4] == MAGIC && header[4] == FORMAT_VERSION
    }

    fn read_directory(&self, image: &mut dyn ReadSeek) -> PatchResult<ContainerDirectory> {
        image
            .seek(SeekFrom::Start(0))
            .map_err(|e| PatchError::io("failed to rewind container", e))?;
        let header = read_header(image)?;

        let compressed = header.flags & FLAG_COMPRESSED != 0;
        let payload = payload_len(&header.entries)?;
        let end = header.len.checked_add(payload).ok_or_else(truncated)?;
        if !compressed {
            // Offsets of an uncompressed image must fall inside the image.
            let image_len = image
                .seek(SeekFrom::End(0))
                .map_err(|e| PatchError::io("failed to read container length", e))?;
            if end > image_len {
                return Err(truncated());
            }
        }

        let mut offset = header.len;
        let mut entries = Vec::with_capacity(header.entries.len());
        for (name, size) in header.entries {
            entries.push(ContainerEntry {
                name,
                offset,
                decompressed_size: size,
            });
            offset += size;
        }

        Ok(ContainerDirectory {
            compressed,
            engine_version: header.engine_version,
            entries,
        })
    }

    fn decompress(&self, image: &mut dyn ReadSeek, sink: &mut dyn Write) -> PatchResult<()> {
        image
            .seek(SeekFrom::Start(0))
            .map_err(|e| PatchError::io("failed to rewind container", e))?;
        let header = read_header(image)?;
        let sizes: Vec<(&str, u64)> = header
            .entries
            .iter()
            .map(|(name, size)| (name.as_str(), *size))
            .collect();
        write_header(
            sink,
            header.flags & !FLAG_COMPRESSED,
            header.engine_version.as_deref(),
            &sizes,
        )
        .map_err(write_err)?;

        let expected = payload_len(&header.entries)?;
        // One byte past the declared payload is enough to detect a mismatch.
        let limit = expected.saturating_add(1);
        let copied = if header.flags & FLAG_COMPRESSED != 0 {
            io::copy(&mut DeflateDecoder::new(image).take(limit), sink)
        } else {
            io::copy(&mut image.take(limit), sink)
        }
        .map_err(|e| PatchError::container(format!("failed to decompress payload: {e}")))?;

        if copied != expected {
            return Err(PatchError::container(format!(
                "payload holds {copied} bytes, directory declares {expected}"
            )));
        }
        Ok(())
    }

    fn write(
        &self,
        directory: &ContainerDirectory,
        entries: &[OutputEntry],
        added_types: &[TypeDefinition],
        sink: &mut dyn Write,
    ) -> PatchResult<()> {
        if !added_types.is_empty() {
            debug!(count = added_types.len(), "ignoring added types");
        }
        self.pack(directory.engine_version.as_deref(), entries, false, sink)
    }
}

impl AssetsCodec for FlatCodec {
    fn rewrite(
        &self,
        original: &[u8],
        replacers: &[AssetReplacer],
        added_types: &[TypeDefinition],
        sink: &mut dyn Write,
    ) -> PatchResult<()> {
        let (directory, entries) = self.unpack(original)?;

        let mut by_id: BTreeMap<String, &AssetReplacer> = BTreeMap::new();
        for rep in replacers {
            by_id.insert(rep.path_id().to_string(), rep);
        }

        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            match by_id.remove(&entry.name) {
                Some(AssetReplacer::Replace { data, .. }) => out.push(OutputEntry {
                    name: entry.name,
                    data: data.clone(),
                }),
                Some(AssetReplacer::Remove { .. }) => {}
                None => out.push(entry),
            }
        }
        // Replacements for objects the file does not have yet are additions.
        for rep in replacers {
            if let AssetReplacer::Replace { path_id, data } = rep {
                if by_id.remove(&path_id.to_string()).is_some() {
                    out.push(OutputEntry {
                        name: path_id.to_string(),
                        data: data.clone(),
                    });
                }
            }
        }

        self.write(&directory, &out, added_types, sink)
    }
}

struct Header {
    flags: u8,
    engine_version: Option<String>,
    entries: Vec<(String, u64)>,
    len: u64,
}

fn read_header(image: &mut dyn ReadSeek) -> PatchResult<Header> {
    let mut magic = [0u8; 4];
    read_exact(image, &mut magic)?;
    if &magic != MAGIC {
        return Err(PatchError::container("not a BPAK container"));
    }
    let version = read_u8(image)?;
    if version != FORMAT_VERSION {
        return Err(PatchError::container(format!(
            "unsupported BPAK version {version}"
        )));
    }
    let flags = read_u8(image)?;

    let engine = read_string(image)?;
    let engine_version = (!engine.is_empty()).then_some(engine);

    let count = read_u32(image)?;
    let mut entries = Vec::new();
    for _ in 0..count {
        let name = read_string(image)?;
        let size = read_u64(image)?;
        entries.push((name, size));
    }

    let len = image
        .stream_position()
        .map_err(|e| PatchError::io("failed to read container position", e))?;

    Ok(Header {
        flags,
        engine_version,
        entries,
        len,
    })
}

fn write_header(
    sink: &mut dyn Write,
    flags: u8,
    engine_version: Option<&str>,
    entries: &[(&str, u64)],
) -> io::Result<()> {
    sink.write_all(MAGIC)?;
    sink.write_all(&[FORMAT_VERSION, flags])?;
    write_string(sink, engine_version.unwrap_or(""))?;
    let count = u32::try_from(entries.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many entries"))?;
    sink.write_all(&count.to_le_bytes())?;
    for (name, size) in entries {
        write_string(sink, name)?;
        sink.write_all(&size.to_le_bytes())?;
    }
    Ok(())
}

fn write_string(sink: &mut dyn Write, s: &str) -> io::Result<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "name too long"))?;
    sink.write_all(&len.to_le_bytes())?;
    sink.write_all(s.as_bytes())
}

fn read_exact(image: &mut dyn ReadSeek, buf: &mut [u8]) -> PatchResult<()> {
    image.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => truncated(),
        _ => PatchError::io("failed to read container header", e),
    })
}

fn read_u8(image: &mut dyn ReadSeek) -> PatchResult<u8> {
    let mut buf = [0u8; 1];
    read_exact(image, &mut buf)?;
    Ok(buf[0])
}

fn read_u16(image: &mut dyn ReadSeek) -> PatchResult<u16> {
    let mut buf = [0u8; 2];
    read_exact(image, &mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32(image: &mut dyn ReadSeek) -> PatchResult<u32> {
    let mut buf = [0u8; 4];
    read_exact(image, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(image: &mut dyn ReadSeek) -> PatchResult<u64> {
    let mut buf = [0u8; 8];
    read_exact(image, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_string(image: &mut dyn ReadSeek) -> PatchResult<String> {
    let len = read_u16(image)?;
    let mut buf = vec![0u8; usize::from(len)];
    read_exact(image, &mut buf)?;
    String::from_utf8(buf).map_err(|_| PatchError::container("name is not valid UTF-8"))
}

/// Total payload size declared by a header.
fn payload_len(entries: &[(String, u64)]) -> PatchResult<u64> {
    entries
        .iter()
        .try_fold(0u64, |total, (_, size)| total.checked_add(*size))
        .ok_or_else(truncated)
}

fn truncated() -> PatchError {
    PatchError::container("container is truncated")
}

fn write_err(e: io::Error) -> PatchError {
    PatchError::io("failed to write container", e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn entries() -> Vec<OutputEntry> {
        vec![
            OutputEntry {
                name: "A".into(),
                data: vec![1, 2, 3],
            },
            OutputEntry {
                name: "B".into(),
                data: vec![4, 5],
            },
        ]
    }

    #[test]
    fn test_directory_offsets_are_absolute() {
        let codec = FlatCodec;
        let image = codec.pack_to_vec(Some("2021.3.1f1"), &entries(), false).unwrap();
        let dir = codec.read_directory(&mut Cursor::new(&image)).unwrap();

        assert!(!dir.compressed);
        assert_eq!(dir.engine_version.as_deref(), Some("2021.3.1f1"));
        let a = dir.entry("A").unwrap();
        let b = dir.entry("B").unwrap();
        assert_eq!(&image[a.offset as usize..(a.offset + 3) as usize], &[1, 2, 3]);
        assert_eq!(b.offset, a.offset + 3);
        assert_eq!(image.len() as u64, b.offset + 2);
    }

    #[test]
    fn test_decompress_clears_flag() {
        let codec = FlatCodec;
        let packed = codec.pack_to_vec(None, &entries(), true).unwrap();
        assert!(codec
            .read_directory(&mut Cursor::new(&packed))
            .unwrap()
            .compressed);

        let mut plain = Vec::new();
        codec
            .decompress(&mut Cursor::new(&packed), &mut plain)
            .unwrap();
        assert_eq!(plain, codec.pack_to_vec(None, &entries(), false).unwrap());
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let codec = FlatCodec;
        let mut image = codec.pack_to_vec(None, &entries(), false).unwrap();
        image.pop();
        let err = codec
            .decompress(&mut Cursor::new(&image), &mut Vec::new())
            .unwrap_err();
        assert!(err.to_string().contains("declares 5"));
    }

    fn crafted(flags: u8, sizes: &[(&str, u64)], payload: &[u8]) -> Vec<u8> {
        let mut image = Vec::new();
        write_header(&mut image, flags, None, sizes).unwrap();
        image.extend_from_slice(payload);
        image
    }

    #[test]
    fn test_overflowing_sizes_rejected() {
        let codec = FlatCodec;
        let sizes = [("A", u64::MAX), ("B", 2)];

        for flags in [0, FLAG_COMPRESSED] {
            let image = crafted(flags, &sizes, &[1, 2, 3]);
            let err = codec
                .read_directory(&mut Cursor::new(&image))
                .unwrap_err();
            assert!(err.to_string().contains("truncated"), "{err}");

            let err = codec
                .decompress(&mut Cursor::new(&image), &mut Vec::new())
                .unwrap_err();
            assert!(err.to_string().contains("truncated"), "{err}");
        }
        assert!(codec.unpack(&crafted(0, &sizes, &[1, 2, 3])).is_err());
    }

    #[test]
    fn test_uncompressed_entry_past_end_rejected() {
        let image = crafted(0, &[("CAB-a", 1 << 46)], &[1, 2, 3]);
        let err = FlatCodec
            .read_directory(&mut Cursor::new(&image))
            .unwrap_err();
        assert!(matches!(err, PatchError::Container { .. }));
    }

    #[test]
    fn test_sniff() {
        let codec = FlatCodec;
        assert!(codec.sniff(b"BPAK\x01\x00"));
        assert!(!codec.sniff(b"UnityFS\0"));
        assert!(!codec.sniff(b"BP"));
    }

    #[test]
    fn test_rewrite_assets() {
        let codec = FlatCodec;
        let original = codec
            .pack_to_vec(
                None,
                &[
                    OutputEntry {
                        name: "1".into(),
                        data: vec![1],
                    },
                    OutputEntry {
                        name: "2".into(),
                        data: vec![2],
                    },
                    OutputEntry {
                        name: "3".into(),
                        data: vec![3],
                    },
                ],
                true,
            )
            .unwrap();
        let reps = vec![
            AssetReplacer::Replace {
                path_id: 2,
                data: vec![22, 22],
            },
            AssetReplacer::Remove { path_id: 3 },
            AssetReplacer::Replace {
                path_id: 9,
                data: vec![9],
            },
        ];

        let mut out = Vec::new();
        codec.rewrite(&original, &reps, &[], &mut out).unwrap();
        let (dir, entries) = codec.unpack(&out).unwrap();

        assert!(!dir.compressed);
        let got: Vec<(&str, &[u8])> = entries
            .iter()
            .map(|e| (e.name.as_str(), e.data.as_slice()))
            .collect();
        assert_eq!(
            got,
            vec![("1", &[1u8][..]), ("2", &[22, 22][..]), ("9", &[9][..])]
        );
    }
}
