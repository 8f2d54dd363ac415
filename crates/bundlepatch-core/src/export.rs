//! Batch export of container contents to JSON documents.
//!
//! Every `MonoBehaviour` object with a resolvable field tree becomes
//! `<out>/<display name>.json`, with `/` in the name replaced by `_`. Later
//! objects with the same name overwrite earlier ones.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::batch::{collect_inputs, sniff_file};
use crate::config::PatchOptions;
use crate::container::ContainerCodec;
use crate::document;
use crate::error::{PatchError, PatchResult};
use crate::pipeline::OpenContainer;
use crate::replacer::replacement_file_name;
use crate::report::{BatchReport, EntryOutcome, FileOutcome, FileStatus};
use crate::resolver::{ResolvedObject, TypeResolver};

/// Class name of the objects that are exported.
pub const EXPORTED_TYPE: &str = "MonoBehaviour";

/// File name of an exported document.
pub fn document_file_name(display_name: &str) -> String {
    format!("{}.json", display_name.replace('/', "_"))
}

/// State for one export run.
///
/// Owns the resolver cache, so type information loaded for one entry is
/// reused by the following entries and files of the run.
pub struct ExportContext<'a, R: TypeResolver> {
    codec: &'a dyn ContainerCodec,
    resolver: &'a R,
    options: &'a PatchOptions,
    cache: R::Cache,
}

impl<'a, R: TypeResolver> ExportContext<'a, R> {
    pub fn new(codec: &'a dyn ContainerCodec, resolver: &'a R, options: &'a PatchOptions) -> Self {
        Self {
            codec,
            resolver,
            options,
            cache: R::Cache::default(),
        }
    }

    pub fn cache(&self) -> &R::Cache {
        &self.cache
    }

    /// Export one container, or every container in a directory, into `out_dir`.
    pub fn export(&self, input: &Path, out_dir: &Path) -> PatchResult<BatchReport> {
        let inputs = collect_inputs(input)?;
        std::fs::create_dir_all(out_dir)
            .map_err(|e| PatchError::io(format!("failed to create {}", out_dir.display()), e))?;

        let mut report = BatchReport::default();
        for path in inputs {
            match self.export_file(&path, out_dir) {
                Ok(outcome) => report.push(outcome),
                Err(e) if e.is_recoverable() => {
                    warn!(path = %path.display(), error = %e, "export failed");
                    report.push(FileOutcome::failed(&path, &e));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Export one file. Files that are not containers are reported as skipped.
    pub fn export_file(&self, path: &Path, out_dir: &Path) -> PatchResult<FileOutcome> {
        if !path.is_file() {
            return Err(PatchError::MissingInput {
                path: path.to_path_buf(),
            });
        }
        if !sniff_file(self.codec, path)? {
            debug!(path = %path.display(), "not a container, skipping");
            return Ok(FileOutcome::skipped(path));
        }

        info!(path = %path.display(), "exporting container");
        let mut open = OpenContainer::open(self.codec, path, self.options)?;
        let entries = self.export_entries(path, &mut open, out_dir);
        open.close(self.options);

        let mut outcome = FileOutcome::new(path, FileStatus::Exported);
        outcome.entries = entries;
        Ok(outcome)
    }

    fn export_entries(
        &self,
        path: &Path,
        open: &mut OpenContainer,
        out_dir: &Path,
    ) -> Vec<EntryOutcome> {
        let engine_version = open.directory.engine_version.clone();
        let mut outcomes = Vec::new();

        for entry in &open.directory.entries {
            let data = match open.data.read_entry(entry) {
                Ok(data) => data,
                Err(e) => {
                    outcomes.push(EntryOutcome::failed(&entry.name, &per_entry(&entry.name, e)));
                    continue;
                }
            };

            if self.options.keep_raw_entries {
                let raw = out_dir.join(replacement_file_name(
                    path,
                    &entry.name,
                    self.options.keep_original_entry_names,
                ));
                info!(entry = %entry.name, path = %raw.display(), "writing raw entry");
                outcomes.push(match write_file(&raw, &data) {
                    Ok(()) => EntryOutcome::ok(&entry.name, Some(raw)),
                    Err(e) => EntryOutcome::failed(&entry.name, &e),
                });
            }

            let objects = match self.resolver.load(
                &self.cache,
                &entry.name,
                &data,
                engine_version.as_deref(),
            ) {
                Ok(objects) => objects,
                Err(e) => {
                    warn!(entry = %entry.name, error = %e, "skipping entry");
                    outcomes.push(EntryOutcome::failed(&entry.name, &per_entry(&entry.name, e)));
                    continue;
                }
            };

            for object in objects.iter().filter(|o| o.type_name == EXPORTED_TYPE) {
                if let Some(outcome) = export_object(object, out_dir) {
                    outcomes.push(outcome);
                }
            }
        }

        outcomes
    }
}

fn export_object(object: &ResolvedObject, out_dir: &Path) -> Option<EntryOutcome> {
    let root = object.root.as_ref()?;
    let target = out_dir.join(document_file_name(&object.display_name));

    let written = document::serialize(root, true)
        .map_err(PatchError::from)
        .and_then(|doc| {
            serde_json::to_string_pretty(&doc).map_err(|e| PatchError::Container {
                message: format!("failed to encode document: {e}"),
            })
        })
        .and_then(|text| write_file(&target, text.as_bytes()));

    Some(match written {
        Ok(()) => {
            info!(object = %object.display_name, path = %target.display(), "exported object");
            EntryOutcome::ok(&object.display_name, Some(target))
        }
        Err(e) => {
            warn!(object = %object.display_name, error = %e, "skipping object");
            EntryOutcome::failed(&object.display_name, &e)
        }
    })
}

fn per_entry(entry: &str, err: PatchError) -> PatchError {
    PatchError::PerEntryLoad {
        entry: entry.to_string(),
        message: err.to_string(),
    }
}

fn write_file(path: &Path, data: &[u8]) -> PatchResult<()> {
    std::fs::write(path, data)
        .map_err(|e| PatchError::io(format!("failed to write {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{sibling_path, DECOMP_SUFFIX};
    use crate::container::OutputEntry;
    use crate::flat::FlatCodec;
    use crate::resolver::TypeTreeDumpResolver;
    use serde_json::{json, Value};
    use std::fs;

    fn dump(objects: Value) -> Vec<u8> {
        json!({ "engine_version": "0.0.0", "objects": objects })
            .to_string()
            .into_bytes()
    }

    fn write_bundle(path: &Path, entries: Vec<(&str, Vec<u8>)>) {
        let entries: Vec<OutputEntry> = entries
            .into_iter()
            .map(|(name, data)| OutputEntry {
                name: name.into(),
                data,
            })
            .collect();
        fs::write(
            path,
            FlatCodec
                .pack_to_vec(Some("2021.3.1f1"), &entries, true)
                .unwrap(),
        )
        .unwrap();
    }

    fn boss_root() -> Value {
        json!({
            "name": "Base", "shape": "object", "children": [
                {"name": "m_Name", "shape": "scalar", "value": {"type": "string", "value": "Boss"}},
                {"name": "hp", "shape": "scalar", "value": {"type": "int32", "value": 120}}
            ]
        })
    }

    #[test]
    fn test_document_file_name() {
        assert_eq!(document_file_name("ui/boss"), "ui_boss.json");
        assert_eq!(document_file_name("Boss"), "Boss.json");
    }

    #[test]
    fn test_export_monobehaviours_only() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("level0.bundle");
        let out = dir.path().join("out");
        write_bundle(
            &bundle,
            vec![
                (
                    "CAB-a",
                    dump(json!([
                        {"path_id": 1, "type_name": "MonoBehaviour", "name": "ui/Boss", "root": boss_root()},
                        {"path_id": 2, "type_name": "Texture2D", "name": "tex", "root": boss_root()},
                        {"path_id": 3, "type_name": "MonoBehaviour", "name": "NoTree"}
                    ])),
                ),
                ("CAB-b", b"not json".to_vec()),
            ],
        );

        let options = PatchOptions::default();
        let ctx = ExportContext::new(&FlatCodec, &TypeTreeDumpResolver, &options);
        let report = ctx.export(&bundle, &out).unwrap();

        let file = &report.files[0];
        assert_eq!(file.status, FileStatus::Exported);
        assert_eq!(file.failed_entries().count(), 1);
        assert_eq!(file.failed_entries().next().unwrap().name, "CAB-b");

        let doc: Value =
            serde_json::from_str(&fs::read_to_string(out.join("ui_Boss.json")).unwrap()).unwrap();
        assert_eq!(doc, json!({"hp": 120}));
        assert!(!out.join("tex.json").exists());
        assert_eq!(fs::read_dir(&out).unwrap().count(), 1);
        assert!(!sibling_path(&bundle, DECOMP_SUFFIX).exists());
        assert!(ctx.cache().is_loaded("2021.3.1f1"));
    }

    #[test]
    fn test_export_keeps_raw_entries() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("level0.bundle");
        let out = dir.path().join("out");
        write_bundle(&bundle, vec![("CAB-a", dump(json!([])))]);

        let options = PatchOptions::default().with_keep_raw_entries(true);
        let ctx = ExportContext::new(&FlatCodec, &TypeTreeDumpResolver, &options);
        ctx.export(&bundle, &out).unwrap();

        assert_eq!(
            fs::read(out.join("level0.bundle_CAB-a")).unwrap(),
            dump(json!([]))
        );
    }

    #[test]
    fn test_oversized_entry_fails_only_its_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();

        // Uncompressed header declaring a 64 TiB entry over a 3 byte payload.
        let mut bad = b"BPAK\x01\x00".to_vec();
        bad.extend_from_slice(&0u16.to_le_bytes());
        bad.extend_from_slice(&1u32.to_le_bytes());
        bad.extend_from_slice(&5u16.to_le_bytes());
        bad.extend_from_slice(b"CAB-a");
        bad.extend_from_slice(&(1u64 << 46).to_le_bytes());
        bad.extend_from_slice(&[1, 2, 3]);
        fs::write(dir.path().join("a.bundle"), bad).unwrap();
        write_bundle(
            &dir.path().join("b.bundle"),
            vec![(
                "CAB-b",
                dump(json!([
                    {"path_id": 1, "type_name": "MonoBehaviour", "name": "Boss", "root": boss_root()}
                ])),
            )],
        );

        let options = PatchOptions::default();
        let ctx = ExportContext::new(&FlatCodec, &TypeTreeDumpResolver, &options);
        let report = ctx.export(dir.path(), out.path()).unwrap();

        let bad = report.file(&dir.path().join("a.bundle")).unwrap();
        assert_eq!(bad.status, FileStatus::Failed);
        assert!(bad.error.as_deref().unwrap().contains("truncated"));
        let good = report.file(&dir.path().join("b.bundle")).unwrap();
        assert_eq!(good.status, FileStatus::Exported);
        assert!(out.path().join("Boss.json").exists());
    }

    #[test]
    fn test_export_directory_skips_non_containers() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_bundle(&dir.path().join("a.bundle"), vec![("CAB-a", dump(json!([])))]);
        fs::write(dir.path().join("readme.txt"), b"hi").unwrap();

        let options = PatchOptions::default().with_decompress_to_memory(true);
        let ctx = ExportContext::new(&FlatCodec, &TypeTreeDumpResolver, &options);
        let report = ctx.export(dir.path(), out.path()).unwrap();

        assert_eq!(report.count(FileStatus::Exported), 1);
        assert_eq!(report.count(FileStatus::Skipped), 1);
        assert!(report.is_success());
    }
}
