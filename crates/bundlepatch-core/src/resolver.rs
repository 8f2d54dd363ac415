//! Type resolution boundary.
//!
//! Interpreting an entry's bytes as typed objects needs class databases and
//! type templates that live outside this crate. A [`TypeResolver`] turns one
//! entry into [`ResolvedObject`]s. Loaded class definitions are kept in the
//! resolver's [`TypeResolver::Cache`], which the caller owns for the length
//! of one run and shares read-mostly between entries and files.

use std::collections::BTreeSet;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PatchError, PatchResult};
use crate::field::FieldNode;

/// Engine version written by files that do not record one.
pub const UNKNOWN_ENGINE_VERSION: &str = "0.0.0";

/// One object found in a serialized entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedObject {
    pub path_id: i64,
    /// Class name, e.g. `MonoBehaviour`.
    pub type_name: String,
    /// Display name used for export file names.
    pub display_name: String,
    /// Field tree, if the object's layout could be resolved.
    pub root: Option<FieldNode>,
}

/// Turns entry bytes into typed objects.
pub trait TypeResolver {
    /// Per-run cache of loaded type information.
    type Cache: Default + Sync;

    /// Resolve every object of one entry.
    ///
    /// `fallback_engine_version` is the container's engine version, used
    /// when the entry does not record its own.
    fn load(
        &self,
        cache: &Self::Cache,
        entry_name: &str,
        data: &[u8],
        fallback_engine_version: Option<&str>,
    ) -> PatchResult<Vec<ResolvedObject>>;
}

/// Resolver for entries that already carry their field trees.
///
/// Entry bytes are a JSON document:
///
/// ```json
/// { "engine_version": "2021.3.1f1",
///   "objects": [ { "path_id": 1, "type_name": "MonoBehaviour",
///                  "name": "Boss", "root": { "name": "Base", "shape": "object", "children": [] } } ] }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeTreeDumpResolver;

/// Engine versions whose class database has been loaded in this run.
#[derive(Debug, Default)]
pub struct ClassDatabaseCache {
    loaded: RwLock<BTreeSet<String>>,
}

impl ClassDatabaseCache {
    /// Record `version` as loaded; returns `true` the first time.
    pub fn load(&self, version: &str) -> bool {
        if self
            .loaded
            .read()
            .map(|loaded| loaded.contains(version))
            .unwrap_or(false)
        {
            return false;
        }
        match self.loaded.write() {
            Ok(mut loaded) => loaded.insert(version.to_string()),
            Err(_) => false,
        }
    }

    pub fn is_loaded(&self, version: &str) -> bool {
        self.loaded
            .read()
            .map(|loaded| loaded.contains(version))
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct DumpFile {
    #[serde(default)]
    engine_version: Option<String>,
    #[serde(default)]
    objects: Vec<DumpObject>,
}

#[derive(Debug, Deserialize)]
struct DumpObject {
    path_id: i64,
    type_name: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    root: Option<FieldNode>,
}

impl TypeResolver for TypeTreeDumpResolver {
    type Cache = ClassDatabaseCache;

    fn load(
        &self,
        cache: &Self::Cache,
        entry_name: &str,
        data: &[u8],
        fallback_engine_version: Option<&str>,
    ) -> PatchResult<Vec<ResolvedObject>> {
        let dump: DumpFile = serde_json::from_slice(data).map_err(|e| PatchError::Resolve {
            message: format!("{entry_name}: {e}"),
        })?;

        let version = match dump.engine_version.as_deref() {
            Some(v) if v != UNKNOWN_ENGINE_VERSION => v,
            _ => fallback_engine_version.unwrap_or(UNKNOWN_ENGINE_VERSION),
        };
        if cache.load(version) {
            debug!(version, "loaded class database");
        }

        Ok(dump
            .objects
            .into_iter()
            .map(|o| ResolvedObject {
                display_name: display_name(&o.name, &o.type_name, o.path_id),
                path_id: o.path_id,
                type_name: o.type_name,
                root: o.root,
            })
            .collect())
    }
}

/// Display name of an object: its own name, or `<Type> #<pathId>` when unnamed.
pub fn display_name(name: &str, type_name: &str, path_id: i64) -> String {
    if name.is_empty() {
        format!("{type_name} #{path_id}")
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dump_resolver_reads_objects() {
        let data = json!({
            "engine_version": "0.0.0",
            "objects": [
                {"path_id": 5, "type_name": "MonoBehaviour", "name": "Boss",
                 "root": {"name": "Base", "shape": "object", "children": []}},
                {"path_id": 6, "type_name": "Texture2D"}
            ]
        })
        .to_string();

        let cache = ClassDatabaseCache::default();
        let objects = TypeTreeDumpResolver
            .load(&cache, "CAB-a", data.as_bytes(), Some("2021.3.1f1"))
            .unwrap();

        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].display_name, "Boss");
        assert!(objects[0].root.is_some());
        assert_eq!(objects[1].display_name, "Texture2D #6");
        assert!(objects[1].root.is_none());
        assert!(cache.is_loaded("2021.3.1f1"));
        assert!(!cache.is_loaded("0.0.0"));
    }

    #[test]
    fn test_cache_loads_once() {
        let cache = ClassDatabaseCache::default();
        assert!(cache.load("2022.1.0f1"));
        assert!(!cache.load("2022.1.0f1"));
    }

    #[test]
    fn test_garbage_entry_is_resolve_error() {
        let err = TypeTreeDumpResolver
            .load(&ClassDatabaseCache::default(), "CAB-x", b"\x00\x01", None)
            .unwrap_err();
        assert!(matches!(err, PatchError::Resolve { .. }));
        assert!(err.to_string().contains("CAB-x"));
    }
}
