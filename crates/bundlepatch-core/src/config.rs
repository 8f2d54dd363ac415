//! Run options.
//!
//! Options are layered: defaults, then an optional YAML file, then
//! environment variables, then whatever the caller sets explicitly.
//!
//! | Environment Variable | Option |
//! |----------------------|--------|
//! | `BUNDLEPATCH_KEEP_NAMES` | `keep_original_entry_names` |
//! | `BUNDLEPATCH_KEEP_DECOMP` | `keep_decompressed_file` |
//! | `BUNDLEPATCH_FORCE_DECOMP` | `force_overwrite_decompressed_file` |
//! | `BUNDLEPATCH_DECOMP_MEMORY` | `decompress_to_memory` |
//! | `BUNDLEPATCH_KEEP_RAW` | `keep_raw_entries` |

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PatchError, PatchResult};

/// Options shared by export, import and package application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchOptions {
    /// Match replacement files by bare entry name instead of
    /// `<container>_<entry>`.
    #[serde(default)]
    pub keep_original_entry_names: bool,

    /// Leave `<target>.decomp` on disk after the run.
    #[serde(default)]
    pub keep_decompressed_file: bool,

    /// Overwrite an existing `.decomp` file. The decompressed image is
    /// always rewritten, so this only documents intent.
    #[serde(default)]
    pub force_overwrite_decompressed_file: bool,

    /// Decompress into memory; no `.decomp` file is created or cleaned up.
    #[serde(default)]
    pub decompress_to_memory: bool,

    /// Export: also write each raw entry next to the exported documents.
    #[serde(default)]
    pub keep_raw_entries: bool,
}

impl PatchOptions {
    /// Parse options from YAML.
    pub fn from_yaml(content: &str) -> PatchResult<Self> {
        serde_yaml::from_str(content).map_err(|e| PatchError::Config {
            message: format!("invalid options: {e}"),
        })
    }

    /// Load options from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> PatchResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PatchError::MissingInput {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| PatchError::io(format!("failed to read {}", path.display()), e))?;
        Self::from_yaml(&content)
    }

    /// Defaults overlaid with environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Overlay environment variables that are set.
    pub fn with_env(mut self) -> Self {
        let flag = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        };
        if let Some(v) = flag("BUNDLEPATCH_KEEP_NAMES") {
            self.keep_original_entry_names = v;
        }
        if let Some(v) = flag("BUNDLEPATCH_KEEP_DECOMP") {
            self.keep_decompressed_file = v;
        }
        if let Some(v) = flag("BUNDLEPATCH_FORCE_DECOMP") {
            self.force_overwrite_decompressed_file = v;
        }
        if let Some(v) = flag("BUNDLEPATCH_DECOMP_MEMORY") {
            self.decompress_to_memory = v;
        }
        if let Some(v) = flag("BUNDLEPATCH_KEEP_RAW") {
            self.keep_raw_entries = v;
        }
        self
    }

    pub fn with_keep_original_entry_names(mut self, keep: bool) -> Self {
        self.keep_original_entry_names = keep;
        self
    }

    pub fn with_keep_decompressed_file(mut self, keep: bool) -> Self {
        self.keep_decompressed_file = keep;
        self
    }

    pub fn with_force_overwrite_decompressed_file(mut self, force: bool) -> Self {
        self.force_overwrite_decompressed_file = force;
        self
    }

    pub fn with_decompress_to_memory(mut self, memory: bool) -> Self {
        self.decompress_to_memory = memory;
        self
    }

    pub fn with_keep_raw_entries(mut self, keep: bool) -> Self {
        self.keep_raw_entries = keep;
        self
    }

    /// Whether a `.decomp` file written during the run is deleted at the end.
    pub fn removes_decompressed_file(&self) -> bool {
        !self.keep_decompressed_file && !self.decompress_to_memory
    }
}
