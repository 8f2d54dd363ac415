//! Shared argument types used across multiple commands.

use std::path::PathBuf;

use anyhow::Context;
use bundlepatch_core::PatchOptions;

#[derive(clap::Args, Debug, Clone, Default)]
pub struct OptionsArgs {
    /// Options file (YAML); flags and environment override it
    #[arg(long, env = "BUNDLEPATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Use bare entry names for exported and imported files
    #[arg(long)]
    pub keep_names: bool,

    /// Keep <file>.decomp after the run
    #[arg(long)]
    pub keep_decomp: bool,

    /// Overwrite an existing <file>.decomp
    #[arg(long)]
    pub force_decomp: bool,

    /// Decompress into memory instead of <file>.decomp
    #[arg(long)]
    pub memory: bool,

    /// Export: also write raw entries to the output directory
    #[arg(long)]
    pub keep_raw: bool,
}

impl OptionsArgs {
    /// Defaults, then the options file, then environment, then flags.
    pub fn resolve(&self) -> anyhow::Result<PatchOptions> {
        let base = match &self.config {
            Some(path) => PatchOptions::load(path)
                .with_context(|| format!("failed to load options from {}", path.display()))?,
            None => PatchOptions::default(),
        };
        let mut options = base.with_env();

        // Flags can only switch options on.
        options.keep_original_entry_names |= self.keep_names;
        options.keep_decompressed_file |= self.keep_decomp;
        options.force_overwrite_decompressed_file |= self.force_decomp;
        options.decompress_to_memory |= self.memory;
        options.keep_raw_entries |= self.keep_raw;
        Ok(options)
    }
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct ReportArgs {
    /// Print the run report as JSON on stdout
    #[arg(long)]
    pub json: bool,
}
