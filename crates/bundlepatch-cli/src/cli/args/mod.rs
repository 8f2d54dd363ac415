use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod common;
pub use common::*;

#[derive(Parser)]
#[command(
    name = "bundlepatch",
    version,
    about = "Export, edit and re-import the contents of asset bundle containers"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Export MonoBehaviour objects of a container (or a directory of them) as JSON
    Export(ExportArgs),
    /// Re-import edited entries into every container of a directory
    Import(ImportArgs),
    /// Apply an installer package below a root directory
    ApplyPackage(ApplyPackageArgs),
    /// Decompress a container into <file>.decomp and keep it
    Decompress(DecompressArgs),
    Version,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Container file or directory of containers
    pub input: PathBuf,

    /// Output directory for exported documents
    #[arg(long)]
    pub out: PathBuf,

    #[command(flatten)]
    pub options: OptionsArgs,

    #[command(flatten)]
    pub output: ReportArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    /// Directory holding containers and replacement files
    pub dir: PathBuf,

    #[command(flatten)]
    pub options: OptionsArgs,

    #[command(flatten)]
    pub output: ReportArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ApplyPackageArgs {
    /// Installer package (JSON)
    pub package: PathBuf,

    /// Directory the package paths are relative to
    pub root: PathBuf,

    #[command(flatten)]
    pub options: OptionsArgs,

    #[command(flatten)]
    pub output: ReportArgs,
}

#[derive(Args, Debug, Clone)]
pub struct DecompressArgs {
    /// Container file
    pub file: PathBuf,

    #[command(flatten)]
    pub output: ReportArgs,
}
