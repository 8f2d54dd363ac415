use bundlepatch_core::{BackupManager, BatchReport, FlatCodec, PatchOptions, PatchPipeline};

use super::super::args::DecompressArgs;
use super::reporting;

pub fn run(args: DecompressArgs) -> anyhow::Result<i32> {
    let options = PatchOptions::from_env();
    let backups = BackupManager::new();
    let mut pipeline = PatchPipeline::new(&FlatCodec, &FlatCodec, &options, &backups);

    let mut report = BatchReport::default();
    report.push(pipeline.decompress_only(&args.file)?);
    reporting::finish(&report, &args.output)
}
