use bundlepatch_core::{import_directory, BackupManager, FlatCodec};

use super::super::args::ImportArgs;
use super::reporting;

pub fn run(args: ImportArgs) -> anyhow::Result<i32> {
    let options = args.options.resolve()?;
    let backups = BackupManager::new();
    let report = import_directory(&FlatCodec, &FlatCodec, &options, &backups, &args.dir)?;
    reporting::finish(&report, &args.output)
}
