use bundlepatch_core::{BackupManager, FlatCodec, InstallerPackage, PackageApplier};

use super::super::args::ApplyPackageArgs;
use super::reporting;

pub fn run(args: ApplyPackageArgs) -> anyhow::Result<i32> {
    let options = args.options.resolve()?;
    let package = InstallerPackage::load(&args.package)?;
    let backups = BackupManager::new();
    let applier = PackageApplier::new(&FlatCodec, &FlatCodec, &options, &backups);
    let report = applier.apply(&package, &args.root)?;
    reporting::finish(&report, &args.output)
}
