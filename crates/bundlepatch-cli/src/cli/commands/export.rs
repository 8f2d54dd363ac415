use bundlepatch_core::{ExportContext, FlatCodec, TypeTreeDumpResolver};

use super::super::args::ExportArgs;
use super::reporting;

pub fn run(args: ExportArgs) -> anyhow::Result<i32> {
    let options = args.options.resolve()?;
    let ctx = ExportContext::new(&FlatCodec, &TypeTreeDumpResolver, &options);
    let report = ctx.export(&args.input, &args.out)?;
    reporting::finish(&report, &args.output)
}
