use crate::cli::args::{Cli, Command};
use crate::exit_codes::EXIT_SUCCESS;

pub fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Export(args) => super::export::run(args),
        Command::Import(args) => super::import::run(args),
        Command::ApplyPackage(args) => super::package::run(args),
        Command::Decompress(args) => super::decompress::run(args),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(EXIT_SUCCESS)
        }
    }
}
