//! polyabi CLI entry point.

mod cli;

use std::path::Path;
use std::str::FromStr;

use clap::Parser;
use cli::{Cli, Command, ScenarioArgs};
use polyabi::pipeline::{Options, emit_object, inspect};
use polyabi_core::AbiDatabase;
use target_lexicon::Triple;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Inspect { file, options } => {
            let options = options_from(options);
            let source = read_source(&file);
            let db = AbiDatabase::default();
            match inspect(&db, &source, &options) {
                Ok(report) => print!("{report}"),
                Err(e) => fail(&file, e),
            }
        }
        Command::Emit {
            file,
            output,
            options,
        } => {
            let options = options_from(options);
            let source = read_source(&file);
            let db = AbiDatabase::default();
            let bytes = match emit_object(&db, &source, &options) {
                Ok(bytes) => bytes,
                Err(e) => fail(&file, e),
            };
            if let Err(e) = std::fs::write(&output, &bytes) {
                eprintln!("Error writing {}: {e}", output.display());
                std::process::exit(1);
            }
            tracing::info!(output = %output.display(), bytes = bytes.len(), "object written");
        }
    }
}

fn init_tracing(verbose: bool) {
    let directive = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn options_from(args: ScenarioArgs) -> Options {
    let target = args.target.map(|triple| match Triple::from_str(&triple) {
        Ok(triple) => triple,
        Err(e) => {
            eprintln!("Invalid target `{triple}`: {e}");
            std::process::exit(1);
        }
    });
    Options {
        target,
        explosion: args.explosion.into(),
        uncurry_level: args.uncurry,
        thunk_name: args.thunk,
        generic_name: args.generic,
    }
}

fn read_source(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error reading file: {e}");
            std::process::exit(1);
        }
    }
}

fn fail(path: &Path, error: impl std::fmt::Display) -> ! {
    eprintln!("{}: {error}", path.display());
    std::process::exit(1);
}
