//! Command-line interface for the polyabi driver.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use polyabi_core::ExplosionKind;

#[derive(Parser)]
#[command(name = "polyabi")]
#[command(about = "Compare abstract and substituted representations and build thunks", long_about = None)]
pub struct Cli {
    /// Log conversion decisions to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print how the two types of a scenario compare, and the thunk IR
    Inspect {
        /// Scenario file
        file: PathBuf,

        #[command(flatten)]
        options: ScenarioArgs,
    },
    /// Compile the thunk of a scenario into an object file
    Emit {
        /// Scenario file
        file: PathBuf,

        /// Output object file
        #[arg(short, long, default_value = "thunk.o")]
        output: PathBuf,

        #[command(flatten)]
        options: ScenarioArgs,
    },
}

#[derive(Args)]
pub struct ScenarioArgs {
    /// Target triple, the host by default
    #[arg(long)]
    pub target: Option<String>,

    /// Explosion used when lowering the thunk
    #[arg(long, value_enum, default_value_t = Explosion::Maximal)]
    pub explosion: Explosion,

    /// Argument clauses passed at once, minus one
    #[arg(long, default_value_t = 0)]
    pub uncurry: u32,

    /// Exported name of the thunk
    #[arg(long, default_value = "thunk")]
    pub thunk: String,

    /// Imported name of the generic function
    #[arg(long, default_value = "generic")]
    pub generic: String,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Explosion {
    Minimal,
    Maximal,
}

impl From<Explosion> for ExplosionKind {
    fn from(explosion: Explosion) -> Self {
        match explosion {
            Explosion::Minimal => ExplosionKind::Minimal,
            Explosion::Maximal => ExplosionKind::Maximal,
        }
    }
}
