//! Driver for the polymorphic value translation core.
//!
//! Reads textual scenarios (see [`parser`]) and runs them through the
//! comparator and thunk compiler (see [`pipeline`]).

pub mod parser;
pub mod pipeline;

pub use parser::{ParseError, Scenario, TypeEnv, parse_type};
pub use pipeline::{Comparison, Options, PipelineError, Report, compare, emit_object, inspect};
