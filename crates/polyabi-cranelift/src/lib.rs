//! Cranelift emission of reabstraction code
//!
//! This crate emits the conversions between the substituted representation
//! of a value and the abstract representation generic code works with:
//!
//! - `existential`: opening existential containers into metadata and witnesses
//! - `transform`: `unsubstitute` / `resubstitute` over exploded values and memory
//! - `thunk`: functions with a substituted signature that call generic code
//! - `compiler`: object file output for thunks

pub mod abi;
pub mod compiler;
pub mod emit;
mod errors;
pub mod existential;
pub mod explosion;
pub mod thunk;
pub mod transform;

#[cfg(test)]
mod tests;

pub use compiler::ThunkCompiler;
pub use emit::FunctionEmitter;
pub use errors::{CompilationError, CompilationErrorKind, CompilationResult};
pub use existential::{ExistentialSubstitution, ExistentialSubstitutionMap, extract_existential};
pub use explosion::Explosion;
pub use thunk::{DefaultWitnessSymbols, DefinedThunk, ThunkBuilder, ThunkRequest, WitnessSymbols};
pub use transform::{ReabstractionSession, resubstitute, unsubstitute};

/// Compile thunks for `requests` into an object file.
pub fn compile_thunks_to_object<'db>(
    db: &'db dyn salsa::Database,
    requests: &[ThunkRequest<'db>],
    target: Option<target_lexicon::Triple>,
) -> CompilationResult<Vec<u8>> {
    let mut compiler = ThunkCompiler::new(target)?;
    for request in requests {
        compiler.define_thunk(db, request)?;
    }
    compiler.finish()
}
