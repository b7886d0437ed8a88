//! Object file compilation of thunks
//!
//! Configures a Cranelift object module for a target triple and collects
//! any number of thunks into one relocatable object.

use cranelift_codegen::settings::{self, Configurable};
use cranelift_object::{ObjectBuilder, ObjectModule};
use polyabi_core::TargetInfo;
use target_lexicon::Triple;

use crate::CompilationResult;
use crate::thunk::{DefaultWitnessSymbols, DefinedThunk, ThunkBuilder, ThunkRequest, WitnessSymbols};

/// Compiles thunks into an object file.
pub struct ThunkCompiler {
    module: ObjectModule,
    target: TargetInfo,
    symbols: Box<dyn WitnessSymbols>,
}

impl ThunkCompiler {
    /// Create a compiler for the given target, the host if not specified.
    pub fn new(target: Option<Triple>) -> CompilationResult<Self> {
        let triple = target.unwrap_or_else(Triple::host);
        let target = TargetInfo::from_triple(&triple)?;

        let mut flag_builder = settings::builder();
        flag_builder.set("use_colocated_libcalls", "false")?;
        flag_builder.set("is_pic", "false")?;

        let isa = cranelift_codegen::isa::lookup(triple.clone())?
            .finish(settings::Flags::new(flag_builder))?;

        let object_builder = ObjectBuilder::new(
            isa,
            format!("polyabi_{triple}"),
            cranelift_module::default_libcall_names(),
        )?;

        Ok(ThunkCompiler {
            module: ObjectModule::new(object_builder),
            target,
            symbols: Box::new(DefaultWitnessSymbols),
        })
    }

    /// Use `symbols` to name metadata and witness tables of concrete types.
    pub fn with_symbols(mut self, symbols: impl WitnessSymbols + 'static) -> Self {
        self.symbols = Box::new(symbols);
        self
    }

    pub fn target(&self) -> TargetInfo {
        self.target
    }

    pub fn define_thunk<'db>(
        &mut self,
        db: &'db dyn salsa::Database,
        request: &ThunkRequest<'db>,
    ) -> CompilationResult<DefinedThunk> {
        ThunkBuilder::new(&mut self.module, self.target, self.symbols.as_ref()).define(db, request)
    }

    /// Finish the module and return the object file bytes.
    pub fn finish(self) -> CompilationResult<Vec<u8>> {
        let product = self.module.finish();
        Ok(product.emit()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_host_target() {
        let compiler = ThunkCompiler::new(None).unwrap();
        assert_eq!(compiler.target(), TargetInfo::host());
    }

    #[test]
    fn empty_module_still_emits_an_object() {
        let bytes = ThunkCompiler::new(None).unwrap().finish().unwrap();
        assert!(!bytes.is_empty());
    }
}
