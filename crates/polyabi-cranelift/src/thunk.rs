//! Thunks calling generic code from a substituted signature.
//!
//! A thunk has the signature of the substituted function type. It converts
//! every argument into the abstract representation, appends the polymorphic
//! arguments the generic callee needs, calls it, and converts the result back
//! into the caller's representation.

use std::collections::HashMap;

use cranelift_codegen::ir::{GlobalValue, InstBuilder, Value};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_module::{FuncId, Linkage, Module};
use polyabi_core::{
    AbstractionComparator, CanonicalType, ConformanceSource, ExplosionKind, InvariantViolation,
    PassingConvention, Protocol, SubstitutionList, TargetInfo, TypeKind, existential_slots,
    explosion_size, is_passed_by_address, pair_types, type_layout,
};

use crate::abi::{container_area_offset, lower_signature, polymorphic_arity};
use crate::emit::FunctionEmitter;
use crate::explosion::Explosion;
use crate::transform::ReabstractionSession;
use crate::{CompilationError, CompilationResult};

/// Names of the statically known runtime data a thunk references.
pub trait WitnessSymbols {
    /// Type metadata of a concrete type.
    fn metadata(&self, db: &dyn salsa::Database, ty: CanonicalType<'_>) -> String;

    /// Witness table for `ty`'s conformance to `protocol`.
    fn witness_table(
        &self,
        db: &dyn salsa::Database,
        ty: CanonicalType<'_>,
        protocol: Protocol<'_>,
    ) -> String;
}

/// Readable symbol names derived from the printed type.
///
/// `(i32, f64)` conforming to `Hash` becomes `$s_i32_f64_$Hash$wt`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultWitnessSymbols;

impl DefaultWitnessSymbols {
    fn type_name(db: &dyn salsa::Database, ty: CanonicalType<'_>) -> String {
        ty.display(db)
            .to_string()
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }
}

impl WitnessSymbols for DefaultWitnessSymbols {
    fn metadata(&self, db: &dyn salsa::Database, ty: CanonicalType<'_>) -> String {
        format!("$s{}$md", Self::type_name(db, ty))
    }

    fn witness_table(
        &self,
        db: &dyn salsa::Database,
        ty: CanonicalType<'_>,
        protocol: Protocol<'_>,
    ) -> String {
        format!("$s{}${}$wt", Self::type_name(db, ty), protocol.name(db))
    }
}

/// One thunk to generate.
#[derive(Clone, Debug)]
pub struct ThunkRequest<'db> {
    /// Exported name of the thunk.
    pub name: String,
    /// Imported name of the generic function.
    pub callee: String,
    /// Abstract function type of the callee.
    pub orig: CanonicalType<'db>,
    /// Substituted function type the thunk presents.
    pub subst: CanonicalType<'db>,
    pub substitutions: SubstitutionList<'db>,
    pub kind: ExplosionKind,
}

/// A thunk defined in the module.
#[derive(Clone, Debug)]
pub struct DefinedThunk {
    pub id: FuncId,
    /// Cranelift IR of the thunk before compilation.
    pub clif: String,
}

/// Defines thunks into a Cranelift module.
pub struct ThunkBuilder<'m, M: Module> {
    module: &'m mut M,
    target: TargetInfo,
    symbols: &'m dyn WitnessSymbols,
}

impl<'m, M: Module> ThunkBuilder<'m, M> {
    pub fn new(module: &'m mut M, target: TargetInfo, symbols: &'m dyn WitnessSymbols) -> Self {
        Self {
            module,
            target,
            symbols,
        }
    }

    pub fn define<'db>(
        &mut self,
        db: &'db dyn salsa::Database,
        request: &ThunkRequest<'db>,
    ) -> CompilationResult<DefinedThunk> {
        let kind = request.kind;
        let (orig_params, orig_result) = request
            .orig
            .function_parts(db)
            .ok_or_else(|| InvariantViolation::expected_function(db, request.orig))?;
        let (subst_params, subst_result) = request
            .subst
            .function_parts(db)
            .ok_or_else(|| InvariantViolation::expected_function(db, request.subst))?;
        // Rejects mismatched parameter counts.
        pair_types(db, request.orig, request.subst)?;
        self.check_forwardable(db, &request.substitutions)?;

        let call_conv = self.module.isa().default_call_conv();
        let polymorphic = polymorphic_arity(db, &request.substitutions);
        let thunk_sig = lower_signature(db, self.target, request.subst, kind, call_conv, 0)?;
        let callee_sig =
            lower_signature(db, self.target, request.orig, kind, call_conv, polymorphic)?;

        let thunk_id =
            self.module
                .declare_function(&request.name, Linkage::Export, &thunk_sig.signature)?;
        let callee_id =
            self.module
                .declare_function(&request.callee, Linkage::Import, &callee_sig.signature)?;

        tracing::debug!(
            thunk = %request.name,
            callee = %request.callee,
            subst = %request.subst.display(db),
            "defining thunk"
        );

        let mut ctx = self.module.make_context();
        ctx.func.signature = thunk_sig.signature.clone();

        let mut func_ctx = FunctionBuilderContext::new();
        let mut builder = FunctionBuilder::new(&mut ctx.func, &mut func_ctx);
        let entry_block = builder.create_block();
        builder.append_block_params_for_function_params(entry_block);
        builder.switch_to_block(entry_block);
        builder.seal_block(entry_block);
        let incoming_values = builder.block_params(entry_block).to_vec();
        let callee_ref = self.module.declare_func_in_func(callee_id, builder.func);

        let mut emitter = FunctionEmitter::new(builder, self.target);
        {
            let mut session = ReabstractionSession::new(&mut emitter, db, &request.substitutions);
            let comparator = AbstractionComparator::new(db);
            let mut incoming = Explosion::from_values(kind, incoming_values);

            let caller_buffer = match thunk_sig.result {
                PassingConvention::Indirect => Some(incoming.claim_next()?),
                PassingConvention::Direct => None,
            };

            // Where the callee writes an indirect result, and whether that is
            // already the caller's buffer.
            let mut args = Vec::with_capacity(callee_sig.signature.params.len());
            let callee_buffer = match (callee_sig.result, caller_buffer) {
                (PassingConvention::Direct, _) => None,
                (PassingConvention::Indirect, Some(buffer))
                    if !comparator.differs_in_memory(orig_result, subst_result)? =>
                {
                    Some((buffer, true))
                }
                (PassingConvention::Indirect, _) => {
                    let layout = type_layout(db, self.target, orig_result);
                    Some((session.emitter().alloc_stack(layout), false))
                }
            };
            if let Some((buffer, _)) = callee_buffer {
                args.push(buffer);
            }

            let params = orig_params.iter().zip(subst_params.iter());
            let conventions = callee_sig.params.iter().zip(thunk_sig.params.iter());
            for ((&orig, &subst), (&orig_conv, &subst_conv)) in params.zip(conventions) {
                match (orig_conv, subst_conv) {
                    (PassingConvention::Direct, PassingConvention::Direct) => {
                        let converted = session.unsubstitute(orig, subst, &mut incoming)?;
                        args.extend(converted.into_values());
                    }
                    (PassingConvention::Indirect, PassingConvention::Indirect) => {
                        let addr = incoming.claim_next()?;
                        args.push(session.unsubstitute_address(orig, subst, addr)?);
                    }
                    (PassingConvention::Indirect, PassingConvention::Direct) => {
                        let values = incoming.claim(explosion_size(db, subst, kind))?;
                        let addr = session.emitter().spill(db, subst, kind, &values)?;
                        args.push(session.unsubstitute_address(orig, subst, addr)?);
                    }
                    (PassingConvention::Direct, PassingConvention::Indirect) => {
                        let addr = incoming.claim_next()?;
                        let values = session.emitter().reload(db, subst, kind, addr);
                        let mut loaded = Explosion::from_values(kind, values);
                        let converted = session.unsubstitute(orig, subst, &mut loaded)?;
                        args.extend(converted.into_values());
                    }
                }
            }

            self.push_polymorphic_args(db, &mut session, &request.substitutions, &mut args)?;

            let builder = session.emitter().builder();
            let call = builder.ins().call(callee_ref, &args);
            let results = builder.inst_results(call).to_vec();

            // Containers of the result must outlive this frame.
            let slots = existential_slots(db, subst_result);
            if let (Some(buffer), true) = (caller_buffer, slots > 0) {
                let offset = container_area_offset(db, self.target, subst_result);
                session.set_container_storage(buffer, offset, slots);
            }

            let returned = match (callee_sig.result, caller_buffer) {
                (PassingConvention::Direct, None) => {
                    let mut results = Explosion::from_values(kind, results);
                    session
                        .resubstitute(orig_result, subst_result, &mut results)?
                        .into_values()
                }
                (PassingConvention::Direct, Some(buffer)) => {
                    let mut results = Explosion::from_values(kind, results);
                    let converted = session.resubstitute(orig_result, subst_result, &mut results)?;
                    store_result(
                        session.emitter(),
                        db,
                        subst_result,
                        kind,
                        converted.values(),
                        buffer,
                    )?;
                    Vec::new()
                }
                (PassingConvention::Indirect, caller_buffer) => {
                    let (buffer, in_place) = callee_buffer.ok_or_else(|| {
                        CompilationError::codegen("indirect result without a buffer")
                    })?;
                    let converted =
                        session.resubstitute_address(orig_result, subst_result, buffer)?;
                    match caller_buffer {
                        Some(_) if in_place => Vec::new(),
                        Some(out) => {
                            session
                                .emitter()
                                .copy_value(db, subst_result, (converted, 0), (out, 0));
                            Vec::new()
                        }
                        None => session.emitter().reload(db, subst_result, kind, converted),
                    }
                }
            };

            if !incoming.is_exhausted() {
                return Err(CompilationError::codegen(format!(
                    "thunk `{}` left {} incoming value(s) unused",
                    request.name,
                    incoming.remaining()
                )));
            }
            session.emitter().builder().ins().return_(&returned);
        }
        emitter.finalize();

        let clif = ctx.func.display().to_string();
        self.module.define_function(thunk_id, &mut ctx)?;
        self.module.clear_context(&mut ctx);

        Ok(DefinedThunk { id: thunk_id, clif })
    }

    /// Standalone thunks cannot forward metadata of the caller's own archetypes.
    fn check_forwardable<'db>(
        &self,
        db: &'db dyn salsa::Database,
        substitutions: &SubstitutionList<'db>,
    ) -> CompilationResult<()> {
        for entry in substitutions.iter() {
            if entry.replacement.is_archetype(db) {
                return Err(CompilationError::unsupported(format!(
                    "archetype `{}` is bound to archetype `{}` of the caller",
                    entry.archetype.display(db),
                    entry.replacement.display(db)
                )));
            }
        }
        Ok(())
    }

    fn push_polymorphic_args<'db>(
        &mut self,
        db: &'db dyn salsa::Database,
        session: &mut ReabstractionSession<'_, '_, 'db>,
        substitutions: &SubstitutionList<'db>,
        args: &mut Vec<Value>,
    ) -> CompilationResult<()> {
        let mut symbols: HashMap<String, GlobalValue> = HashMap::new();
        for entry in substitutions.iter() {
            let dynamic = match entry.replacement.kind(db) {
                TypeKind::Existential(_) => {
                    let record = session.existentials().get(entry.archetype).ok_or_else(|| {
                        CompilationError::unsupported(format!(
                            "no parameter supplies the existential bound to `{}`",
                            entry.archetype.display(db)
                        ))
                    })?;
                    Some((record.metadata, record.witness_table))
                }
                _ => None,
            };

            let metadata = match dynamic {
                Some((metadata, _)) => metadata,
                None => {
                    let name = self.symbols.metadata(db, entry.replacement);
                    self.symbol_address(session, &mut symbols, name)?
                }
            };
            args.push(metadata);

            for conformance in &entry.conformances {
                let table = match (conformance.source, dynamic) {
                    (ConformanceSource::Existential, Some((_, table))) => table,
                    _ => {
                        let name =
                            self.symbols
                                .witness_table(db, entry.replacement, conformance.protocol);
                        self.symbol_address(session, &mut symbols, name)?
                    }
                };
                args.push(table);
            }
        }
        Ok(())
    }

    fn symbol_address(
        &mut self,
        session: &mut ReabstractionSession<'_, '_, '_>,
        declared: &mut HashMap<String, GlobalValue>,
        name: String,
    ) -> CompilationResult<Value> {
        let emitter = session.emitter();
        let global = match declared.get(&name) {
            Some(&global) => global,
            None => {
                let data_id = self.module.declare_data(&name, Linkage::Import, false, false)?;
                let global = self
                    .module
                    .declare_data_in_func(data_id, emitter.builder().func);
                declared.insert(name, global);
                global
            }
        };
        let ptr = emitter.pointer_type();
        Ok(emitter.builder().ins().symbol_value(ptr, global))
    }
}

/// Write a converted result into the caller's buffer.
fn store_result<'db>(
    emitter: &mut FunctionEmitter<'_>,
    db: &'db dyn salsa::Database,
    ty: CanonicalType<'db>,
    kind: ExplosionKind,
    values: &[Value],
    buffer: Value,
) -> CompilationResult<()> {
    if is_passed_by_address(db, ty, kind) {
        let src = emitter.spill(db, ty, kind, values)?;
        emitter.copy_value(db, ty, (src, 0), (buffer, 0));
        Ok(())
    } else {
        emitter.store_leaves(db, ty, values, buffer, 0)
    }
}
