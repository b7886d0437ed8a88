//! Lowering of canonical function types to Cranelift signatures.
//!
//! Parameters are passed as their explosion, or as one pointer when
//! indirect. An indirect result is written through a caller-provided buffer
//! whose address is the first parameter. Existential containers referenced
//! by the result are stored in the same buffer after the value, so the
//! buffer is sized by [`result_buffer_layout`]. Generic callees additionally take
//! their polymorphic arguments after the ordinary ones: for every
//! substitution entry the type metadata followed by one witness table per
//! protocol of the archetype.

use cranelift_codegen::ir::{AbiParam, Signature, Type, types};
use cranelift_codegen::isa::CallConv;
use polyabi_core::{
    CanonicalType, ExplosionKind, InvariantViolation, PassingConvention, ScalarKind,
    SubstitutionList, TargetInfo, TypeLayout, existential_slots, explosion_schema,
    passing_convention, result_passing, type_layout,
};

use crate::CompilationResult;
use crate::existential::container_layout;

pub fn pointer_type(target: TargetInfo) -> Type {
    match target.pointer_bytes() {
        4 => types::I32,
        _ => types::I64,
    }
}

/// Cranelift type of one explosion piece.
pub fn scalar_type(target: TargetInfo, kind: ScalarKind) -> Type {
    match kind {
        ScalarKind::I8 => types::I8,
        ScalarKind::I16 => types::I16,
        ScalarKind::I32 => types::I32,
        ScalarKind::I64 => types::I64,
        ScalarKind::F32 => types::F32,
        ScalarKind::F64 => types::F64,
        ScalarKind::Pointer | ScalarKind::Reference | ScalarKind::Opaque => pointer_type(target),
    }
}

/// Offset of the first container slot in a result buffer for `ty`.
pub fn container_area_offset<'db>(
    db: &'db dyn salsa::Database,
    target: TargetInfo,
    ty: CanonicalType<'db>,
) -> u32 {
    let value = type_layout(db, target, ty);
    value.size.next_multiple_of(target.pointer_bytes())
}

/// Layout of the buffer a caller provides for an indirect result of `ty`.
pub fn result_buffer_layout<'db>(
    db: &'db dyn salsa::Database,
    target: TargetInfo,
    ty: CanonicalType<'db>,
) -> TypeLayout {
    let value = type_layout(db, target, ty);
    let slots = existential_slots(db, ty) as u32;
    if slots == 0 {
        return value;
    }
    let container = container_layout(target);
    TypeLayout {
        size: container_area_offset(db, target, ty) + slots * container.size,
        alignment: value.alignment.max(container.alignment),
    }
}

/// Number of polymorphic arguments a generic callee takes.
pub fn polymorphic_arity<'db>(
    db: &'db dyn salsa::Database,
    substitutions: &SubstitutionList<'db>,
) -> usize {
    substitutions
        .iter()
        .map(|entry| 1 + entry.archetype.archetype_protocols(db).len())
        .sum()
}

#[derive(Clone, Debug)]
pub struct LoweredSignature {
    pub signature: Signature,
    /// Convention of each parameter, in declaration order.
    pub params: Vec<PassingConvention>,
    pub result: PassingConvention,
    pub polymorphic_params: usize,
}

pub fn lower_signature<'db>(
    db: &'db dyn salsa::Database,
    target: TargetInfo,
    func_ty: CanonicalType<'db>,
    kind: ExplosionKind,
    call_conv: CallConv,
    polymorphic_params: usize,
) -> CompilationResult<LoweredSignature> {
    let (params, result) = func_ty
        .function_parts(db)
        .ok_or_else(|| InvariantViolation::expected_function(db, func_ty))?;
    let ptr = pointer_type(target);
    let mut signature = Signature::new(call_conv);

    let result_lowering = result_passing(db, result, kind);
    match result_lowering {
        PassingConvention::Indirect => signature.params.push(AbiParam::new(ptr)),
        PassingConvention::Direct => signature.returns.extend(
            explosion_schema(db, result, kind)
                .into_iter()
                .map(|piece| AbiParam::new(scalar_type(target, piece))),
        ),
    }

    let mut conventions = Vec::with_capacity(params.len());
    for &param in params {
        let convention = passing_convention(db, param, kind);
        match convention {
            PassingConvention::Indirect => signature.params.push(AbiParam::new(ptr)),
            PassingConvention::Direct => signature.params.extend(
                explosion_schema(db, param, kind)
                    .into_iter()
                    .map(|piece| AbiParam::new(scalar_type(target, piece))),
            ),
        }
        conventions.push(convention);
    }

    signature
        .params
        .extend((0..polymorphic_params).map(|_| AbiParam::new(ptr)));

    Ok(LoweredSignature {
        signature,
        params: conventions,
        result: result_lowering,
        polymorphic_params,
    })
}
