//! Explosion schemas: how a value is split into scalar pieces.

use std::fmt;

use crate::types::{CanonicalType, ScalarType, TypeKind};

/// Parameters with more pieces than this are passed through a hidden pointer.
pub const MAX_DIRECT_SCALARS: usize = 3;

/// Results with more pieces than this are returned through a caller buffer.
pub const MAX_DIRECT_RESULTS: usize = 2;

/// How aggressively aggregates are flattened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExplosionKind {
    /// Non-empty aggregates are passed as the address of their memory.
    Minimal,
    /// Aggregates are flattened into their scalar leaves.
    Maximal,
}

impl ExplosionKind {
    pub const ALL: [ExplosionKind; 2] = [ExplosionKind::Minimal, ExplosionKind::Maximal];
}

impl fmt::Display for ExplosionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExplosionKind::Minimal => f.write_str("minimal"),
            ExplosionKind::Maximal => f.write_str("maximal"),
        }
    }
}

/// Kind of one piece of an explosion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// Machine address (raw pointers, code pointers, aggregate addresses).
    Pointer,
    /// Reference to a class instance or closure context.
    Reference,
    /// Opaque handle of an archetype-typed value.
    Opaque,
}

impl ScalarKind {
    pub fn of(scalar: ScalarType) -> Self {
        match scalar {
            ScalarType::I8 => ScalarKind::I8,
            ScalarType::I16 => ScalarKind::I16,
            ScalarType::I32 => ScalarKind::I32,
            ScalarType::I64 => ScalarKind::I64,
            ScalarType::F32 => ScalarKind::F32,
            ScalarType::F64 => ScalarKind::F64,
            ScalarType::RawPointer => ScalarKind::Pointer,
            ScalarType::Object => ScalarKind::Reference,
        }
    }

    pub fn is_pointer_sized(self) -> bool {
        matches!(
            self,
            ScalarKind::Pointer | ScalarKind::Reference | ScalarKind::Opaque
        )
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarKind::I8 => "i8",
            ScalarKind::I16 => "i16",
            ScalarKind::I32 => "i32",
            ScalarKind::I64 => "i64",
            ScalarKind::F32 => "f32",
            ScalarKind::F64 => "f64",
            ScalarKind::Pointer => "pointer",
            ScalarKind::Reference => "reference",
            ScalarKind::Opaque => "opaque",
        };
        f.write_str(name)
    }
}

/// The ordered scalar pieces of `ty` under `kind`.
pub fn explosion_schema<'db>(
    db: &'db dyn salsa::Database,
    ty: CanonicalType<'db>,
    kind: ExplosionKind,
) -> Vec<ScalarKind> {
    let mut schema = Vec::new();
    collect_schema(db, ty, kind, &mut schema);
    schema
}

fn collect_schema<'db>(
    db: &'db dyn salsa::Database,
    ty: CanonicalType<'db>,
    kind: ExplosionKind,
    schema: &mut Vec<ScalarKind>,
) {
    match ty.kind(db) {
        TypeKind::Scalar(scalar) => schema.push(ScalarKind::of(*scalar)),
        TypeKind::Tuple(_) | TypeKind::Nominal { .. } => {
            if is_passed_by_address(db, ty, kind) {
                schema.push(ScalarKind::Pointer);
            } else {
                for field in ty.aggregate_fields(db).unwrap_or_default() {
                    collect_schema(db, field, kind, schema);
                }
            }
        }
        TypeKind::Function { .. } => {
            schema.push(ScalarKind::Pointer);
            schema.push(ScalarKind::Reference);
        }
        TypeKind::Archetype { .. } => schema.push(ScalarKind::Opaque),
        TypeKind::Existential(_) => schema.push(ScalarKind::Pointer),
    }
}

pub fn explosion_size<'db>(
    db: &'db dyn salsa::Database,
    ty: CanonicalType<'db>,
    kind: ExplosionKind,
) -> usize {
    explosion_schema(db, ty, kind).len()
}

/// Whether `ty` explodes to the single address of its memory under `kind`.
pub fn is_passed_by_address<'db>(
    db: &'db dyn salsa::Database,
    ty: CanonicalType<'db>,
    kind: ExplosionKind,
) -> bool {
    kind == ExplosionKind::Minimal
        && ty
            .aggregate_fields(db)
            .is_some_and(|fields| !fields.is_empty())
}

/// How a parameter or result is passed across a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PassingConvention {
    /// As its explosion.
    Direct,
    /// Through one hidden pointer to memory holding the value.
    Indirect,
}

pub fn passing_convention<'db>(
    db: &'db dyn salsa::Database,
    ty: CanonicalType<'db>,
    kind: ExplosionKind,
) -> PassingConvention {
    convention_for(explosion_size(db, ty, kind), MAX_DIRECT_SCALARS)
}

pub fn result_convention<'db>(
    db: &'db dyn salsa::Database,
    ty: CanonicalType<'db>,
    kind: ExplosionKind,
) -> PassingConvention {
    convention_for(explosion_size(db, ty, kind), MAX_DIRECT_RESULTS)
}

/// How a result leaves a function.
///
/// Besides wide results, two kinds of result go through the caller's buffer
/// so they never point into the callee's frame: an aggregate exploded as its
/// own address, and a value holding existential containers, which the buffer
/// stores after the value itself.
pub fn result_passing<'db>(
    db: &'db dyn salsa::Database,
    ty: CanonicalType<'db>,
    kind: ExplosionKind,
) -> PassingConvention {
    if is_passed_by_address(db, ty, kind) || existential_slots(db, ty) > 0 {
        PassingConvention::Indirect
    } else {
        result_convention(db, ty, kind)
    }
}

/// Number of existential containers a value of `ty` refers to inline.
///
/// Containers behind a function value or an archetype handle are not
/// counted.
pub fn existential_slots<'db>(db: &'db dyn salsa::Database, ty: CanonicalType<'db>) -> usize {
    match ty.kind(db) {
        TypeKind::Existential(_) => 1,
        TypeKind::Tuple(_) | TypeKind::Nominal { .. } => ty
            .aggregate_fields(db)
            .unwrap_or_default()
            .into_iter()
            .map(|field| existential_slots(db, field))
            .sum(),
        TypeKind::Scalar(_) | TypeKind::Function { .. } | TypeKind::Archetype { .. } => 0,
    }
}

fn convention_for(pieces: usize, limit: usize) -> PassingConvention {
    if pieces > limit {
        PassingConvention::Indirect
    } else {
        PassingConvention::Direct
    }
}
