//! Memory layout of canonical types.
//!
//! ## Layout rules
//!
//! - Aggregate fields are laid out in declaration order
//! - Each field is naturally aligned (aligned to its own alignment)
//! - Total aggregate size is padded to the maximum field alignment
//!
//! ## Size mapping
//!
//! | Type          | Size    | Alignment |
//! |---------------|---------|-----------|
//! | `i8`          | 1       | 1         |
//! | `i16`         | 2       | 2         |
//! | `i32` / `f32` | 4       | 4         |
//! | `i64` / `f64` | 8       | 8         |
//! | `rawptr`      | ptr     | ptr       |
//! | `object`      | ptr     | ptr       |
//! | function      | 2 × ptr | ptr       |
//! | archetype     | ptr     | ptr       |
//! | existential   | ptr     | ptr       |
//!
//! An archetype field holds the value's opaque handle, so the value itself
//! lives out of line. An existential field holds the address of its
//! container.

use crate::schema::ScalarKind;
use crate::target::TargetInfo;
use crate::types::{CanonicalType, ScalarType, TypeKind};

/// Size and alignment of a type in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypeLayout {
    pub size: u32,
    pub alignment: u32,
}

/// Memory layout of a tuple or nominal aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateLayout {
    /// Byte offset of each field.
    pub field_offsets: Vec<u32>,
    /// Total size in bytes (padded to alignment).
    pub total_size: u32,
    /// Maximum alignment of any field.
    pub alignment: u32,
}

impl AggregateLayout {
    pub fn as_type_layout(&self) -> TypeLayout {
        TypeLayout {
            size: self.total_size,
            alignment: self.alignment,
        }
    }
}

/// One scalar stored in memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MemoryLeaf {
    pub offset: u32,
    pub kind: ScalarKind,
}

pub fn type_layout<'db>(
    db: &'db dyn salsa::Database,
    target: TargetInfo,
    ty: CanonicalType<'db>,
) -> TypeLayout {
    let ptr = target.pointer_bytes();
    match ty.kind(db) {
        TypeKind::Scalar(scalar) => {
            let size = scalar_size(target, *scalar);
            TypeLayout {
                size,
                alignment: size,
            }
        }
        TypeKind::Tuple(_) | TypeKind::Nominal { .. } => {
            aggregate_layout(db, target, ty.aggregate_fields(db).unwrap_or_default())
                .as_type_layout()
        }
        TypeKind::Function { .. } => TypeLayout {
            size: 2 * ptr,
            alignment: ptr,
        },
        TypeKind::Archetype { .. } | TypeKind::Existential(_) => TypeLayout {
            size: ptr,
            alignment: ptr,
        },
    }
}

/// Compute the layout of an aggregate with the given field types.
pub fn aggregate_layout<'db>(
    db: &'db dyn salsa::Database,
    target: TargetInfo,
    fields: impl IntoIterator<Item = CanonicalType<'db>>,
) -> AggregateLayout {
    let mut offset: u32 = 0;
    let mut max_align: u32 = 1;
    let mut field_offsets = Vec::new();

    for field_ty in fields {
        let TypeLayout { size, alignment } = type_layout(db, target, field_ty);

        offset = align_to(offset, alignment);
        field_offsets.push(offset);
        offset += size;
        max_align = max_align.max(alignment);
    }

    AggregateLayout {
        field_offsets,
        total_size: align_to(offset, max_align),
        alignment: max_align,
    }
}

/// The scalars stored in memory for `ty`, in explosion order.
///
/// The kinds always equal the type's maximal explosion schema, so a maximal
/// explosion can be stored leaf by leaf.
pub fn memory_leaves<'db>(
    db: &'db dyn salsa::Database,
    target: TargetInfo,
    ty: CanonicalType<'db>,
) -> Vec<MemoryLeaf> {
    let mut leaves = Vec::new();
    collect_leaves(db, target, ty, 0, &mut leaves);
    leaves
}

fn collect_leaves<'db>(
    db: &'db dyn salsa::Database,
    target: TargetInfo,
    ty: CanonicalType<'db>,
    base: u32,
    leaves: &mut Vec<MemoryLeaf>,
) {
    let ptr = target.pointer_bytes();
    match ty.kind(db) {
        TypeKind::Scalar(scalar) => leaves.push(MemoryLeaf {
            offset: base,
            kind: ScalarKind::of(*scalar),
        }),
        TypeKind::Tuple(_) | TypeKind::Nominal { .. } => {
            let fields = ty.aggregate_fields(db).unwrap_or_default();
            let layout = aggregate_layout(db, target, fields.iter().copied());
            for (field, offset) in fields.into_iter().zip(layout.field_offsets) {
                collect_leaves(db, target, field, base + offset, leaves);
            }
        }
        TypeKind::Function { .. } => {
            leaves.push(MemoryLeaf {
                offset: base,
                kind: ScalarKind::Pointer,
            });
            leaves.push(MemoryLeaf {
                offset: base + ptr,
                kind: ScalarKind::Reference,
            });
        }
        TypeKind::Archetype { .. } => leaves.push(MemoryLeaf {
            offset: base,
            kind: ScalarKind::Opaque,
        }),
        TypeKind::Existential(_) => leaves.push(MemoryLeaf {
            offset: base,
            kind: ScalarKind::Pointer,
        }),
    }
}

fn scalar_size(target: TargetInfo, scalar: ScalarType) -> u32 {
    match scalar {
        ScalarType::I8 => 1,
        ScalarType::I16 => 2,
        ScalarType::I32 | ScalarType::F32 => 4,
        ScalarType::I64 | ScalarType::F64 => 8,
        ScalarType::RawPointer | ScalarType::Object => target.pointer_bytes(),
    }
}

fn align_to(offset: u32, alignment: u32) -> u32 {
    (offset + alignment - 1) & !(alignment - 1)
}
