//! Unwrapping existential containers into metadata and witnesses.
//!
//! ## Container layout
//!
//! | Field           | Offset  | Contents                                  |
//! |-----------------|---------|-------------------------------------------|
//! | `payload`       | 0       | opaque handle of the dynamic value        |
//! | `metadata`      | ptr     | type metadata of the dynamic value        |
//! | `witness_table` | 2 × ptr | table with one function per requirement   |
//!
//! Witness `i` of a table lives at `i × ptr`.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use cranelift_codegen::ir::Value;
use polyabi_core::{CanonicalType, InvariantViolation, ScalarKind, TargetInfo, TypeKind, TypeLayout};

use crate::CompilationResult;
use crate::emit::FunctionEmitter;

/// Field offsets of an existential container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContainerOffsets {
    pub payload: u32,
    pub metadata: u32,
    pub witness_table: u32,
}

impl ContainerOffsets {
    pub fn for_target(target: TargetInfo) -> Self {
        let ptr = target.pointer_bytes();
        Self {
            payload: 0,
            metadata: ptr,
            witness_table: 2 * ptr,
        }
    }
}

pub fn container_layout(target: TargetInfo) -> TypeLayout {
    let ptr = target.pointer_bytes();
    TypeLayout {
        size: 3 * ptr,
        alignment: ptr,
    }
}

/// The runtime pieces recovered from one existential container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExistentialSubstitution<'db> {
    /// The `any P` type the container had.
    pub protocol_type: CanonicalType<'db>,
    pub metadata: Value,
    pub witness_table: Value,
    /// One function handle per protocol requirement, in declaration order.
    pub witnesses: Vec<Value>,
}

/// Archetype to existential substitution, filled during one session.
///
/// Each archetype is recorded at most once; later records for the same
/// archetype are ignored.
#[derive(Clone, Debug, Default)]
pub struct ExistentialSubstitutionMap<'db> {
    entries: HashMap<CanonicalType<'db>, ExistentialSubstitution<'db>>,
}

impl<'db> ExistentialSubstitutionMap<'db> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, archetype: CanonicalType<'db>) -> Option<&ExistentialSubstitution<'db>> {
        self.entries.get(&archetype)
    }

    /// Record `substitution` unless the archetype already has one.
    /// Returns whether it was recorded.
    pub fn insert(
        &mut self,
        archetype: CanonicalType<'db>,
        substitution: ExistentialSubstitution<'db>,
    ) -> bool {
        match self.entries.entry(archetype) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(substitution);
                true
            }
        }
    }

    /// Take over the records of `other` for archetypes not recorded here.
    pub fn merge(&mut self, other: ExistentialSubstitutionMap<'db>) {
        for (archetype, substitution) in other.entries {
            self.insert(archetype, substitution);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Recover the metadata and witnesses satisfying `archetype` from the
/// container at `container`.
///
/// Emits nothing when `map` already holds a record for the archetype.
pub fn extract_existential<'m, 'db>(
    emitter: &mut FunctionEmitter<'_>,
    db: &'db dyn salsa::Database,
    archetype: CanonicalType<'db>,
    protocol_type: CanonicalType<'db>,
    container: Value,
    map: &'m mut ExistentialSubstitutionMap<'db>,
) -> CompilationResult<&'m ExistentialSubstitution<'db>> {
    let entry = match map.entries.entry(archetype) {
        Entry::Occupied(entry) => {
            tracing::trace!(
                archetype = %archetype.display(db),
                "reusing extracted existential"
            );
            return Ok(entry.into_mut());
        }
        Entry::Vacant(entry) => entry,
    };

    let TypeKind::Existential(protocol) = protocol_type.kind(db) else {
        return Err(InvariantViolation::ExpectedExistential {
            ty: protocol_type.display(db).to_string(),
        }
        .into());
    };

    let target = emitter.target();
    let offsets = ContainerOffsets::for_target(target);
    let metadata = emitter.load(ScalarKind::Pointer, container, offsets.metadata);
    let witness_table = emitter.load(ScalarKind::Pointer, container, offsets.witness_table);
    let witnesses = (0..protocol.requirements(db).len() as u32)
        .map(|i| emitter.load(ScalarKind::Pointer, witness_table, i * target.pointer_bytes()))
        .collect::<Vec<_>>();

    tracing::debug!(
        archetype = %archetype.display(db),
        protocol = %protocol.name(db),
        witnesses = witnesses.len(),
        "extracted existential"
    );

    Ok(entry.insert(ExistentialSubstitution {
        protocol_type,
        metadata,
        witness_table,
        witnesses,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_codegen::ir::{AbiParam, Function, InstBuilder, Signature, UserFuncName, types};
    use cranelift_codegen::isa::CallConv;
    use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
    use polyabi_core::{AbiDatabase, Protocol};

    fn count_loads(func: &Function) -> usize {
        func.display()
            .to_string()
            .lines()
            .filter(|line| line.contains(" = load."))
            .count()
    }

    #[test]
    fn offsets_follow_pointer_width() {
        let narrow = ContainerOffsets::for_target(TargetInfo::POINTER_32);
        assert_eq!((narrow.payload, narrow.metadata, narrow.witness_table), (0, 4, 8));
        assert_eq!(container_layout(TargetInfo::POINTER_64).size, 24);
    }

    #[test]
    fn extraction_is_memoized_per_archetype() {
        let db = AbiDatabase::default();
        let shape = Protocol::new(
            &db,
            "Shape".to_string(),
            vec!["area".to_string(), "draw".to_string()],
        );
        let t = CanonicalType::archetype(&db, "T", false, vec![shape]);
        let any_shape = CanonicalType::existential(&db, shape);

        let mut sig = Signature::new(CallConv::SystemV);
        sig.params.push(AbiParam::new(types::I64));
        let mut func = Function::with_name_signature(UserFuncName::testcase("extract"), sig);
        let mut func_ctx = FunctionBuilderContext::new();
        let mut builder = FunctionBuilder::new(&mut func, &mut func_ctx);
        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        builder.seal_block(entry);
        let container = builder.block_params(entry)[0];

        let mut emitter = FunctionEmitter::new(builder, TargetInfo::POINTER_64);
        let mut map = ExistentialSubstitutionMap::new();
        let first = extract_existential(&mut emitter, &db, t, any_shape, container, &mut map)
            .unwrap()
            .clone();
        let second = extract_existential(&mut emitter, &db, t, any_shape, container, &mut map)
            .unwrap()
            .clone();
        assert_eq!(first, second);
        assert_eq!(first.witnesses.len(), 2);
        assert_eq!(map.len(), 1);

        emitter.builder().ins().return_(&[]);
        emitter.finalize();

        // metadata, witness table and two witnesses, emitted once
        assert_eq!(count_loads(&func), 4);
    }

    #[test]
    fn non_existential_protocol_type_is_rejected() {
        let db = AbiDatabase::default();
        let t = CanonicalType::archetype(&db, "T", false, vec![]);
        let i32_ty = CanonicalType::scalar(&db, polyabi_core::ScalarType::I32);

        let mut func = Function::new();
        let mut func_ctx = FunctionBuilderContext::new();
        let mut builder = FunctionBuilder::new(&mut func, &mut func_ctx);
        let entry = builder.create_block();
        builder.switch_to_block(entry);
        let container = builder.ins().iconst(types::I64, 0);

        let mut emitter = FunctionEmitter::new(builder, TargetInfo::POINTER_64);
        let mut map = ExistentialSubstitutionMap::new();
        let err = extract_existential(&mut emitter, &db, t, i32_ty, container, &mut map).unwrap_err();
        assert!(matches!(
            err.invariant(),
            Some(InvariantViolation::ExpectedExistential { .. })
        ));
        assert!(map.is_empty());
    }

    #[test]
    fn merge_keeps_first_record() {
        let db = AbiDatabase::default();
        let p = Protocol::new(&db, "P".to_string(), vec![]);
        let t = CanonicalType::archetype(&db, "T", false, vec![p]);
        let any_p = CanonicalType::existential(&db, p);
        let record = |n: u32| ExistentialSubstitution {
            protocol_type: any_p,
            metadata: Value::from_u32(n),
            witness_table: Value::from_u32(n + 1),
            witnesses: vec![],
        };

        let mut map = ExistentialSubstitutionMap::new();
        assert!(map.insert(t, record(0)));
        let mut other = ExistentialSubstitutionMap::new();
        other.insert(t, record(10));
        map.merge(other);

        assert_eq!(map.get(t).map(|r| r.metadata), Some(Value::from_u32(0)));
    }
}
