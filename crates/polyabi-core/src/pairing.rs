//! Lockstep pairing of an abstract type with its substituted counterpart.
//!
//! Every algorithm that walks the two trees together (the comparator
//! predicates and both transformer directions) classifies one level at a
//! time through [`pair_types`] and recurses on the pairs it returns.

use crate::errors::{InvariantResult, InvariantViolation};
use crate::types::{CanonicalType, ScalarType, TypeKind};

/// One level of an (abstract, substituted) type pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PairedNode<'db> {
    /// Both sides are the same type; nothing below can differ.
    Same(CanonicalType<'db>),
    /// Tuples or nominal types with matching shape, paired field by field.
    Aggregate(Vec<(CanonicalType<'db>, CanonicalType<'db>)>),
    Function(FunctionPair<'db>),
    Archetype(ArchetypeLeaf<'db>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionPair<'db> {
    pub params: Vec<(CanonicalType<'db>, CanonicalType<'db>)>,
    pub result: (CanonicalType<'db>, CanonicalType<'db>),
}

/// An archetype on the abstract side and the type that replaced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArchetypeLeaf<'db> {
    pub archetype: CanonicalType<'db>,
    pub replacement: CanonicalType<'db>,
}

impl<'db> ArchetypeLeaf<'db> {
    pub fn is_class_bound(&self, db: &'db dyn salsa::Database) -> bool {
        matches!(
            self.archetype.kind(db),
            TypeKind::Archetype {
                class_bound: true,
                ..
            }
        )
    }

    /// Whether the replacement is already represented as this archetype's
    /// opaque handle, so no conversion is needed in either direction.
    pub fn coincides(&self, db: &'db dyn salsa::Database) -> bool {
        let class_bound = self.is_class_bound(db);
        match self.replacement.kind(db) {
            TypeKind::Archetype {
                class_bound: other, ..
            } => *other == class_bound,
            TypeKind::Scalar(ScalarType::Object) => class_bound,
            _ => false,
        }
    }
}

/// Classify one level of the pair `(orig, subst)`.
///
/// Shapes that cannot be aligned are an invariant violation.
pub fn pair_types<'db>(
    db: &'db dyn salsa::Database,
    orig: CanonicalType<'db>,
    subst: CanonicalType<'db>,
) -> InvariantResult<PairedNode<'db>> {
    if orig == subst {
        return Ok(PairedNode::Same(orig));
    }

    match (orig.kind(db), subst.kind(db)) {
        (TypeKind::Archetype { .. }, _) => Ok(PairedNode::Archetype(ArchetypeLeaf {
            archetype: orig,
            replacement: subst,
        })),
        (TypeKind::Tuple(orig_elems), TypeKind::Tuple(subst_elems)) => {
            if orig_elems.len() != subst_elems.len() {
                return Err(InvariantViolation::arity(
                    db,
                    orig,
                    subst,
                    orig_elems.len(),
                    subst_elems.len(),
                ));
            }
            Ok(PairedNode::Aggregate(
                orig_elems.iter().copied().zip(subst_elems.iter().copied()).collect(),
            ))
        }
        (
            TypeKind::Nominal {
                name: orig_name,
                fields: orig_fields,
            },
            TypeKind::Nominal {
                name: subst_name,
                fields: subst_fields,
            },
        ) => {
            if orig_name != subst_name {
                return Err(InvariantViolation::structural(db, orig, subst));
            }
            if orig_fields.len() != subst_fields.len() {
                return Err(InvariantViolation::arity(
                    db,
                    orig,
                    subst,
                    orig_fields.len(),
                    subst_fields.len(),
                ));
            }
            let mut pairs = Vec::with_capacity(orig_fields.len());
            for (index, (o, s)) in orig_fields.iter().zip(subst_fields).enumerate() {
                if o.name != s.name {
                    return Err(InvariantViolation::FieldMismatch {
                        nominal: orig_name.clone(),
                        index,
                        expected: o.name.clone(),
                        found: s.name.clone(),
                    });
                }
                pairs.push((o.ty, s.ty));
            }
            Ok(PairedNode::Aggregate(pairs))
        }
        (
            TypeKind::Function {
                params: orig_params,
                result: orig_result,
            },
            TypeKind::Function {
                params: subst_params,
                result: subst_result,
            },
        ) => {
            if orig_params.len() != subst_params.len() {
                return Err(InvariantViolation::arity(
                    db,
                    orig,
                    subst,
                    orig_params.len(),
                    subst_params.len(),
                ));
            }
            Ok(PairedNode::Function(FunctionPair {
                params: orig_params
                    .iter()
                    .copied()
                    .zip(subst_params.iter().copied())
                    .collect(),
                result: (*orig_result, *subst_result),
            }))
        }
        _ => Err(InvariantViolation::structural(db, orig, subst)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AbiDatabase;

    #[test]
    fn identical_trees_short_circuit() {
        let db = AbiDatabase::default();
        let t = CanonicalType::archetype(&db, "T", false, vec![]);
        let ty = CanonicalType::tuple(&db, vec![t, t]);
        assert_eq!(pair_types(&db, ty, ty), Ok(PairedNode::Same(ty)));
    }

    #[test]
    fn tuples_pair_by_position() {
        let db = AbiDatabase::default();
        let t = CanonicalType::archetype(&db, "T", false, vec![]);
        let i32_ty = CanonicalType::scalar(&db, ScalarType::I32);
        let f32_ty = CanonicalType::scalar(&db, ScalarType::F32);
        let orig = CanonicalType::tuple(&db, vec![t, i32_ty]);
        let subst = CanonicalType::tuple(&db, vec![f32_ty, i32_ty]);

        assert_eq!(
            pair_types(&db, orig, subst),
            Ok(PairedNode::Aggregate(vec![(t, f32_ty), (i32_ty, i32_ty)]))
        );
    }

    #[test]
    fn arity_mismatch_is_rejected() {
        let db = AbiDatabase::default();
        let i32_ty = CanonicalType::scalar(&db, ScalarType::I32);
        let orig = CanonicalType::tuple(&db, vec![i32_ty, i32_ty]);
        let subst = CanonicalType::tuple(&db, vec![i32_ty, i32_ty, i32_ty]);

        let err = pair_types(&db, orig, subst).unwrap_err();
        assert!(matches!(
            err,
            InvariantViolation::ArityMismatch {
                orig_arity: 2,
                subst_arity: 3,
                ..
            }
        ));
    }

    #[test]
    fn nominal_field_names_must_agree() {
        let db = AbiDatabase::default();
        let t = CanonicalType::archetype(&db, "T", false, vec![]);
        let i32_ty = CanonicalType::scalar(&db, ScalarType::I32);
        let orig = CanonicalType::nominal(&db, "Box", [("value".to_string(), t)]);
        let subst = CanonicalType::nominal(&db, "Box", [("other".to_string(), i32_ty)]);

        let err = pair_types(&db, orig, subst).unwrap_err();
        assert!(matches!(err, InvariantViolation::FieldMismatch { index: 0, .. }));
    }

    #[test]
    fn concrete_against_different_concrete_is_rejected() {
        let db = AbiDatabase::default();
        let i32_ty = CanonicalType::scalar(&db, ScalarType::I32);
        let f32_ty = CanonicalType::scalar(&db, ScalarType::F32);
        assert!(matches!(
            pair_types(&db, i32_ty, f32_ty),
            Err(InvariantViolation::StructuralMismatch { .. })
        ));
    }

    #[test]
    fn coincidence_rules() {
        let db = AbiDatabase::default();
        let t = CanonicalType::archetype(&db, "T", false, vec![]);
        let u = CanonicalType::archetype(&db, "U", false, vec![]);
        let c = CanonicalType::archetype(&db, "C", true, vec![]);
        let object = CanonicalType::scalar(&db, ScalarType::Object);
        let i64_ty = CanonicalType::scalar(&db, ScalarType::I64);

        let leaf = |archetype, replacement| ArchetypeLeaf {
            archetype,
            replacement,
        };
        assert!(leaf(t, u).coincides(&db));
        assert!(leaf(c, object).coincides(&db));
        assert!(!leaf(t, object).coincides(&db));
        assert!(!leaf(t, c).coincides(&db));
        assert!(!leaf(t, i64_ty).coincides(&db));
    }
}
