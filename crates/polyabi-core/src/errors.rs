//! Internal invariant violations.
//!
//! Every input reaching this layer was produced by an earlier, validated
//! compiler phase. A violation therefore means a bug upstream (a badly built
//! substitution, a mismatched explosion) and is fatal to the compilation.

use derive_more::Display;

use crate::types::CanonicalType;

pub type InvariantResult<T> = Result<T, InvariantViolation>;

#[derive(Clone, Debug, Display, PartialEq, Eq)]
pub enum InvariantViolation {
    #[display("cannot pair abstract type `{orig}` with substituted type `{subst}`")]
    StructuralMismatch { orig: String, subst: String },

    #[display("arity mismatch: `{orig}` has {orig_arity} element(s), `{subst}` has {subst_arity}")]
    ArityMismatch {
        orig: String,
        subst: String,
        orig_arity: usize,
        subst_arity: usize,
    },

    #[display("field {index} of `{nominal}` is `{expected}` in the abstract type but `{found}` after substitution")]
    FieldMismatch {
        nominal: String,
        index: usize,
        expected: String,
        found: String,
    },

    #[display("no substitution for archetype `{archetype}`")]
    MissingSubstitution { archetype: String },

    #[display("archetype `{archetype}` has more than one substitution")]
    DuplicateSubstitution { archetype: String },

    #[display("archetype `{archetype}` is bound to `{bound}` but the substituted type has `{found}`")]
    SubstitutionMismatch {
        archetype: String,
        bound: String,
        found: String,
    },

    #[display("`{replacement}` supplies no existential conformance to `{protocol}` for `{archetype}`")]
    MissingConformance {
        archetype: String,
        replacement: String,
        protocol: String,
    },

    #[display("class-bound archetype `{archetype}` cannot be bound to `{replacement}`")]
    ClassBoundViolation {
        archetype: String,
        replacement: String,
    },

    #[display("`{ty}` is not an existential type")]
    ExpectedExistential { ty: String },

    #[display("`{ty}` is not a function type")]
    ExpectedFunction { ty: String },

    #[display("uncurry level {level} exceeds the argument clauses of `{ty}`")]
    UncurryOverflow { ty: String, level: u32 },

    #[display("explosion exhausted: {requested} scalar(s) requested, {remaining} remaining")]
    ExplosionExhausted { requested: usize, remaining: usize },

    #[display("piece {index} of `{ty}` should be {expected} but the explosion holds {found}")]
    SchemaMismatch {
        ty: String,
        index: usize,
        expected: String,
        found: String,
    },

    #[display("`{ty}` explodes to {expected} scalar(s) but {produced} were produced")]
    ExplosionLength {
        ty: String,
        expected: usize,
        produced: usize,
    },

    #[display("no existential record for archetype `{archetype}`")]
    MissingExistential { archetype: String },
}

impl InvariantViolation {
    pub fn structural<'db>(
        db: &'db dyn salsa::Database,
        orig: CanonicalType<'db>,
        subst: CanonicalType<'db>,
    ) -> Self {
        InvariantViolation::StructuralMismatch {
            orig: orig.display(db).to_string(),
            subst: subst.display(db).to_string(),
        }
    }

    pub fn arity<'db>(
        db: &'db dyn salsa::Database,
        orig: CanonicalType<'db>,
        subst: CanonicalType<'db>,
        orig_arity: usize,
        subst_arity: usize,
    ) -> Self {
        InvariantViolation::ArityMismatch {
            orig: orig.display(db).to_string(),
            subst: subst.display(db).to_string(),
            orig_arity,
            subst_arity,
        }
    }

    pub fn missing_substitution<'db>(
        db: &'db dyn salsa::Database,
        archetype: CanonicalType<'db>,
    ) -> Self {
        InvariantViolation::MissingSubstitution {
            archetype: archetype.display(db).to_string(),
        }
    }

    pub fn missing_existential<'db>(
        db: &'db dyn salsa::Database,
        archetype: CanonicalType<'db>,
    ) -> Self {
        InvariantViolation::MissingExistential {
            archetype: archetype.display(db).to_string(),
        }
    }

    pub fn expected_function<'db>(db: &'db dyn salsa::Database, ty: CanonicalType<'db>) -> Self {
        InvariantViolation::ExpectedFunction {
            ty: ty.display(db).to_string(),
        }
    }
}

impl std::error::Error for InvariantViolation {}
