//! Decides whether substitution changes how a value is represented.
//!
//! Each predicate walks the abstract and substituted trees together through
//! [`pair_types`]. A pair that cannot be aligned is reported as an
//! [`InvariantViolation`] instead of being compared partially.

use crate::errors::{InvariantResult, InvariantViolation};
use crate::pairing::{FunctionPair, PairedNode, pair_types};
use crate::schema::{
    ExplosionKind, PassingConvention, is_passed_by_address, passing_convention, result_passing,
};
use crate::types::CanonicalType;

pub struct AbstractionComparator<'db> {
    db: &'db dyn salsa::Database,
}

impl<'db> AbstractionComparator<'db> {
    pub fn new(db: &'db dyn salsa::Database) -> Self {
        Self { db }
    }

    /// Whether the two types differ when laid out in memory.
    pub fn differs_in_memory(
        &self,
        orig: CanonicalType<'db>,
        subst: CanonicalType<'db>,
    ) -> InvariantResult<bool> {
        match pair_types(self.db, orig, subst)? {
            PairedNode::Same(_) => Ok(false),
            PairedNode::Aggregate(fields) => {
                let mut differs = false;
                for (o, s) in fields {
                    differs |= self.differs_in_memory(o, s)?;
                }
                Ok(differs)
            }
            // Code pointer and context never change shape.
            PairedNode::Function(pair) => {
                self.check_function_pair(pair)?;
                Ok(false)
            }
            PairedNode::Archetype(leaf) => Ok(!leaf.coincides(self.db)),
        }
    }

    /// Whether the two types explode differently under `kind`.
    pub fn differs_in_explosion(
        &self,
        orig: CanonicalType<'db>,
        subst: CanonicalType<'db>,
        kind: ExplosionKind,
    ) -> InvariantResult<bool> {
        match pair_types(self.db, orig, subst)? {
            PairedNode::Same(_) => Ok(false),
            PairedNode::Aggregate(fields) => {
                if is_passed_by_address(self.db, orig, kind) {
                    return self.differs_in_memory(orig, subst);
                }
                let mut differs = false;
                for (o, s) in fields {
                    differs |= self.differs_in_explosion(o, s, kind)?;
                }
                Ok(differs)
            }
            PairedNode::Function(pair) => {
                self.check_function_pair(pair)?;
                Ok(false)
            }
            PairedNode::Archetype(leaf) => Ok(!leaf.coincides(self.db)),
        }
    }

    /// Whether calling through a value of type `orig` differs from calling
    /// through `subst` when `uncurry_level + 1` argument clauses are passed
    /// at once.
    pub fn differs_as_function(
        &self,
        orig: CanonicalType<'db>,
        subst: CanonicalType<'db>,
        kind: ExplosionKind,
        uncurry_level: u32,
    ) -> InvariantResult<bool> {
        let mut clause = (orig, subst);
        let mut differs = false;
        let mut level = 0;
        loop {
            let (o, s) = clause;
            let pair = match pair_types(self.db, o, s)? {
                PairedNode::Function(pair) => pair,
                PairedNode::Same(ty) if ty.is_function(self.db) => {
                    self.check_clauses(ty, uncurry_level - level)?;
                    return Ok(differs);
                }
                _ if level == 0 => return Err(InvariantViolation::expected_function(self.db, o)),
                _ => {
                    return Err(InvariantViolation::UncurryOverflow {
                        ty: orig.display(self.db).to_string(),
                        level: uncurry_level,
                    });
                }
            };

            for (po, ps) in pair.params {
                let conventions = (
                    passing_convention(self.db, po, kind),
                    passing_convention(self.db, ps, kind),
                );
                differs |= self.differs_in_convention(po, ps, kind, conventions)?;
            }
            if level == uncurry_level {
                let (ro, rs) = pair.result;
                let conventions = (
                    result_passing(self.db, ro, kind),
                    result_passing(self.db, rs, kind),
                );
                differs |= self.differs_in_convention(ro, rs, kind, conventions)?;
                return Ok(differs);
            }
            clause = pair.result;
            level += 1;
        }
    }

    /// Compare one parameter or result as it is passed across a call.
    fn differs_in_convention(
        &self,
        orig: CanonicalType<'db>,
        subst: CanonicalType<'db>,
        kind: ExplosionKind,
        conventions: (PassingConvention, PassingConvention),
    ) -> InvariantResult<bool> {
        match conventions {
            (PassingConvention::Indirect, PassingConvention::Indirect) => {
                self.differs_in_memory(orig, subst)
            }
            (PassingConvention::Direct, PassingConvention::Direct) => {
                self.differs_in_explosion(orig, subst, kind)
            }
            _ => {
                self.differs_in_memory(orig, subst)?;
                Ok(true)
            }
        }
    }

    /// Make sure every parameter and the result of a function pair align.
    fn check_function_pair(&self, pair: FunctionPair<'db>) -> InvariantResult<()> {
        for (o, s) in pair.params {
            self.differs_in_memory(o, s)?;
        }
        let (ro, rs) = pair.result;
        self.differs_in_memory(ro, rs)?;
        Ok(())
    }

    /// Check that `ty` has `remaining` more curried clauses.
    fn check_clauses(&self, ty: CanonicalType<'db>, remaining: u32) -> InvariantResult<()> {
        let mut current = ty;
        for _ in 0..remaining {
            let (_, result) = current
                .function_parts(self.db)
                .ok_or_else(|| InvariantViolation::expected_function(self.db, current))?;
            current = result;
            if !current.is_function(self.db) {
                return Err(InvariantViolation::UncurryOverflow {
                    ty: ty.display(self.db).to_string(),
                    level: remaining,
                });
            }
        }
        Ok(())
    }
}
