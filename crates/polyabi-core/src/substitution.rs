//! Archetype substitutions.

use crate::errors::{InvariantResult, InvariantViolation};
use crate::pairing::{ArchetypeLeaf, PairedNode, pair_types};
use crate::types::{CanonicalType, Protocol, ScalarType, TypeKind};

/// Where the witnesses of a conformance come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConformanceSource {
    /// Statically known witness table of the concrete type.
    Concrete,
    /// Carried at runtime by an existential container.
    Existential,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Conformance<'db> {
    pub protocol: Protocol<'db>,
    pub source: ConformanceSource,
}

/// Binding of one archetype to the type replacing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Substitution<'db> {
    pub archetype: CanonicalType<'db>,
    pub replacement: CanonicalType<'db>,
    pub conformances: Vec<Conformance<'db>>,
}

impl<'db> Substitution<'db> {
    /// Bind `archetype` to `replacement`, deriving one conformance per
    /// protocol the archetype requires.
    ///
    /// An existential replacement supplies its own protocol dynamically;
    /// every other requirement is assumed to be met statically.
    pub fn bind(
        db: &'db dyn salsa::Database,
        archetype: CanonicalType<'db>,
        replacement: CanonicalType<'db>,
    ) -> Self {
        let carried = match replacement.kind(db) {
            TypeKind::Existential(protocol) => Some(*protocol),
            _ => None,
        };
        let conformances = archetype
            .archetype_protocols(db)
            .iter()
            .map(|&protocol| Conformance {
                protocol,
                source: if carried == Some(protocol) {
                    ConformanceSource::Existential
                } else {
                    ConformanceSource::Concrete
                },
            })
            .collect();
        Substitution {
            archetype,
            replacement,
            conformances,
        }
    }

    pub fn conformance(&self, protocol: Protocol<'db>) -> Option<&Conformance<'db>> {
        self.conformances.iter().find(|c| c.protocol == protocol)
    }
}

/// How an archetype leaf must be converted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binding<'db> {
    /// The replacement already has the archetype's representation.
    Coincident,
    /// The replacement is an existential whose container supplies the witnesses.
    Existential(Protocol<'db>),
    /// The replacement is a concrete type that must be boxed or unboxed.
    Concrete,
}

/// The substitutions carrying an abstract type tree to a substituted one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubstitutionList<'db> {
    entries: Vec<Substitution<'db>>,
}

impl<'db> SubstitutionList<'db> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. Each archetype may be bound only once.
    pub fn push(
        &mut self,
        db: &'db dyn salsa::Database,
        substitution: Substitution<'db>,
    ) -> InvariantResult<()> {
        if self.lookup(substitution.archetype).is_some() {
            return Err(InvariantViolation::DuplicateSubstitution {
                archetype: substitution.archetype.display(db).to_string(),
            });
        }
        self.entries.push(substitution);
        Ok(())
    }

    pub fn lookup(&self, archetype: CanonicalType<'db>) -> Option<&Substitution<'db>> {
        self.entries.iter().find(|s| s.archetype == archetype)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Substitution<'db>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check that every archetype of `orig` has an entry consistent with
    /// the position it takes in `subst`.
    ///
    /// An archetype left unchanged in `subst` must be bound to itself.
    pub fn validate(
        &self,
        db: &'db dyn salsa::Database,
        orig: CanonicalType<'db>,
        subst: CanonicalType<'db>,
    ) -> InvariantResult<()> {
        match pair_types(db, orig, subst)? {
            PairedNode::Same(ty) => self.validate_unchanged(db, ty),
            PairedNode::Aggregate(fields) => fields
                .into_iter()
                .try_for_each(|(o, s)| self.validate(db, o, s)),
            PairedNode::Function(pair) => {
                for (o, s) in pair.params {
                    self.validate(db, o, s)?;
                }
                self.validate(db, pair.result.0, pair.result.1)
            }
            PairedNode::Archetype(leaf) => self.resolve(db, &leaf).map(drop),
        }
    }

    fn validate_unchanged(
        &self,
        db: &'db dyn salsa::Database,
        ty: CanonicalType<'db>,
    ) -> InvariantResult<()> {
        match ty.kind(db) {
            TypeKind::Archetype { .. } => {
                let leaf = ArchetypeLeaf {
                    archetype: ty,
                    replacement: ty,
                };
                self.resolve(db, &leaf).map(drop)
            }
            TypeKind::Tuple(_) | TypeKind::Nominal { .. } => ty
                .aggregate_fields(db)
                .unwrap_or_default()
                .into_iter()
                .try_for_each(|field| self.validate_unchanged(db, field)),
            TypeKind::Function { params, result } => {
                for &param in params {
                    self.validate_unchanged(db, param)?;
                }
                self.validate_unchanged(db, *result)
            }
            TypeKind::Scalar(_) | TypeKind::Existential(_) => Ok(()),
        }
    }

    /// Check the entry for an archetype leaf and decide how it converts.
    pub fn resolve(
        &self,
        db: &'db dyn salsa::Database,
        leaf: &ArchetypeLeaf<'db>,
    ) -> InvariantResult<Binding<'db>> {
        let entry = self
            .lookup(leaf.archetype)
            .ok_or_else(|| InvariantViolation::missing_substitution(db, leaf.archetype))?;

        if entry.replacement != leaf.replacement {
            return Err(InvariantViolation::SubstitutionMismatch {
                archetype: leaf.archetype.display(db).to_string(),
                bound: entry.replacement.display(db).to_string(),
                found: leaf.replacement.display(db).to_string(),
            });
        }

        if leaf.coincides(db) {
            return Ok(Binding::Coincident);
        }

        let is_reference = matches!(
            leaf.replacement.kind(db),
            TypeKind::Scalar(ScalarType::Object) | TypeKind::Archetype { class_bound: true, .. }
        );
        if leaf.is_class_bound(db) && !is_reference {
            return Err(InvariantViolation::ClassBoundViolation {
                archetype: leaf.archetype.display(db).to_string(),
                replacement: leaf.replacement.display(db).to_string(),
            });
        }

        match leaf.replacement.kind(db) {
            TypeKind::Existential(protocol) => {
                let supplied = entry
                    .conformance(*protocol)
                    .is_some_and(|c| c.source == ConformanceSource::Existential);
                if !supplied {
                    return Err(InvariantViolation::MissingConformance {
                        archetype: leaf.archetype.display(db).to_string(),
                        replacement: leaf.replacement.display(db).to_string(),
                        protocol: protocol.name(db).clone(),
                    });
                }
                Ok(Binding::Existential(*protocol))
            }
            _ => Ok(Binding::Concrete),
        }
    }
}
