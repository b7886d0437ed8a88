//! Canonical type trees and abstraction comparison for polymorphic code generation.
//!
//! Generic code is emitted once against archetypes and called with many
//! concrete substitutions. This crate describes both sides of that boundary:
//!
//! - `types`: salsa-interned canonical types and protocols
//! - `substitution`: archetype bindings relating an abstract tree to a substituted one
//! - `layout` / `schema`: memory layout and explosion schema of a type on a target
//! - `pairing`: one level of the lockstep walk over an (abstract, substituted) pair
//! - `comparator`: whether the two representations differ in memory, in explosion,
//!   or as a function calling convention

pub mod comparator;
pub mod database;
pub mod errors;
pub mod layout;
pub mod pairing;
pub mod schema;
pub mod substitution;
pub mod target;
pub mod types;

pub use comparator::AbstractionComparator;
pub use database::AbiDatabase;
pub use errors::{InvariantResult, InvariantViolation};
pub use layout::{AggregateLayout, MemoryLeaf, TypeLayout, aggregate_layout, memory_leaves, type_layout};
pub use pairing::{ArchetypeLeaf, FunctionPair, PairedNode, pair_types};
pub use schema::{
    ExplosionKind, MAX_DIRECT_RESULTS, MAX_DIRECT_SCALARS, PassingConvention, ScalarKind,
    existential_slots, explosion_schema, explosion_size, is_passed_by_address, passing_convention,
    result_convention, result_passing,
};
pub use substitution::{Binding, Conformance, ConformanceSource, Substitution, SubstitutionList};
pub use target::{TargetError, TargetInfo};
pub use types::{CanonicalType, Field, Protocol, ScalarType, TypeKind};
