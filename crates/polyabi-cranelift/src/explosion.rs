//! Exploded values: the scalar pieces of one high-level value.

use cranelift_codegen::ir::Value;
use polyabi_core::{ExplosionKind, InvariantResult, InvariantViolation};

/// An ordered run of Cranelift values consumed front to back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Explosion {
    kind: ExplosionKind,
    values: Vec<Value>,
    next: usize,
}

impl Explosion {
    pub fn new(kind: ExplosionKind) -> Self {
        Self::from_values(kind, Vec::new())
    }

    pub fn from_values(kind: ExplosionKind, values: Vec<Value>) -> Self {
        Self {
            kind,
            values,
            next: 0,
        }
    }

    pub fn kind(&self) -> ExplosionKind {
        self.kind
    }

    pub fn add(&mut self, value: Value) {
        self.values.push(value);
    }

    pub fn extend(&mut self, values: impl IntoIterator<Item = Value>) {
        self.values.extend(values);
    }

    pub fn claim_next(&mut self) -> InvariantResult<Value> {
        let value = self
            .values
            .get(self.next)
            .copied()
            .ok_or(InvariantViolation::ExplosionExhausted {
                requested: 1,
                remaining: 0,
            })?;
        self.next += 1;
        Ok(value)
    }

    /// Claim the next `count` values.
    pub fn claim(&mut self, count: usize) -> InvariantResult<Vec<Value>> {
        let remaining = self.remaining();
        if count > remaining {
            return Err(InvariantViolation::ExplosionExhausted {
                requested: count,
                remaining,
            });
        }
        let claimed = self.values[self.next..self.next + count].to_vec();
        self.next += count;
        Ok(claimed)
    }

    /// Values not yet claimed.
    pub fn unclaimed(&self) -> &[Value] {
        &self.values[self.next..]
    }

    pub fn remaining(&self) -> usize {
        self.values.len() - self.next
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}
