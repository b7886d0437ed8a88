//! Conversion of values between substituted and abstract representations.
//!
//! `unsubstitute` turns a value in the concrete shape of a call site into
//! the shape generic code expects: concrete values bound to archetypes are
//! boxed into opaque handles and existential containers are opened.
//! `resubstitute` is the mirror walk, applied to values coming back out of
//! generic code.
//!
//! Both walk the abstract and substituted trees in lockstep through
//! [`pair_types`], claiming scalars from the source explosion and producing
//! the destination explosion. Values whose representation does not change
//! are forwarded without emitting anything.
//!
//! Containers rebuilt by `resubstitute` live on the current stack frame
//! unless the session is given container storage, which a thunk points at
//! its caller's result buffer.

use cranelift_codegen::ir::Value;
use polyabi_core::{
    AbstractionComparator, ArchetypeLeaf, Binding, CanonicalType, ExplosionKind,
    InvariantViolation, PairedNode, ScalarKind, SubstitutionList, aggregate_layout,
    explosion_schema, explosion_size, is_passed_by_address, pair_types, type_layout,
};

use crate::emit::FunctionEmitter;
use crate::{CompilationError, CompilationResult};
use crate::existential::{
    ContainerOffsets, ExistentialSubstitutionMap, container_layout, extract_existential,
};
use crate::explosion::Explosion;

/// Memory reserved for rebuilt containers.
#[derive(Clone, Copy, Debug)]
struct ContainerStorage {
    base: Value,
    next: u32,
    end: u32,
}

/// State shared by the conversions emitted at one boundary.
pub struct ReabstractionSession<'a, 'f, 'db> {
    db: &'db dyn salsa::Database,
    emitter: &'a mut FunctionEmitter<'f>,
    substitutions: &'a SubstitutionList<'db>,
    comparator: AbstractionComparator<'db>,
    existentials: ExistentialSubstitutionMap<'db>,
    container_storage: Option<ContainerStorage>,
}

impl<'a, 'f, 'db> ReabstractionSession<'a, 'f, 'db> {
    pub fn new(
        emitter: &'a mut FunctionEmitter<'f>,
        db: &'db dyn salsa::Database,
        substitutions: &'a SubstitutionList<'db>,
    ) -> Self {
        Self::with_existentials(emitter, db, substitutions, ExistentialSubstitutionMap::new())
    }

    /// Start a session that already knows the existentials in `existentials`.
    pub fn with_existentials(
        emitter: &'a mut FunctionEmitter<'f>,
        db: &'db dyn salsa::Database,
        substitutions: &'a SubstitutionList<'db>,
        existentials: ExistentialSubstitutionMap<'db>,
    ) -> Self {
        Self {
            db,
            emitter,
            substitutions,
            comparator: AbstractionComparator::new(db),
            existentials,
            container_storage: None,
        }
    }

    /// Place the next `count` rebuilt containers at `base + offset`
    /// onwards instead of on the stack.
    pub fn set_container_storage(&mut self, base: Value, offset: u32, count: usize) {
        let size = container_layout(self.emitter.target()).size;
        self.container_storage = Some(ContainerStorage {
            base,
            next: offset,
            end: offset + size * count as u32,
        });
    }

    pub fn existentials(&self) -> &ExistentialSubstitutionMap<'db> {
        &self.existentials
    }

    pub fn into_existentials(self) -> ExistentialSubstitutionMap<'db> {
        self.existentials
    }

    pub fn emitter(&mut self) -> &mut FunctionEmitter<'f> {
        self.emitter
    }

    /// Convert a value of substituted type `subst` into the representation
    /// of abstract type `orig`.
    pub fn unsubstitute(
        &mut self,
        orig: CanonicalType<'db>,
        subst: CanonicalType<'db>,
        src: &mut Explosion,
    ) -> CompilationResult<Explosion> {
        self.substitutions.validate(self.db, orig, subst)?;
        self.check_source(subst, src)?;
        let mut dest = Explosion::new(src.kind());
        self.unsubstitute_into(orig, subst, src, &mut dest)?;
        self.check_produced(orig, &dest)?;
        Ok(dest)
    }

    /// Convert a value of abstract type `orig` into the representation of
    /// substituted type `subst`.
    pub fn resubstitute(
        &mut self,
        orig: CanonicalType<'db>,
        subst: CanonicalType<'db>,
        src: &mut Explosion,
    ) -> CompilationResult<Explosion> {
        self.substitutions.validate(self.db, orig, subst)?;
        self.check_source(orig, src)?;
        let mut dest = Explosion::new(src.kind());
        self.resubstitute_into(orig, subst, src, &mut dest)?;
        self.check_produced(subst, &dest)?;
        Ok(dest)
    }

    /// Convert a substituted value held in memory at `addr`.
    ///
    /// Returns the address of memory holding the abstract value, which is
    /// `addr` itself when the layouts agree.
    pub fn unsubstitute_address(
        &mut self,
        orig: CanonicalType<'db>,
        subst: CanonicalType<'db>,
        addr: Value,
    ) -> CompilationResult<Value> {
        self.substitutions.validate(self.db, orig, subst)?;
        self.repack_unsubstituted(orig, subst, addr)
    }

    /// Convert an abstract value held in memory at `addr`.
    pub fn resubstitute_address(
        &mut self,
        orig: CanonicalType<'db>,
        subst: CanonicalType<'db>,
        addr: Value,
    ) -> CompilationResult<Value> {
        self.substitutions.validate(self.db, orig, subst)?;
        self.repack_resubstituted(orig, subst, addr)
    }

    fn repack_unsubstituted(
        &mut self,
        orig: CanonicalType<'db>,
        subst: CanonicalType<'db>,
        addr: Value,
    ) -> CompilationResult<Value> {
        if !self.comparator.differs_in_memory(orig, subst)? {
            return Ok(addr);
        }
        tracing::trace!(ty = %subst.display(self.db), "repacking into abstract layout");
        let target = self.emitter.target();
        let dst = self.emitter.alloc_stack(type_layout(self.db, target, orig));
        self.unsubstitute_memory(orig, subst, (addr, 0), (dst, 0))?;
        Ok(dst)
    }

    fn repack_resubstituted(
        &mut self,
        orig: CanonicalType<'db>,
        subst: CanonicalType<'db>,
        addr: Value,
    ) -> CompilationResult<Value> {
        if !self.comparator.differs_in_memory(orig, subst)? {
            return Ok(addr);
        }
        tracing::trace!(ty = %subst.display(self.db), "repacking into substituted layout");
        let target = self.emitter.target();
        let dst = self.emitter.alloc_stack(type_layout(self.db, target, subst));
        self.resubstitute_memory(orig, subst, (addr, 0), (dst, 0))?;
        Ok(dst)
    }

    fn check_source(&self, ty: CanonicalType<'db>, src: &Explosion) -> CompilationResult<()> {
        let schema = explosion_schema(self.db, ty, src.kind());
        let unclaimed = src.unclaimed();
        if unclaimed.len() < schema.len() {
            return Err(InvariantViolation::ExplosionExhausted {
                requested: schema.len(),
                remaining: unclaimed.len(),
            }
            .into());
        }
        for (index, (kind, &value)) in schema.iter().zip(unclaimed).enumerate() {
            let expected = self.emitter.clif_type(*kind);
            let found = self.emitter.value_type(value);
            if expected != found {
                return Err(InvariantViolation::SchemaMismatch {
                    ty: ty.display(self.db).to_string(),
                    index,
                    expected: format!("{kind} ({expected})"),
                    found: found.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn check_produced(&self, ty: CanonicalType<'db>, dest: &Explosion) -> CompilationResult<()> {
        let expected = explosion_size(self.db, ty, dest.kind());
        if dest.len() != expected {
            return Err(InvariantViolation::ExplosionLength {
                ty: ty.display(self.db).to_string(),
                expected,
                produced: dest.len(),
            }
            .into());
        }
        Ok(())
    }

    fn unsubstitute_into(
        &mut self,
        orig: CanonicalType<'db>,
        subst: CanonicalType<'db>,
        src: &mut Explosion,
        dest: &mut Explosion,
    ) -> CompilationResult<()> {
        let db = self.db;
        let kind = src.kind();
        match pair_types(db, orig, subst)? {
            PairedNode::Same(ty) => dest.extend(src.claim(explosion_size(db, ty, kind))?),
            PairedNode::Aggregate(fields) => {
                if is_passed_by_address(db, orig, kind) {
                    let addr = src.claim_next()?;
                    dest.add(self.repack_unsubstituted(orig, subst, addr)?);
                } else {
                    for (o, s) in fields {
                        self.unsubstitute_into(o, s, src, dest)?;
                    }
                }
            }
            PairedNode::Function(_) => dest.extend(src.claim(explosion_size(db, subst, kind))?),
            PairedNode::Archetype(leaf) => {
                let handle = self.box_leaf(leaf, src, kind)?;
                dest.add(handle);
            }
        }
        Ok(())
    }

    /// Produce the opaque handle for a value bound to an archetype.
    fn box_leaf(
        &mut self,
        leaf: ArchetypeLeaf<'db>,
        src: &mut Explosion,
        kind: ExplosionKind,
    ) -> CompilationResult<Value> {
        let db = self.db;
        match self.substitutions.resolve(db, &leaf)? {
            Binding::Coincident => Ok(src.claim_next()?),
            Binding::Existential(_) => {
                let container = src.claim_next()?;
                self.open_container(leaf, container)
            }
            Binding::Concrete => {
                if is_passed_by_address(db, leaf.replacement, kind) {
                    // Already the address of the value's storage.
                    return Ok(src.claim_next()?);
                }
                let values = src.claim(explosion_size(db, leaf.replacement, kind))?;
                tracing::trace!(
                    archetype = %leaf.archetype.display(db),
                    replacement = %leaf.replacement.display(db),
                    "boxing concrete value"
                );
                self.emitter.spill(db, leaf.replacement, kind, &values)
            }
        }
    }

    /// Record the container's witnesses and return its payload handle.
    fn open_container(
        &mut self,
        leaf: ArchetypeLeaf<'db>,
        container: Value,
    ) -> CompilationResult<Value> {
        extract_existential(
            self.emitter,
            self.db,
            leaf.archetype,
            leaf.replacement,
            container,
            &mut self.existentials,
        )?;
        let offsets = ContainerOffsets::for_target(self.emitter.target());
        Ok(self
            .emitter
            .load(ScalarKind::Opaque, container, offsets.payload))
    }

    /// Build a fresh container around `payload` from the recorded witnesses.
    fn rebuild_container(
        &mut self,
        leaf: ArchetypeLeaf<'db>,
        payload: Value,
    ) -> CompilationResult<Value> {
        let record = self
            .existentials
            .get(leaf.archetype)
            .ok_or_else(|| InvariantViolation::missing_existential(self.db, leaf.archetype))?;
        let (metadata, witness_table) = (record.metadata, record.witness_table);

        tracing::trace!(
            archetype = %leaf.archetype.display(self.db),
            "rebuilding existential container"
        );
        let target = self.emitter.target();
        let offsets = ContainerOffsets::for_target(target);
        let layout = container_layout(target);
        let container = match self.container_storage.as_mut() {
            Some(storage) => {
                if storage.next + layout.size > storage.end {
                    return Err(CompilationError::codegen(format!(
                        "no container storage left for `{}`",
                        leaf.replacement.display(self.db)
                    )));
                }
                let (base, offset) = (storage.base, storage.next);
                storage.next += layout.size;
                self.emitter.offset_address(base, offset)
            }
            None => self.emitter.alloc_stack(layout),
        };
        self.emitter.store(payload, container, offsets.payload);
        self.emitter.store(metadata, container, offsets.metadata);
        self.emitter
            .store(witness_table, container, offsets.witness_table);
        Ok(container)
    }

    fn resubstitute_into(
        &mut self,
        orig: CanonicalType<'db>,
        subst: CanonicalType<'db>,
        src: &mut Explosion,
        dest: &mut Explosion,
    ) -> CompilationResult<()> {
        let db = self.db;
        let kind = src.kind();
        match pair_types(db, orig, subst)? {
            PairedNode::Same(ty) => dest.extend(src.claim(explosion_size(db, ty, kind))?),
            PairedNode::Aggregate(fields) => {
                if is_passed_by_address(db, orig, kind) {
                    let addr = src.claim_next()?;
                    dest.add(self.repack_resubstituted(orig, subst, addr)?);
                } else {
                    for (o, s) in fields {
                        self.resubstitute_into(o, s, src, dest)?;
                    }
                }
            }
            PairedNode::Function(_) => dest.extend(src.claim(explosion_size(db, orig, kind))?),
            PairedNode::Archetype(leaf) => {
                let handle = src.claim_next()?;
                match self.substitutions.resolve(db, &leaf)? {
                    Binding::Coincident => dest.add(handle),
                    Binding::Existential(_) => dest.add(self.rebuild_container(leaf, handle)?),
                    Binding::Concrete => {
                        tracing::trace!(
                            archetype = %leaf.archetype.display(db),
                            replacement = %leaf.replacement.display(db),
                            "unboxing concrete value"
                        );
                        let values = self.emitter.reload(db, leaf.replacement, kind, handle);
                        dest.extend(values);
                    }
                }
            }
        }
        Ok(())
    }

    /// Convert the substituted value at `src` into the abstract layout at `dst`.
    fn unsubstitute_memory(
        &mut self,
        orig: CanonicalType<'db>,
        subst: CanonicalType<'db>,
        src: (Value, u32),
        dst: (Value, u32),
    ) -> CompilationResult<()> {
        let db = self.db;
        let target = self.emitter.target();
        match pair_types(db, orig, subst)? {
            PairedNode::Same(ty) => self.emitter.copy_value(db, ty, src, dst),
            PairedNode::Aggregate(fields) => {
                let (orig_fields, subst_fields): (Vec<_>, Vec<_>) = fields.iter().copied().unzip();
                let orig_layout = aggregate_layout(db, target, orig_fields);
                let subst_layout = aggregate_layout(db, target, subst_fields);
                for (i, (o, s)) in fields.into_iter().enumerate() {
                    self.unsubstitute_memory(
                        o,
                        s,
                        (src.0, src.1 + subst_layout.field_offsets[i]),
                        (dst.0, dst.1 + orig_layout.field_offsets[i]),
                    )?;
                }
            }
            PairedNode::Function(_) => self.emitter.copy_value(db, subst, src, dst),
            PairedNode::Archetype(leaf) => {
                let handle = match self.substitutions.resolve(db, &leaf)? {
                    Binding::Coincident => self.emitter.load(ScalarKind::Opaque, src.0, src.1),
                    Binding::Existential(_) => {
                        let container = self.emitter.load(ScalarKind::Pointer, src.0, src.1);
                        self.open_container(leaf, container)?
                    }
                    Binding::Concrete => {
                        tracing::trace!(
                            archetype = %leaf.archetype.display(db),
                            replacement = %leaf.replacement.display(db),
                            "boxing concrete value in memory"
                        );
                        let storage = self
                            .emitter
                            .alloc_stack(type_layout(db, target, leaf.replacement));
                        self.emitter
                            .copy_value(db, leaf.replacement, src, (storage, 0));
                        storage
                    }
                };
                self.emitter.store(handle, dst.0, dst.1);
            }
        }
        Ok(())
    }

    /// Convert the abstract value at `src` into the substituted layout at `dst`.
    fn resubstitute_memory(
        &mut self,
        orig: CanonicalType<'db>,
        subst: CanonicalType<'db>,
        src: (Value, u32),
        dst: (Value, u32),
    ) -> CompilationResult<()> {
        let db = self.db;
        let target = self.emitter.target();
        match pair_types(db, orig, subst)? {
            PairedNode::Same(ty) => self.emitter.copy_value(db, ty, src, dst),
            PairedNode::Aggregate(fields) => {
                let (orig_fields, subst_fields): (Vec<_>, Vec<_>) = fields.iter().copied().unzip();
                let orig_layout = aggregate_layout(db, target, orig_fields);
                let subst_layout = aggregate_layout(db, target, subst_fields);
                for (i, (o, s)) in fields.into_iter().enumerate() {
                    self.resubstitute_memory(
                        o,
                        s,
                        (src.0, src.1 + orig_layout.field_offsets[i]),
                        (dst.0, dst.1 + subst_layout.field_offsets[i]),
                    )?;
                }
            }
            PairedNode::Function(_) => self.emitter.copy_value(db, orig, src, dst),
            PairedNode::Archetype(leaf) => {
                let handle = self.emitter.load(ScalarKind::Opaque, src.0, src.1);
                match self.substitutions.resolve(db, &leaf)? {
                    Binding::Coincident => self.emitter.store(handle, dst.0, dst.1),
                    Binding::Existential(_) => {
                        let container = self.rebuild_container(leaf, handle)?;
                        self.emitter.store(container, dst.0, dst.1);
                    }
                    Binding::Concrete => {
                        tracing::trace!(
                            archetype = %leaf.archetype.display(db),
                            replacement = %leaf.replacement.display(db),
                            "unboxing concrete value in memory"
                        );
                        self.emitter
                            .copy_value(db, leaf.replacement, (handle, 0), dst);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Convert `src` from the substituted to the abstract representation in a
/// fresh session, returning the existentials it opened.
pub fn unsubstitute<'db>(
    emitter: &mut FunctionEmitter<'_>,
    db: &'db dyn salsa::Database,
    substitutions: &SubstitutionList<'db>,
    orig: CanonicalType<'db>,
    subst: CanonicalType<'db>,
    src: &mut Explosion,
) -> CompilationResult<(Explosion, ExistentialSubstitutionMap<'db>)> {
    let mut session = ReabstractionSession::new(emitter, db, substitutions);
    let dest = session.unsubstitute(orig, subst, src)?;
    Ok((dest, session.into_existentials()))
}

/// Convert `src` from the abstract to the substituted representation.
///
/// `existentials` must hold a record for every archetype bound to an
/// existential type.
pub fn resubstitute<'db>(
    emitter: &mut FunctionEmitter<'_>,
    db: &'db dyn salsa::Database,
    substitutions: &SubstitutionList<'db>,
    existentials: ExistentialSubstitutionMap<'db>,
    orig: CanonicalType<'db>,
    subst: CanonicalType<'db>,
    src: &mut Explosion,
) -> CompilationResult<Explosion> {
    let mut session = ReabstractionSession::with_existentials(emitter, db, substitutions, existentials);
    session.resubstitute(orig, subst, src)
}
