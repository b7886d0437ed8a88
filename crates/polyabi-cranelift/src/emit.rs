//! Instruction emission primitives used by the reabstraction layer.
//!
//! `FunctionEmitter` wraps a Cranelift `FunctionBuilder` positioned in the
//! function being generated and knows the target's pointer width. All stack
//! storage and memory traffic of the transformer and extractor goes through
//! it.

use cranelift_codegen::ir::{InstBuilder, MemFlags, StackSlotData, StackSlotKind, Type, Value};
use cranelift_frontend::FunctionBuilder;
use polyabi_core::{
    CanonicalType, ExplosionKind, InvariantViolation, ScalarKind, TargetInfo, TypeLayout,
    is_passed_by_address, memory_leaves, type_layout,
};

use crate::CompilationResult;
use crate::abi::{pointer_type, scalar_type};

pub struct FunctionEmitter<'f> {
    builder: FunctionBuilder<'f>,
    target: TargetInfo,
}

impl<'f> FunctionEmitter<'f> {
    pub fn new(builder: FunctionBuilder<'f>, target: TargetInfo) -> Self {
        Self { builder, target }
    }

    pub fn target(&self) -> TargetInfo {
        self.target
    }

    pub fn builder(&mut self) -> &mut FunctionBuilder<'f> {
        &mut self.builder
    }

    pub fn pointer_type(&self) -> Type {
        pointer_type(self.target)
    }

    /// Cranelift type of one explosion piece.
    pub fn clif_type(&self, kind: ScalarKind) -> Type {
        scalar_type(self.target, kind)
    }

    pub fn value_type(&self, value: Value) -> Type {
        self.builder.func.dfg.value_type(value)
    }

    /// Allocate a stack slot for `layout` and return its address.
    pub fn alloc_stack(&mut self, layout: TypeLayout) -> Value {
        let align_shift = layout.alignment.max(1).trailing_zeros() as u8;
        let slot = self.builder.create_sized_stack_slot(StackSlotData::new(
            StackSlotKind::ExplicitSlot,
            layout.size.max(1),
            align_shift,
        ));
        let ptr = self.pointer_type();
        self.builder.ins().stack_addr(ptr, slot, 0)
    }

    /// Address `offset` bytes past `base`.
    pub fn offset_address(&mut self, base: Value, offset: u32) -> Value {
        if offset == 0 {
            return base;
        }
        self.builder.ins().iadd_imm(base, i64::from(offset))
    }

    pub fn load(&mut self, kind: ScalarKind, addr: Value, offset: u32) -> Value {
        let ty = self.clif_type(kind);
        self.builder
            .ins()
            .load(ty, MemFlags::trusted(), addr, offset as i32)
    }

    pub fn store(&mut self, value: Value, addr: Value, offset: u32) {
        self.builder
            .ins()
            .store(MemFlags::trusted(), value, addr, offset as i32);
    }

    /// Load every scalar of `ty` stored at `addr + offset`.
    pub fn load_leaves<'db>(
        &mut self,
        db: &'db dyn salsa::Database,
        ty: CanonicalType<'db>,
        addr: Value,
        offset: u32,
    ) -> Vec<Value> {
        memory_leaves(db, self.target, ty)
            .into_iter()
            .map(|leaf| self.load(leaf.kind, addr, offset + leaf.offset))
            .collect()
    }

    /// Store the maximal explosion of `ty` to `addr + offset`.
    pub fn store_leaves<'db>(
        &mut self,
        db: &'db dyn salsa::Database,
        ty: CanonicalType<'db>,
        values: &[Value],
        addr: Value,
        offset: u32,
    ) -> CompilationResult<()> {
        let leaves = memory_leaves(db, self.target, ty);
        if leaves.len() != values.len() {
            return Err(InvariantViolation::ExplosionLength {
                ty: ty.display(db).to_string(),
                expected: leaves.len(),
                produced: values.len(),
            }
            .into());
        }
        for (leaf, &value) in leaves.iter().zip(values) {
            self.store(value, addr, offset + leaf.offset);
        }
        Ok(())
    }

    /// Copy a value of type `ty` between two memory locations.
    pub fn copy_value<'db>(
        &mut self,
        db: &'db dyn salsa::Database,
        ty: CanonicalType<'db>,
        src: (Value, u32),
        dst: (Value, u32),
    ) {
        for leaf in memory_leaves(db, self.target, ty) {
            let value = self.load(leaf.kind, src.0, src.1 + leaf.offset);
            self.store(value, dst.0, dst.1 + leaf.offset);
        }
    }

    /// Put an exploded value into memory and return its address.
    ///
    /// A value exploded as its own address is returned as is.
    pub fn spill<'db>(
        &mut self,
        db: &'db dyn salsa::Database,
        ty: CanonicalType<'db>,
        kind: ExplosionKind,
        values: &[Value],
    ) -> CompilationResult<Value> {
        if is_passed_by_address(db, ty, kind) {
            return match values {
                [addr] => Ok(*addr),
                _ => Err(InvariantViolation::ExplosionLength {
                    ty: ty.display(db).to_string(),
                    expected: 1,
                    produced: values.len(),
                }
                .into()),
            };
        }
        let slot = self.alloc_stack(type_layout(db, self.target, ty));
        self.store_leaves(db, ty, values, slot, 0)?;
        Ok(slot)
    }

    /// Explode a value of type `ty` held in memory at `addr`.
    pub fn reload<'db>(
        &mut self,
        db: &'db dyn salsa::Database,
        ty: CanonicalType<'db>,
        kind: ExplosionKind,
        addr: Value,
    ) -> Vec<Value> {
        if is_passed_by_address(db, ty, kind) {
            vec![addr]
        } else {
            self.load_leaves(db, ty, addr, 0)
        }
    }

    pub fn finalize(self) {
        self.builder.finalize();
    }
}
