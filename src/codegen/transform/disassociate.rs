//! Address-computation disassociation.
//!
//! Splits pointer arithmetic whose offset is itself a sum into a chain of
//! single-addend advances: `ptr_add(p, a + b)` becomes
//! `ptr_add(ptr_add(p, a), b)`. Later passes (alignment, reassociation,
//! coalescing) then see uniform atomic address units instead of compound
//! offset expressions. Runs early, before the first DCE sweeps the
//! orphaned sums.

use crate::ir::{BinOp, BlockId, Function, Module, Op, Ty, ValueId};

#[derive(Default)]
pub struct Disassociate;

impl Disassociate {
    pub fn new() -> Self {
        Self
    }

    pub fn run(&mut self, module: &mut Module) {
        for func in &mut module.functions {
            self.run_on(func);
        }
    }

    pub fn run_on(&mut self, func: &mut Function) {
        // Splitting may expose further splits (nested sums), so iterate
        // to a fixed point.
        loop {
            let mut changed = false;
            for v in func.linear_insts() {
                if let Some(split) = self.split_point(func, v) {
                    self.apply(func, v, split);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// `Some((block, ptr, a, b))` when `v` is a ptr_add whose offset is
    /// an addition.
    fn split_point(
        &self,
        func: &Function,
        v: ValueId,
    ) -> Option<(BlockId, ValueId, ValueId, ValueId)> {
        let (ptr, offset) = match func.value(v).op()? {
            Op::PtrAdd { ptr, offset } => (*ptr, *offset),
            _ => return None,
        };
        let (lhs, rhs) = match func.value(offset).op()? {
            Op::Binary {
                op: BinOp::Add,
                lhs,
                rhs,
            } => (*lhs, *rhs),
            _ => return None,
        };
        let block = match &func.value(v).kind {
            crate::ir::ValueKind::Inst { block, .. } => *block,
            _ => return None,
        };
        Some((block, ptr, lhs, rhs))
    }

    fn apply(&self, func: &mut Function, v: ValueId, split: (BlockId, ValueId, ValueId, ValueId)) {
        let (block, ptr, a, b) = split;
        let inner_ty = inner_ptr_ty(func, v, ptr, a);
        let inner = func.insert_before(block, v, Op::PtrAdd { ptr, offset: a }, inner_ty);
        let outer_ty = func.ty(v).clone();
        let outer = func.insert_before(block, v, Op::PtrAdd { ptr: inner, offset: b }, outer_ty);
        func.replace_all_uses(v, outer);
        func.remove(v);
    }
}

/// The inner advance already carries the tile shape if either input does.
fn inner_ptr_ty(func: &Function, original: ValueId, ptr: ValueId, offset: ValueId) -> Ty {
    let ptr_ty = func.ty(ptr);
    if ptr_ty.is_tile() || !func.ty(offset).is_tile() {
        ptr_ty.clone()
    } else {
        func.ty(original).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Ty};

    #[test]
    fn test_splits_compound_offset() {
        let mut b = FunctionBuilder::new("t");
        let p = b.param(Ty::ptr(Ty::F32), &[]);
        let base = b.param(Ty::I32, &[]);
        b.block("entry");
        let idx = b.range(0, 32);
        let off = b.splat(base, &[32]);
        let sum = b.add(idx, off);
        let ptrs = b.ptr_add(p, sum);
        let x = b.load(ptrs, None);
        b.store(ptrs, x, None);
        b.ret();
        let mut f = b.finish();

        Disassociate::new().run_on(&mut f);

        let listing = f.to_string();
        assert_eq!(listing.matches("ptr_add").count(), 2);
        // The orphaned sum is left for the next DCE sweep.
        let mut dce = super::super::Dce::new();
        dce.run_on(&mut f);
        assert_eq!(f.to_string().matches("= add ").count(), 0);
        assert_eq!(f.to_string().matches("ptr_add").count(), 2);
    }

    #[test]
    fn test_plain_ptradd_untouched() {
        let mut b = FunctionBuilder::new("t");
        let p = b.param(Ty::ptr(Ty::F32), &[]);
        b.block("entry");
        let idx = b.range(0, 32);
        let ptrs = b.ptr_add(p, idx);
        let x = b.load(ptrs, None);
        b.store(ptrs, x, None);
        let mut f = b.finish();
        let before = f.to_string();
        Disassociate::new().run_on(&mut f);
        assert_eq!(before, f.to_string());
    }
}
