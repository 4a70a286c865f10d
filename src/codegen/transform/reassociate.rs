//! Pointer-arithmetic reassociation.
//!
//! Rewrites two-level advance chains `ptr_add(ptr_add(p, dyn), stat)`
//! into `ptr_add(ptr_add(p, stat), dyn)` when `stat` is statically known
//! (constants, ranges, and shape changes over them) and `dyn` is not. The
//! static part then folds into the base address at code-generation time
//! and the loop-carried update touches only the dynamic addend. Runs
//! after the first staging round, paired with a fresh staging pass for
//! the pointers it reshapes.

use crate::ir::{Function, Module, Op, Ty, ValueId, ValueKind};

#[derive(Default)]
pub struct Reassociate;

impl Reassociate {
    pub fn new() -> Self {
        Self
    }

    pub fn run(&mut self, module: &mut Module) {
        for func in &mut module.functions {
            self.run_on(func);
        }
    }

    pub fn run_on(&mut self, func: &mut Function) {
        loop {
            let mut changed = false;
            for v in func.linear_insts() {
                if let Some((base, dynamic, fixed)) = self.swap_point(func, v) {
                    self.apply(func, v, base, dynamic, fixed);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// `Some((base, dyn, stat))` when `v = ptr_add(ptr_add(base, dyn), stat)`
    /// with a static outer addend over a dynamic inner one.
    fn swap_point(&self, func: &Function, v: ValueId) -> Option<(ValueId, ValueId, ValueId)> {
        let (inner, stat) = match func.value(v).op()? {
            Op::PtrAdd { ptr, offset } => (*ptr, *offset),
            _ => return None,
        };
        let (base, dynamic) = match func.value(inner).op()? {
            Op::PtrAdd { ptr, offset } => (*ptr, *offset),
            _ => return None,
        };
        if is_static(func, stat) && !is_static(func, dynamic) {
            Some((base, dynamic, stat))
        } else {
            None
        }
    }

    fn apply(
        &self,
        func: &mut Function,
        v: ValueId,
        base: ValueId,
        dynamic: ValueId,
        fixed: ValueId,
    ) {
        let block = match &func.value(v).kind {
            ValueKind::Inst { block, .. } => *block,
            _ => return,
        };
        let inner_ty = advance_ty(func, v, base, fixed);
        let inner = func.insert_before(
            block,
            v,
            Op::PtrAdd {
                ptr: base,
                offset: fixed,
            },
            inner_ty,
        );
        let outer_ty = func.ty(v).clone();
        let outer = func.insert_before(
            block,
            v,
            Op::PtrAdd {
                ptr: inner,
                offset: dynamic,
            },
            outer_ty,
        );
        func.replace_all_uses(v, outer);
        func.remove(v);
    }
}

/// Statically known at compile time: constants, index ranges, and shape
/// changes over them.
fn is_static(func: &Function, v: ValueId) -> bool {
    match &func.value(v).kind {
        ValueKind::ConstInt { .. } | ValueKind::ConstFloat { .. } => true,
        ValueKind::Inst { op, .. } => match op {
            Op::Range { .. } => true,
            Op::Splat { src } | Op::Broadcast { src } | Op::Cast { src } => is_static(func, *src),
            _ => false,
        },
        ValueKind::Argument { .. } => false,
    }
}

fn advance_ty(func: &Function, original: ValueId, ptr: ValueId, offset: ValueId) -> Ty {
    let ptr_ty = func.ty(ptr);
    if ptr_ty.is_tile() || !func.ty(offset).is_tile() {
        ptr_ty.clone()
    } else {
        func.ty(original).clone()
    }
}
