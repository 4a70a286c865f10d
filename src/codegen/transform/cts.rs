//! Copy-to-shared staging.
//!
//! Routes both matrix operands of every `dot` through on-chip shared
//! memory, where the swizzled layout lets every lane of the
//! multiply-accumulate read without bank conflicts. On devices that
//! support it the copy overlaps with compute (`is_async`); either way the
//! barrier-insertion pass later fences the handoff. The accumulator stays
//! in registers.

use crate::ir::{Function, Module, Op, ValueId, ValueKind};

pub struct Cts {
    use_async: bool,
}

impl Cts {
    pub fn new(use_async: bool) -> Self {
        Self { use_async }
    }

    pub fn run(&mut self, module: &mut Module) {
        for func in &mut module.functions {
            self.run_on(func);
        }
    }

    pub fn run_on(&mut self, func: &mut Function) {
        for v in func.linear_insts() {
            let (a, b) = match func.value(v).op() {
                Some(Op::Dot { a, b, .. }) => (*a, *b),
                _ => continue,
            };
            self.stage(func, v, a);
            if b != a {
                self.stage(func, v, b);
            }
        }
    }

    /// Insert a staging copy of `operand` before `user` and retarget that
    /// one use. Idempotent: already-staged operands pass through.
    fn stage(&self, func: &mut Function, user: ValueId, operand: ValueId) {
        if matches!(func.value(operand).op(), Some(Op::CopyToShared { .. })) {
            return;
        }
        let block = match &func.value(user).kind {
            ValueKind::Inst { block, .. } => *block,
            _ => return,
        };
        let ty = func.ty(operand).clone();
        let staged = func.insert_before(
            block,
            user,
            Op::CopyToShared {
                src: operand,
                is_async: self.use_async,
            },
            ty,
        );
        func.replace_operand_in(user, operand, staged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Ty};

    fn matmul_tile() -> Function {
        let mut b = FunctionBuilder::new("t");
        let pa = b.param(Ty::ptr(Ty::F16), &[]);
        let pb = b.param(Ty::ptr(Ty::F16), &[]);
        let pc = b.param(Ty::ptr(Ty::F32), &[]);
        b.block("entry");
        let sa = b.load(pa, None);
        let a = b.splat(sa, &[64, 16]);
        let sb = b.load(pb, None);
        let bm = b.splat(sb, &[16, 64]);
        let sc = b.load(pc, None);
        let acc = b.splat(sc, &[64, 64]);
        let d = b.dot(a, bm, acc);
        let idx = b.range(0, 64);
        let row = b.broadcast(idx, &[64, 64]);
        let ptrs = b.ptr_add(pc, row);
        b.store(ptrs, d, None);
        b.ret();
        b.finish()
    }

    #[test]
    fn test_dot_operands_get_staged() {
        let mut f = matmul_tile();
        Cts::new(false).run_on(&mut f);
        let listing = f.to_string();
        assert_eq!(listing.matches("copy_to_shared").count(), 2);
        assert_eq!(listing.matches(".async").count(), 0);
        // The accumulator feeds the dot directly.
        assert_eq!(listing.matches("dot").count(), 1);
    }

    #[test]
    fn test_async_flag_marks_copies() {
        let mut f = matmul_tile();
        Cts::new(true).run_on(&mut f);
        assert_eq!(f.to_string().matches("copy_to_shared.async").count(), 2);
    }

    #[test]
    fn test_second_run_is_noop() {
        let mut f = matmul_tile();
        let mut cts = Cts::new(false);
        cts.run_on(&mut f);
        let once = f.to_string();
        cts.run_on(&mut f);
        assert_eq!(once, f.to_string());
    }
}
