//! Local algebraic simplification.
//!
//! Folds constant scalar arithmetic, strips arithmetic identities
//! (`x + 0`, `x * 1`, `x << 0`), collapses stacked shape changes
//! (broadcast of broadcast, broadcast of splat) and degenerate selects.
//! Each rewrite either retargets to an existing value or materializes
//! one fresh value; the orphans are left for the following DCE sweep.

use crate::ir::{BinOp, Function, Module, Op, ValueId, ValueKind};

enum Rewrite {
    /// Retarget all uses to a value that already exists.
    Existing(ValueId),
    /// Replace with a folded integer constant of the same type.
    Const(i64),
    /// Replace with one fresh instruction of the same type.
    Fresh(Op),
}

#[derive(Default)]
pub struct Peephole;

impl Peephole {
    pub fn new() -> Self {
        Self
    }

    pub fn run(&mut self, module: &mut Module) {
        for func in &mut module.functions {
            self.run_on(func);
        }
    }

    pub fn run_on(&mut self, func: &mut Function) {
        // Rewrites expose further rewrites (folded constants feed the
        // next fold), so iterate to a fixed point.
        loop {
            let mut changed = false;
            for v in func.linear_insts() {
                let Some(rewrite) = self.simplify(func, v) else {
                    continue;
                };
                let block = match &func.value(v).kind {
                    ValueKind::Inst { block, .. } => *block,
                    _ => continue,
                };
                let ty = func.ty(v).clone();
                let replacement = match rewrite {
                    Rewrite::Existing(r) => r,
                    Rewrite::Const(c) => func.const_int(ty, c),
                    Rewrite::Fresh(op) => func.insert_before(block, v, op, ty),
                };
                func.replace_all_uses(v, replacement);
                func.remove(v);
                changed = true;
            }
            if !changed {
                break;
            }
        }
    }

    fn simplify(&self, func: &Function, v: ValueId) -> Option<Rewrite> {
        match func.value(v).op()? {
            Op::Binary { op, lhs, rhs } => self.simplify_binary(func, v, *op, *lhs, *rhs),
            Op::Broadcast { src } => match func.value(*src).op() {
                // broadcast(broadcast(x)) and broadcast(splat(x)) both
                // reach the final shape in one step.
                Some(Op::Broadcast { src: inner }) => {
                    Some(Rewrite::Fresh(Op::Broadcast { src: *inner }))
                }
                Some(Op::Splat { src: inner }) => Some(Rewrite::Fresh(Op::Splat { src: *inner })),
                _ => None,
            },
            Op::Select {
                then_val, else_val, ..
            } if then_val == else_val => Some(Rewrite::Existing(*then_val)),
            Op::Cast { src } if func.ty(*src) == func.ty(v) => Some(Rewrite::Existing(*src)),
            _ => None,
        }
    }

    fn simplify_binary(
        &self,
        func: &Function,
        v: ValueId,
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
    ) -> Option<Rewrite> {
        let lc = func.value(lhs).as_const_int();
        let rc = func.value(rhs).as_const_int();

        if let (Some(a), Some(b)) = (lc, rc) {
            if let Some(folded) = fold(op, a, b) {
                return Some(Rewrite::Const(folded));
            }
        }

        // Identities keep the non-constant side; both sides carry the
        // result type, so the retarget is type-preserving.
        let ident =
            |c: Option<i64>, x: ValueId, id: i64| (c == Some(id)).then_some(Rewrite::Existing(x));
        match op {
            BinOp::Add | BinOp::Or | BinOp::Xor => ident(rc, lhs, 0).or_else(|| ident(lc, rhs, 0)),
            BinOp::Sub | BinOp::Shl | BinOp::Shr => ident(rc, lhs, 0),
            BinOp::Mul => ident(rc, lhs, 1).or_else(|| ident(lc, rhs, 1)).or_else(|| {
                // x * 0 folds only for scalars; a tile result needs a
                // splat the next pipeline stage has no use for.
                let zeroed = (lc == Some(0) || rc == Some(0)) && !func.ty(v).is_tile();
                zeroed.then_some(Rewrite::Const(0))
            }),
            BinOp::Div => ident(rc, lhs, 1),
            _ => None,
        }
    }
}

fn fold(op: BinOp, a: i64, b: i64) -> Option<i64> {
    Some(match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div if b != 0 => a.wrapping_div(b),
        BinOp::Rem if b != 0 => a.wrapping_rem(b),
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::Shl if (0..64).contains(&b) => a.wrapping_shl(b as u32),
        BinOp::Shr if (0..64).contains(&b) => a.wrapping_shr(b as u32),
        BinOp::CmpEq => (a == b) as i64,
        BinOp::CmpLt => (a < b) as i64,
        _ => return None,
    })
}
