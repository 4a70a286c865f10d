//! Dead-code elimination.
//!
//! Mark-and-sweep from the side-effecting roots (stores, atomics,
//! branches, returns, barriers): everything not transitively feeding a
//! root is unlinked. Running the pass twice in a row must leave the second
//! run with nothing to do — several pipeline positions rely on that fixed
//! point.

use std::collections::HashSet;

use crate::ir::{Function, Module, ValueId};

#[derive(Default)]
pub struct Dce;

impl Dce {
    pub fn new() -> Self {
        Self
    }

    pub fn run(&mut self, module: &mut Module) {
        for func in &mut module.functions {
            self.run_on(func);
        }
    }

    pub fn run_on(&mut self, func: &mut Function) {
        let mut live: HashSet<ValueId> = HashSet::new();
        let mut worklist: Vec<ValueId> = Vec::new();
        for v in func.linear_insts() {
            if func.value(v).op().is_some_and(|op| op.has_side_effect()) {
                live.insert(v);
                worklist.push(v);
            }
        }
        while let Some(v) = worklist.pop() {
            if let Some(op) = func.value(v).op() {
                for operand in op.operands() {
                    if live.insert(operand) {
                        worklist.push(operand);
                    }
                }
            }
        }
        // A dead loop-carried phi and its update chain hold each other
        // in their use-lists, so dead-to-dead edges are dropped up front;
        // the reverse-order sweep then sees every use-list empty.
        let order = func.linear_insts();
        for &v in &order {
            if !live.contains(&v) {
                func.value_mut(v).uses.retain(|u| live.contains(u));
            }
        }
        for &v in order.iter().rev() {
            if !live.contains(&v) {
                func.remove(v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Op, Ty, ValueKind};

    fn dead_heavy_fn() -> Function {
        let mut b = FunctionBuilder::new("t");
        let p = b.param(Ty::ptr(Ty::F32), &[]);
        b.block("entry");
        let idx = b.range(0, 32);
        let ptrs = b.ptr_add(p, idx);
        let x = b.load(ptrs, None);
        // Dead chain: computed, never stored.
        let dbl = b.add(x, x);
        let _dead = b.mul(dbl, dbl);
        // Live chain.
        b.store(ptrs, x, None);
        b.ret();
        b.finish()
    }

    #[test]
    fn test_removes_unused_chain() {
        let mut f = dead_heavy_fn();
        let before = f.linear_insts().len();
        Dce::new().run_on(&mut f);
        let after = f.linear_insts().len();
        assert_eq!(before - after, 2);
        assert_eq!(f.to_string().matches("mul").count(), 0);
        assert_eq!(f.to_string().matches("load").count(), 1);
    }

    #[test]
    fn test_idempotent() {
        let mut f = dead_heavy_fn();
        let mut dce = Dce::new();
        dce.run_on(&mut f);
        let once = f.to_string();
        dce.run_on(&mut f);
        assert_eq!(once, f.to_string(), "second run must be a no-op");
    }

    #[test]
    fn test_removes_dead_loop_carried_phi() {
        // Induction variable whose whole chain is dead: the phi and its
        // increment consume each other across the back edge but feed
        // nothing observable.
        let mut b = FunctionBuilder::new("t");
        let entry = b.block("entry");
        let body = b.block("body");
        let exit = b.block("exit");

        b.switch_to(entry);
        let zero = b.const_i32(0);
        b.br(body);

        b.switch_to(body);
        let phi = b.phi(Ty::I32, vec![(entry, zero)]);
        let one = b.const_i32(1);
        let next = b.add(phi, one);
        let cond = b.const_bool(true);
        b.cond_br(cond, body, exit);

        b.switch_to(exit);
        b.ret();

        let mut f = b.finish();
        // Close the cycle: the phi takes `next` back around the loop.
        if let ValueKind::Inst {
            op: Op::Phi { incoming },
            ..
        } = &mut f.value_mut(phi).kind
        {
            incoming.push((body, next));
        }
        f.value_mut(next).uses.push(phi);

        Dce::new().run_on(&mut f);
        let listing = f.to_string();
        assert_eq!(listing.matches("phi").count(), 0);
        assert_eq!(listing.matches("= add").count(), 0);
    }

    #[test]
    fn test_keeps_atomics() {
        let mut b = FunctionBuilder::new("t");
        let p = b.param(Ty::ptr(Ty::F32), &[]);
        b.block("entry");
        let x = b.load(p, None);
        let r = b.atomic_add(p, x, None);
        // The atomic result is unused but the update is observable.
        let _ = r;
        b.ret();
        let mut f = b.finish();
        Dce::new().run_on(&mut f);
        assert_eq!(f.to_string().matches("atomic_add").count(), 1);
        assert_eq!(f.to_string().matches("load").count(), 1);
    }
}
