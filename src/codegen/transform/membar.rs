//! Barrier insertion for shared-memory hazards.
//!
//! Forward dataflow over the CFG tracking which shared buffers have been
//! written (staged) or read since the last fence. A barrier goes in front
//! of any instruction that would read bytes with a pending write (RAW) and
//! in front of any staging copy that would overwrite bytes another live
//! value was read from (WAR, possible once the allocator reuses offsets).
//! Aliasing is judged on allocated byte ranges, so this pass must run
//! after allocation and never before it.

use std::collections::{HashMap, HashSet};

use crate::codegen::analysis::{Allocation, Layouts};
use crate::ir::{BlockId, Function, Module, Op, Ty, ValueId};

#[derive(Default, Clone, PartialEq)]
struct Pending {
    writes: HashSet<ValueId>,
    reads: HashSet<ValueId>,
}

#[derive(Default)]
pub struct Membar;

impl Membar {
    pub fn new() -> Self {
        Self
    }

    pub fn run(&mut self, module: &mut Module, layouts: &Layouts, alloc: &Allocation) {
        for func in &mut module.functions {
            self.run_on(func, layouts, alloc);
        }
    }

    pub fn run_on(&mut self, func: &mut Function, layouts: &Layouts, alloc: &Allocation) {
        let ranges = self.byte_ranges(func, layouts, alloc);

        // Fixed point over block entry states; loops feed their own
        // pending sets back around until nothing changes.
        let mut outs: HashMap<BlockId, Pending> = HashMap::new();
        loop {
            let mut changed = false;
            for &b in &func.block_order.clone() {
                let entry = self.join(func, b, &outs);
                let (out, _) = self.scan(func, b, entry, &ranges);
                if outs.get(&b) != Some(&out) {
                    outs.insert(b, out);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        // Second pass actually places the fences, using the converged
        // entry states.
        for &b in &func.block_order.clone() {
            let entry = self.join(func, b, &outs);
            let (_, fences) = self.scan(func, b, entry, &ranges);
            for before in fences {
                func.insert_before(b, before, Op::Barrier, Ty::Void);
            }
        }
    }

    fn byte_ranges(
        &self,
        func: &Function,
        layouts: &Layouts,
        alloc: &Allocation,
    ) -> HashMap<ValueId, (u64, u64)> {
        let mut ranges = HashMap::new();
        for v in layouts.shared_values(func) {
            if let (Some(off), Some(layout)) = (alloc.offset(v), layouts.get(v)) {
                ranges.insert(v, (off, off + layout.size_bytes));
            }
        }
        ranges
    }

    fn join(&self, func: &Function, b: BlockId, outs: &HashMap<BlockId, Pending>) -> Pending {
        let mut entry = Pending::default();
        for pred in &func.block(b).preds {
            if let Some(out) = outs.get(pred) {
                entry.writes.extend(out.writes.iter().copied());
                entry.reads.extend(out.reads.iter().copied());
            }
        }
        entry
    }

    /// Simulate one block: returns the exit state and the instructions
    /// that need a fence in front of them.
    fn scan(
        &self,
        func: &Function,
        b: BlockId,
        mut state: Pending,
        ranges: &HashMap<ValueId, (u64, u64)>,
    ) -> (Pending, Vec<ValueId>) {
        let mut fences = Vec::new();
        for &v in &func.block(b).insts {
            let op = match func.value(v).op() {
                Some(op) => op,
                None => continue,
            };
            if matches!(op, Op::Barrier) {
                state = Pending::default();
                continue;
            }

            let shared_operands: Vec<ValueId> = op
                .operands()
                .into_iter()
                .filter(|o| ranges.contains_key(o))
                .collect();

            // RAW: reading bytes some unfenced staging copy wrote.
            let raw = shared_operands.iter().any(|o| {
                state
                    .writes
                    .iter()
                    .any(|w| w == o || overlaps(ranges, *w, *o))
            });
            // WAR: overwriting bytes another value was read from.
            let war = matches!(op, Op::CopyToShared { .. })
                && ranges.contains_key(&v)
                && state
                    .reads
                    .iter()
                    .any(|r| *r != v && overlaps(ranges, *r, v));

            if raw || war {
                fences.push(v);
                state = Pending::default();
            }
            for o in shared_operands {
                state.reads.insert(o);
            }
            if matches!(op, Op::CopyToShared { .. }) && ranges.contains_key(&v) {
                state.writes.insert(v);
            }
        }
        (state, fences)
    }
}

fn overlaps(ranges: &HashMap<ValueId, (u64, u64)>, a: ValueId, b: ValueId) -> bool {
    let (Some(&(a0, a1)), Some(&(b0, b1))) = (ranges.get(&a), ranges.get(&b)) else {
        return false;
    };
    a0 < b1 && b0 < a1
}
