//! Distribution-axis analysis.
//!
//! Tile dimensions that must be distributed identically across the
//! execution grid are connected into equivalence classes with a
//! union–find over `(value, dim)` pairs: elementwise operations tie each
//! result dimension to the same dimension of every tile operand, a dot
//! ties its result rows to `a` and columns to `b` (and the contracted
//! dimensions to each other), a reduce drops the reduced dimension.
//!
//! The resulting axis ids are what the layout pass groups values by, so
//! two values with identical axis vectors are guaranteed to agree on how
//! their elements map onto lanes.

use std::collections::HashMap;

use crate::ir::{Function, Op, ValueId};

type Dim = (ValueId, usize);

#[derive(Debug, Default)]
pub struct Axes {
    parent: HashMap<Dim, Dim>,
    ids: HashMap<Dim, usize>,
}

impl Axes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Axis ids of every dimension of `v` (empty for scalars).
    pub fn axes_of(&self, v: ValueId) -> Vec<usize> {
        let mut out = Vec::new();
        for dim in 0.. {
            match self.ids.get(&(v, dim)) {
                Some(id) => out.push(*id),
                None => break,
            }
        }
        out
    }

    pub fn run(&mut self, func: &Function) {
        self.parent.clear();
        self.ids.clear();
        for v in func.linear_insts() {
            let rank = func.ty(v).shape().len();
            for d in 0..rank {
                self.parent.entry((v, d)).or_insert((v, d));
            }
            self.connect(func, v);
        }
        // Number roots in first-seen program order for stable ids.
        let mut next = 0usize;
        let mut root_ids: HashMap<Dim, usize> = HashMap::new();
        for v in func.linear_insts() {
            let rank = func.ty(v).shape().len();
            for d in 0..rank {
                let root = self.find((v, d));
                let id = *root_ids.entry(root).or_insert_with(|| {
                    let id = next;
                    next += 1;
                    id
                });
                self.ids.insert((v, d), id);
            }
        }
    }

    fn find(&mut self, mut x: Dim) -> Dim {
        while self.parent[&x] != x {
            let grandparent = self.parent[&self.parent[&x]];
            self.parent.insert(x, grandparent);
            x = grandparent;
        }
        x
    }

    fn union(&mut self, a: Dim, b: Dim) {
        self.parent.entry(a).or_insert(a);
        self.parent.entry(b).or_insert(b);
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent.insert(rb, ra);
        }
    }

    /// Tie `v`'s dimensions to `other`'s matching dimensions.
    fn tie_same_rank(&mut self, func: &Function, v: ValueId, other: ValueId) {
        let rank = func.ty(v).shape().len();
        if func.ty(other).shape().len() != rank {
            return;
        }
        for d in 0..rank {
            self.union((v, d), (other, d));
        }
    }

    fn connect(&mut self, func: &Function, v: ValueId) {
        let op = match func.value(v).op() {
            Some(op) => op.clone(),
            None => return,
        };
        match op {
            Op::Binary { lhs, rhs, .. } => {
                self.tie_same_rank(func, v, lhs);
                self.tie_same_rank(func, v, rhs);
            }
            Op::PtrAdd { ptr, offset } => {
                self.tie_same_rank(func, v, ptr);
                self.tie_same_rank(func, v, offset);
            }
            Op::Load { ptr, mask, .. } => {
                self.tie_same_rank(func, v, ptr);
                if let Some(m) = mask {
                    self.tie_same_rank(func, v, m);
                }
            }
            Op::Store {
                ptr, value, mask, ..
            }
            | Op::AtomicAdd {
                ptr,
                value,
                mask,
            } => {
                self.tie_same_rank(func, ptr, value);
                if let Some(m) = mask {
                    self.tie_same_rank(func, ptr, m);
                }
            }
            Op::Select {
                cond,
                then_val,
                else_val,
            } => {
                self.tie_same_rank(func, v, cond);
                self.tie_same_rank(func, v, then_val);
                self.tie_same_rank(func, v, else_val);
            }
            Op::Broadcast { src } => {
                // Dimensions of matching extent keep their axis; expanded
                // size-1 dimensions get fresh axes.
                let dst_shape = func.ty(v).shape().to_vec();
                let src_shape = func.ty(src).shape().to_vec();
                if dst_shape.len() == src_shape.len() {
                    for d in 0..dst_shape.len() {
                        if dst_shape[d] == src_shape[d] {
                            self.union((v, d), (src, d));
                        }
                    }
                }
            }
            Op::Dot { a, b, acc } => {
                self.union((v, 0), (a, 0));
                self.union((v, 1), (b, 1));
                self.union((a, 1), (b, 0));
                self.tie_same_rank(func, v, acc);
            }
            Op::Reduce { src, dim, .. } => {
                let rank = func.ty(v).shape().len();
                for d in 0..rank {
                    let src_d = if d < dim { d } else { d + 1 };
                    self.union((v, d), (src, src_d));
                }
            }
            Op::Cast { src } | Op::CopyToShared { src, .. } => {
                self.tie_same_rank(func, v, src);
            }
            Op::Phi { incoming } => {
                for (_, inc) in incoming {
                    self.tie_same_rank(func, v, inc);
                }
            }
            Op::Splat { .. }
            | Op::Range { .. }
            | Op::GetProgramId { .. }
            | Op::GetNumPrograms { .. }
            | Op::AtomicCas { .. }
            | Op::AtomicXchg { .. }
            | Op::Barrier
            | Op::Branch { .. }
            | Op::Return { .. } => {}
        }
    }
}
