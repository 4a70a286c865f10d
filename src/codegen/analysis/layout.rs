//! Layout assignment.
//!
//! Decides, per tile value, where its elements physically live: spread
//! across the parallel lanes of the execution group (`Distributed`),
//! resident in fast on-chip memory (`Shared`), or held once per group
//! (`Scalar`, all non-tile values).
//!
//! Values whose axis vectors agree (see [`super::Axes`]) share one layout
//! object, making this the single source of truth for "where does this
//! tile live". Later passes commit to these assignments; any transform
//! that introduces new tile values must be followed by a rerun before the
//! results are consumed again.

use std::collections::HashMap;

use crate::driver::DeviceCaps;
use crate::ir::{Function, Op, Ty, ValueId};

use super::{Alignment, Axes};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    Distributed,
    Shared,
    Scalar,
}

#[derive(Debug, Clone)]
pub struct Layout {
    pub kind: LayoutKind,
    pub shape: Vec<u64>,
    /// Dimension indices, fastest-varying first.
    pub order: Vec<usize>,
    /// Warps assigned along each dimension (`Distributed` only);
    /// the product equals the warp count.
    pub warps_per_dim: Vec<u32>,
    /// Footprint in on-chip memory (`Shared` only).
    pub size_bytes: u64,
    /// Elements moved per lane when staging into shared memory, bounded
    /// by the contiguity alignment proved for the staged operand.
    pub vec: u32,
}

#[derive(Debug)]
pub struct Layouts {
    num_warps: u32,
    assignment: HashMap<ValueId, usize>,
    layouts: Vec<Layout>,
}

impl Layouts {
    pub fn new(num_warps: u32) -> Self {
        Self {
            num_warps,
            assignment: HashMap::new(),
            layouts: Vec::new(),
        }
    }

    pub fn num_warps(&self) -> u32 {
        self.num_warps
    }

    pub fn get(&self, v: ValueId) -> Option<&Layout> {
        self.assignment.get(&v).map(|&i| &self.layouts[i])
    }

    pub fn kind(&self, v: ValueId) -> LayoutKind {
        self.get(v).map_or(LayoutKind::Scalar, |l| l.kind)
    }

    pub fn is_shared(&self, v: ValueId) -> bool {
        self.kind(v) == LayoutKind::Shared
    }

    /// Shared-layout values in program order.
    pub fn shared_values(&self, func: &Function) -> Vec<ValueId> {
        func.linear_insts()
            .into_iter()
            .filter(|&v| self.is_shared(v))
            .collect()
    }

    pub fn run(&mut self, func: &Function, axes: &Axes, align: &Alignment, caps: &DeviceCaps) {
        self.assignment.clear();
        self.layouts.clear();
        let mut groups: HashMap<Vec<usize>, usize> = HashMap::new();
        for v in func.linear_insts() {
            let ty = func.ty(v).clone();
            if !ty.is_tile() {
                continue;
            }
            if let Some(Op::CopyToShared { src, .. }) = func.value(v).op() {
                let idx = self.layouts.len();
                self.layouts.push(shared_layout(&ty, align, *src));
                self.assignment.insert(v, idx);
                continue;
            }
            let key = axes.axes_of(v);
            let num_warps = self.num_warps;
            let layouts = &mut self.layouts;
            let idx = *groups.entry(key).or_insert_with(|| {
                let idx = layouts.len();
                layouts.push(distributed_layout(&ty, num_warps, caps));
                idx
            });
            self.assignment.insert(v, idx);
        }
    }

}

/// Shared layouts inherit their staging vector width from the contiguity
/// proved for the staged operand, capped at a 16-byte transaction.
fn shared_layout(ty: &Ty, align: &Alignment, staged: ValueId) -> Layout {
    let shape = ty.shape().to_vec();
    let max_vec = (16 / ty.elem_bytes().max(1)).max(1);
    Layout {
        kind: LayoutKind::Shared,
        order: default_order(shape.len()),
        shape,
        warps_per_dim: Vec::new(),
        size_bytes: ty.size_bytes(),
        vec: align.contiguity(staged).min(max_vec) as u32,
    }
}

/// Row-major default: the last dimension varies fastest.
fn default_order(rank: usize) -> Vec<usize> {
    (0..rank).rev().collect()
}

fn distributed_layout(ty: &Ty, num_warps: u32, _caps: &DeviceCaps) -> Layout {
    let shape = ty.shape().to_vec();
    // Split the warp count across dimensions two ways at a time, always
    // widening the dimension with the most rows left per warp.
    let mut warps = vec![1u32; shape.len()];
    let mut left = num_warps;
    while left > 1 && !shape.is_empty() {
        let (best, _) = warps
            .iter()
            .enumerate()
            .map(|(d, &w)| (d, shape[d] / w as u64))
            .max_by_key(|&(_, per_warp)| per_warp)
            .expect("non-empty shape");
        warps[best] *= 2;
        left /= 2;
    }
    Layout {
        kind: LayoutKind::Distributed,
        order: default_order(shape.len()),
        shape,
        warps_per_dim: warps,
        size_bytes: 0,
        vec: 1,
    }
}
