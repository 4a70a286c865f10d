//! Bank-conflict-avoiding swizzle parameters for shared-memory tiles.
//!
//! For each shared value the pass derives an XOR permutation
//! `col' = col ^ ((row / per_phase) % max_phase)` that spreads rows of the
//! staged tile across the device's memory banks. The parameters are pure
//! metadata for the backend; emitting unswizzled accesses stays correct,
//! only slower.

use std::collections::HashMap;

use crate::driver::DeviceCaps;
use crate::ir::{Function, ValueId};

use super::{LayoutKind, Layouts};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwizzleInfo {
    pub per_phase: u32,
    pub max_phase: u32,
}

impl SwizzleInfo {
    pub fn identity() -> Self {
        Self {
            per_phase: 1,
            max_phase: 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct Swizzle {
    info: HashMap<ValueId, SwizzleInfo>,
}

impl Swizzle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, v: ValueId) -> SwizzleInfo {
        self.info.get(&v).copied().unwrap_or(SwizzleInfo::identity())
    }

    pub fn run(&mut self, func: &Function, layouts: &Layouts, caps: &DeviceCaps) {
        self.info.clear();
        let bank_bytes = (caps.shared_banks as u64) * 4;
        for v in layouts.shared_values(func) {
            let layout = match layouts.get(v) {
                Some(l) if l.kind == LayoutKind::Shared => l,
                _ => continue,
            };
            let rank = layout.shape.len();
            if rank < 2 {
                self.info.insert(v, SwizzleInfo::identity());
                continue;
            }
            let fastest = layout.order[0];
            let row_bytes = layout.shape[fastest] * func.ty(v).elem_bytes();
            let rows: u64 = layout
                .shape
                .iter()
                .enumerate()
                .filter(|&(d, _)| d != fastest)
                .map(|(_, &e)| e)
                .product();
            let per_phase = (bank_bytes / row_bytes.max(1)).max(1);
            let max_phase = (rows / per_phase).clamp(1, 8);
            self.info.insert(
                v,
                SwizzleInfo {
                    per_phase: per_phase as u32,
                    max_phase: max_phase as u32,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::analysis::{Alignment, Axes, Layouts};
    use crate::ir::{FunctionBuilder, Op, Ty};

    fn caps() -> DeviceCaps {
        DeviceCaps {
            parallel: true,
            shared_memory: 48 * 1024,
            generation: 80,
            shared_banks: 32,
        }
    }

    fn staged_tile(shape: &[u64]) -> (Function, ValueId) {
        let mut b = FunctionBuilder::new("t");
        let p = b.param(Ty::ptr(Ty::F16), &[]);
        b.block("entry");
        let x = b.load(p, None);
        let wide = b.splat(x, shape);
        let mut f = b.finish();
        let entry = f.block_order[0];
        let staged = f.append(
            entry,
            Op::CopyToShared {
                src: wide,
                is_async: false,
            },
            Ty::tile(Ty::F16, shape),
        );
        (f, staged)
    }

    use crate::ir::Function;

    fn run_swizzle(f: &Function) -> (Layouts, Swizzle) {
        let mut align = Alignment::new();
        align.run(f);
        let mut axes = Axes::new();
        axes.run(f);
        let mut layouts = Layouts::new(4);
        layouts.run(f, &axes, &align, &caps());
        let mut swizzle = Swizzle::new();
        swizzle.run(f, &layouts, &caps());
        (layouts, swizzle)
    }

    #[test]
    fn test_narrow_rows_share_phases() {
        // 16-wide f16 rows are 32 bytes; four rows fit one 128-byte bank
        // stride, so the phase advances every fourth row.
        let (f, staged) = staged_tile(&[64, 16]);
        let (_, swizzle) = run_swizzle(&f);
        let info = swizzle.get(staged);
        assert_eq!(info.per_phase, 4);
        assert_eq!(info.max_phase, 8);
    }

    #[test]
    fn test_1d_tile_is_identity() {
        let (f, staged) = staged_tile(&[128]);
        let (_, swizzle) = run_swizzle(&f);
        assert_eq!(swizzle.get(staged), SwizzleInfo::identity());
    }

    #[test]
    fn test_unstaged_value_is_identity() {
        let (f, _) = staged_tile(&[64, 16]);
        let probe = f.linear_insts()[0];
        let (_, swizzle) = run_swizzle(&f);
        assert_eq!(swizzle.get(probe), SwizzleInfo::identity());
    }
}
