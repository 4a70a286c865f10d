//! Memory-access coalescing.
//!
//! Widens the `vector_width` of global loads and stores to the largest
//! power of two the alignment facts prove safe: the pointer tile must be
//! contiguous for that many elements, the byte address divisible by the
//! transaction size, and the mask (if any) uniform across the vector.
//! Accesses through shared-staged pointers are left alone; the swizzle
//! parameters already govern their pattern.

use crate::codegen::analysis::{Alignment, Layouts};
use crate::ir::{Function, Module, Op, Ty, ValueId, ValueKind};

/// Widest transaction per lane, in bytes.
const MAX_VECTOR_BYTES: u64 = 16;

#[derive(Default)]
pub struct Coalesce;

impl Coalesce {
    pub fn new() -> Self {
        Self
    }

    pub fn run(&mut self, module: &mut Module, align: &Alignment, layouts: &Layouts) {
        for func in &mut module.functions {
            self.run_on(func, align, layouts);
        }
    }

    pub fn run_on(&mut self, func: &mut Function, align: &Alignment, layouts: &Layouts) {
        for v in func.linear_insts() {
            let (ptr, mask) = match func.value(v).op() {
                Some(Op::Load { ptr, mask, .. }) => (*ptr, *mask),
                Some(Op::Store { ptr, mask, .. }) => (*ptr, *mask),
                _ => continue,
            };
            if !func.ty(ptr).is_tile() || layouts.is_shared(ptr) {
                continue;
            }
            let width = self.vector_width(func, align, ptr, mask);
            if width <= 1 {
                continue;
            }
            if let ValueKind::Inst { op, .. } = &mut func.value_mut(v).kind {
                match op {
                    Op::Load { vector_width, .. } | Op::Store { vector_width, .. } => {
                        *vector_width = width;
                    }
                    _ => {}
                }
            }
        }
    }

    fn vector_width(
        &self,
        func: &Function,
        align: &Alignment,
        ptr: ValueId,
        mask: Option<ValueId>,
    ) -> u32 {
        let elem_bytes = match func.ty(ptr).elem() {
            Ty::Ptr(pointee) => pointee.elem_bytes(),
            _ => return 1,
        };
        let mut width = align
            .contiguity(ptr)
            .min(MAX_VECTOR_BYTES / elem_bytes.max(1))
            .min(align.divisibility(ptr) / elem_bytes.max(1));
        // All lanes of one transaction share a predicate, so the mask
        // must be proven constant across the vector.
        if let Some(m) = mask {
            width = width.min(align.contiguity(m));
        }
        if width == 0 {
            return 1;
        }
        // Round down to a power of two.
        (1u64 << (63 - width.leading_zeros() as u64)) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::analysis::{Alignment, Axes, Layouts};
    use crate::driver::DeviceCaps;
    use crate::ir::{FunctionBuilder, ParamAttr, Ty};

    fn caps() -> DeviceCaps {
        DeviceCaps {
            parallel: true,
            shared_memory: 48 * 1024,
            generation: 80,
            shared_banks: 32,
        }
    }

    fn widen(f: &mut Function) {
        let mut align = Alignment::new();
        align.run(f);
        let mut axes = Axes::new();
        axes.run(f);
        let mut layouts = Layouts::new(4);
        layouts.run(f, &axes, &align, &caps());
        Coalesce::new().run_on(f, &align, &layouts);
    }

    #[test]
    fn test_aligned_contiguous_access_widens() {
        let mut b = FunctionBuilder::new("t");
        let p = b.param(Ty::ptr(Ty::F32), &[ParamAttr::Aligned(16)]);
        b.block("entry");
        let idx = b.range(0, 128);
        let ptrs = b.ptr_add(p, idx);
        let x = b.load(ptrs, None);
        b.store(ptrs, x, None);
        b.ret();
        let mut f = b.finish();

        widen(&mut f);

        // 16-byte alignment over 4-byte elements caps the vector at 4.
        let listing = f.to_string();
        assert_eq!(listing.matches("vec=4").count(), 2);
    }

    #[test]
    fn test_unaligned_base_stays_scalar() {
        let mut b = FunctionBuilder::new("t");
        let p = b.param(Ty::ptr(Ty::F32), &[]);
        b.block("entry");
        let idx = b.range(0, 128);
        let ptrs = b.ptr_add(p, idx);
        let x = b.load(ptrs, None);
        b.store(ptrs, x, None);
        b.ret();
        let mut f = b.finish();

        widen(&mut f);
        assert_eq!(f.to_string().matches("vec=").count(), 0);
    }

    #[test]
    fn test_varying_mask_blocks_widening() {
        let mut b = FunctionBuilder::new("t");
        let p = b.param(Ty::ptr(Ty::F32), &[ParamAttr::Aligned(16)]);
        let n = b.param(Ty::I32, &[]);
        b.block("entry");
        let idx = b.range(0, 128);
        let bound = b.splat(n, &[128]);
        let mask = b.cmp_lt(idx, bound);
        let ptrs = b.ptr_add(p, idx);
        let x = b.load(ptrs, Some(mask));
        b.store(ptrs, x, Some(mask));
        b.ret();
        let mut f = b.finish();

        widen(&mut f);
        assert_eq!(f.to_string().matches("vec=").count(), 0);
    }
}
