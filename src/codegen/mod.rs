//! The optimization pipeline.
//!
//! `optimize` runs the fixed pass sequence over a lowered module and
//! returns the analysis results the backend consumes. The sequence is
//! normative: alignment is recomputed after every transform that
//! restructures address arithmetic, DCE bounds the growth of the
//! expansion passes, and the shared-memory passes (staging, swizzle,
//! liveness, allocation, barriers) run only once the layouts are final.
//!
//! Every pass owns its per-run state; dependent passes receive analysis
//! results by reference. Nothing here is shared across threads — the
//! tuning loop runs one whole pipeline per candidate configuration.

pub mod analysis;
pub mod transform;

use log::debug;

use crate::driver::DeviceCaps;
use crate::error::Result;
use crate::ir::Module;

use analysis::{Alignment, Allocation, Axes, Layouts, Liveness, Swizzle};
use transform::{Coalesce, Cts, Dce, Disassociate, Membar, Peephole, Reassociate};

/// Analysis results for one fully optimized module, handed to the
/// device backend alongside the IR.
#[derive(Debug)]
pub struct CompiledMeta {
    pub align: Alignment,
    pub axes: Axes,
    pub layouts: Layouts,
    pub swizzle: Swizzle,
    pub liveness: Liveness,
    pub allocation: Allocation,
    pub num_warps: u32,
}

/// Run the full pass pipeline in place.
///
/// Fails with [`crate::Error::OutOfSharedMemory`] when the staged tiles
/// of this configuration exceed the device budget; the caller treats
/// that as a per-configuration rejection, not a fatal error.
pub fn optimize(module: &mut Module, caps: &DeviceCaps, num_warps: u32) -> Result<CompiledMeta> {
    let use_async = caps.generation >= 80;

    let mut align = Alignment::new();
    let mut axes = Axes::new();
    let mut layouts = Layouts::new(num_warps);
    let mut dce = Dce::new();
    let mut peephole = Peephole::new();

    debug!("optimize: {} (num_warps={})", module.name, num_warps);

    align.run(module.entry());
    Disassociate::new().run(module);
    dce.run(module);
    peephole.run(module);
    dce.run(module);
    align.run(module.entry());

    if caps.parallel {
        debug!("staging dot operands (async={})", use_async);
        Cts::new(use_async).run(module);
    }

    axes.run(module.entry());
    layouts.run(module.entry(), &axes, &align, caps);
    Coalesce::new().run(module, &align, &layouts);
    dce.run(module);
    align.run(module.entry());
    dce.run(module);

    if caps.parallel {
        Reassociate::new().run(module);
        Cts::new(use_async).run(module);
    }

    peephole.run(module);
    dce.run(module);
    align.run(module.entry());

    // Final shape of the graph: recompute the layout world, then the
    // shared-memory placement that depends on it.
    axes.run(module.entry());
    layouts.run(module.entry(), &axes, &align, caps);

    let mut swizzle = Swizzle::new();
    swizzle.run(module.entry(), &layouts, caps);

    let mut liveness = Liveness::new();
    liveness.run(module.entry(), &layouts);

    let mut allocation = Allocation::new();
    allocation.run(module.entry(), &liveness, &layouts, caps.shared_memory)?;
    debug!("shared memory: {} bytes", allocation.allocated());

    Membar::new().run(module, &layouts, &allocation);

    Ok(CompiledMeta {
        align,
        axes,
        layouts,
        swizzle,
        liveness,
        allocation,
        num_warps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::ir::{FunctionBuilder, Module, ParamAttr, Ty};

    fn caps(parallel: bool, shared: u64) -> DeviceCaps {
        DeviceCaps {
            parallel,
            shared_memory: shared,
            generation: 80,
            shared_banks: 32,
        }
    }

    fn vecadd() -> Module {
        let mut b = FunctionBuilder::new("vecadd");
        let x = b.param(Ty::ptr(Ty::F32), &[ParamAttr::Aligned(16)]);
        let y = b.param(Ty::ptr(Ty::F32), &[ParamAttr::Aligned(16)]);
        b.block("entry");
        let idx = b.range(0, 1024);
        let xp = b.ptr_add(x, idx);
        let v = b.load(xp, None);
        let yp = b.ptr_add(y, idx);
        b.store(yp, v, None);
        b.ret();
        let mut m = Module::new("vecadd");
        m.functions.push(b.finish());
        m
    }

    fn matmul() -> Module {
        let mut b = FunctionBuilder::new("matmul");
        let pa = b.param(Ty::ptr(Ty::F16), &[ParamAttr::Aligned(16)]);
        let pb = b.param(Ty::ptr(Ty::F16), &[ParamAttr::Aligned(16)]);
        let pc = b.param(Ty::ptr(Ty::F32), &[ParamAttr::Aligned(16)]);
        b.block("entry");
        let sa = b.load(pa, None);
        let a = b.splat(sa, &[64, 16]);
        let sb = b.load(pb, None);
        let bt = b.splat(sb, &[16, 64]);
        let sc = b.load(pc, None);
        let acc = b.splat(sc, &[64, 64]);
        let d = b.dot(a, bt, acc);
        let idx = b.range(0, 64);
        let row = b.broadcast(idx, &[64, 64]);
        let ptrs = b.ptr_add(pc, row);
        b.store(ptrs, d, None);
        b.ret();
        let mut m = Module::new("matmul");
        m.functions.push(b.finish());
        m
    }

    #[test]
    fn test_vecadd_pipeline_widens_and_cleans() {
        let mut m = vecadd();
        let meta = optimize(&mut m, &caps(true, 48 * 1024), 4).unwrap();
        let listing = m.entry().to_string();
        // Aligned accesses widened to 4-element transactions.
        assert_eq!(listing.matches("vec=4").count(), 2);
        assert_eq!(listing.matches("barrier").count(), 0);
        assert_eq!(meta.allocation.allocated(), 0);
        assert_eq!(meta.num_warps, 4);
    }

    #[test]
    fn test_matmul_pipeline_stages_and_fences() {
        let mut m = matmul();
        let meta = optimize(&mut m, &caps(true, 48 * 1024), 4).unwrap();
        let listing = m.entry().to_string();
        assert_eq!(listing.matches("copy_to_shared.async").count(), 2);
        assert_eq!(listing.matches("barrier").count(), 1);
        // Both operand tiles allocated: 64x16 + 16x64 f16.
        assert_eq!(meta.allocation.allocated(), 2 * 64 * 16 * 2);
    }

    #[test]
    fn test_sequential_device_skips_staging() {
        let mut m = matmul();
        optimize(&mut m, &caps(false, 48 * 1024), 4).unwrap();
        let listing = m.entry().to_string();
        assert_eq!(listing.matches("copy_to_shared").count(), 0);
        assert_eq!(listing.matches("barrier").count(), 0);
    }

    #[test]
    fn test_budget_overflow_rejects_configuration() {
        let mut m = matmul();
        let err = optimize(&mut m, &caps(true, 1024), 4).unwrap_err();
        assert!(matches!(err, Error::OutOfSharedMemory { available: 1024, .. }));
    }

    #[test]
    fn test_old_generation_stages_synchronously() {
        let mut m = matmul();
        let old = DeviceCaps {
            generation: 70,
            ..caps(true, 48 * 1024)
        };
        optimize(&mut m, &old, 4).unwrap();
        let listing = m.entry().to_string();
        assert_eq!(listing.matches("copy_to_shared").count(), 2);
        assert_eq!(listing.matches(".async").count(), 0);
    }
}
