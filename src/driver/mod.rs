//! Collaborator seams between the core and its surroundings.
//!
//! The compiler core never talks to hardware or parses source itself;
//! it drives a `Device` (capabilities + black-box code generation), a
//! `Stream` (ordering domain for launches and timing) and a `Frontend`
//! (DSL text to IR). Tests substitute mocks; `driver::wgpu` is the
//! shipped reference device.

pub mod wgpu;

use crate::codegen::CompiledMeta;
use crate::error::Result;
use crate::ir;
use crate::runtime::Options;

/// Launch grid, padded to rank 3.
pub type Grid = [u64; 3];
/// Execution-group size per grid cell.
pub type BlockDim = [u32; 3];

/// Static capabilities the pipeline specializes against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCaps {
    /// Device executes groups of cooperating lanes; gates the staging
    /// and reassociation passes.
    pub parallel: bool,
    /// On-chip scratch budget in bytes; the allocation pass rejects
    /// configurations above it.
    pub shared_memory: u64,
    /// Architecture generation; `>= 80` enables asynchronous staging
    /// copies.
    pub generation: u32,
    /// Memory banks backing the on-chip scratch; feeds the swizzle
    /// parameters.
    pub shared_banks: u32,
}

/// A compilation and execution target.
pub trait Device: Send + Sync {
    fn caps(&self) -> DeviceCaps;

    /// Lower one optimized module to an executable kernel. The backend
    /// is a black box; `label` is a stable content-derived name for it
    /// to key caches and diagnostics on.
    fn codegen(
        &self,
        module: &ir::Module,
        meta: &CompiledMeta,
        opt: &Options,
        label: &str,
    ) -> Result<Box<dyn KernelHandle>>;
}

/// One compiled kernel, launchable any number of times.
pub trait KernelHandle: Send + Sync {
    /// Enqueue a launch on `stream`. `args` is the packed argument
    /// buffer laid out by [`crate::runtime::Kernel`].
    fn launch(&self, args: &[u8], grid: Grid, block: BlockDim, stream: &dyn Stream) -> Result<()>;
}

/// An ordering domain: launches on one stream execute in order;
/// `synchronize` blocks until everything enqueued has finished.
pub trait Stream {
    fn synchronize(&self) -> Result<()>;
}

/// The DSL front end. Macro substitution of tuning defines happens
/// behind this seam; the core passes them through as data. The first
/// function of the returned module is the kernel, by contract.
pub trait Frontend: Send + Sync {
    fn lower(
        &self,
        source: &str,
        defines: &[(String, String)],
    ) -> std::result::Result<ir::Module, String>;
}

/// Shader-text generation for the wgpu reference device. Split from
/// `Device` so backends can share the launch plumbing.
pub trait WgslEmitter: Send + Sync {
    fn emit(
        &self,
        module: &ir::Module,
        meta: &CompiledMeta,
        opt: &Options,
    ) -> std::result::Result<String, String>;
}
