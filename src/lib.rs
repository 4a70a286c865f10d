//! tilec — a tile-based GPU kernel compiler with runtime autotuning.
//!
//! The core is two layers. The compilation pipeline ([`codegen`]) takes
//! a lowered IR module and runs the fixed analysis/transform sequence
//! that annotates it with layouts, liveness, shared-memory offsets and
//! barriers. The runtime layer ([`runtime`]) compiles one kernel source
//! under a cross-product of tuning options, benchmarks the survivors on
//! the caller's stream and caches the winner per argument signature.
//!
//! Front end, device backend and streams are collaborator traits in
//! [`driver`]; a wgpu-backed reference device ships in
//! [`driver::wgpu`].

pub mod codegen;
pub mod driver;
pub mod error;
pub mod ir;
pub mod runtime;

pub use error::{Error, Result};
pub use ir::{FunctionBuilder, Ty};
pub use runtime::{Options, OptionsSpace};
