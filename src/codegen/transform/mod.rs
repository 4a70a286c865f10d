//! Transforms that rewrite the IR graph in place.
//!
//! Ordering matters: each pass relies on invariants left by its
//! predecessors (disassociation before the first DCE, coalescing only on
//! freshly recomputed alignment, barrier insertion only after offsets are
//! known). The pipeline in [`crate::codegen`] is the one true order.

pub mod coalesce;
pub mod cts;
pub mod dce;
pub mod disassociate;
pub mod membar;
pub mod peephole;
pub mod reassociate;

pub use coalesce::Coalesce;
pub use cts::Cts;
pub use dce::Dce;
pub use disassociate::Disassociate;
pub use membar::Membar;
pub use peephole::Peephole;
pub use reassociate::Reassociate;
