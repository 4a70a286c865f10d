//! Read-only analyses over the IR graph.
//!
//! Each analysis is a struct holding per-run state; results are handed by
//! reference into the passes that depend on them. Analyses are rerun, not
//! patched, whenever a transform invalidates their inputs — the pipeline
//! in [`crate::codegen`] encodes the required ordering.

pub mod align;
pub mod allocation;
pub mod axes;
pub mod layout;
pub mod liveness;
pub mod swizzle;

pub use align::Alignment;
pub use allocation::Allocation;
pub use axes::Axes;
pub use layout::{Layout, LayoutKind, Layouts};
pub use liveness::{Interval, Liveness};
pub use swizzle::{Swizzle, SwizzleInfo};
