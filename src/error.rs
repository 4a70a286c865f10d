//! Compilation and launch errors.
//!
//! Per-configuration failures (`UnknownType`, `OutOfSharedMemory`,
//! `Frontend`, `Backend`) are collected by the tuning loop and never abort
//! it; only `NoValidConfiguration` escalates to the caller, carrying the
//! full per-candidate report. `GridRankExceeded` is an invocation-time
//! error and surfaces immediately.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// An IR parameter type outside the closed ABI set reached the
    /// argument-passing boundary.
    #[error("unknown parameter type `{0}`")]
    UnknownType(String),

    /// Shared-memory allocation exceeded the device budget.
    #[error("out of shared memory: need {needed} bytes, device has {available}")]
    OutOfSharedMemory { needed: u64, available: u64 },

    /// Reserved for register-pressure rejection. Not currently raised.
    #[error("out of registers")]
    OutOfRegisters,

    /// A launch was requested with more than three grid dimensions.
    #[error("grid rank {0} exceeds the 3-dimension launch limit")]
    GridRankExceeded(usize),

    /// Opaque failure propagated from the front-end collaborator.
    #[error("front end: {0}")]
    Frontend(String),

    /// Opaque failure propagated from the device backend.
    #[error("backend: {0}")]
    Backend(String),

    /// Every candidate in the options space failed to compile.
    /// Carries the formatted per-candidate diagnostic report.
    #[error("auto-tuner could not find any valid configuration:\n{0}")]
    NoValidConfiguration(String),
}

pub type Result<T> = std::result::Result<T, Error>;
