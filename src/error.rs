use thiserror::Error;

/// Errors produced by the translator core.
///
/// Every fallible operation reports one of these; expected conditions
/// (buffer overflow, arena exhaustion) never panic. `CapacityExceeded` is
/// recoverable: the caller decides between `reset` and a fresh arena.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JitError {
    #[error("failed to allocate {0} bytes of code cache memory")]
    AllocationFailure(usize),

    #[error("capacity exceeded: needed {needed} bytes, {available} available")]
    CapacityExceeded { needed: usize, available: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("memory protection change failed on range {offset:#x}+{len:#x}")]
    ProtectionFailure { offset: usize, len: usize },
}
