//! Kernel error taxonomy and the syscall-return convention (spec §7).

use thiserror::Error;

/// The negative sentinel every syscall returns on failure, as opposed to a
/// non-negative result. The exact value mirrors the C assignment's `ERROR`.
pub const ERROR: i64 = -1;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("out of memory")]
    NoMem,
    #[error("permission denied")]
    PermissionDenied,
    #[error("object not found")]
    NotFound,
    #[error("object busy")]
    Busy,
    #[error("id subspace exhausted")]
    Exhausted,
}

pub type KResult<T> = Result<T, KernelError>;

/// Converts a syscall result into the `regs[0]` convention: non-negative on
/// success, `ERROR` on any failure kind. The kind itself is not surfaced to
/// user space (the ABI has no errno), only logged by the caller.
pub fn to_regs(result: KResult<i64>) -> i64 {
    result.unwrap_or(ERROR)
}
