//! User and kernel execution contexts (spec §6 "User-context layout", §4.5).

use crate::trap::{TrapCode, TrapVector};

/// Number of general-purpose registers exposed to syscalls. Arguments land
/// in `regs[0..2]`, the return value in `regs[0]` (spec §6).
pub const NUM_REGS: usize = 8;

/// Saved user-mode state: registers, pc, sp, and the trap that last entered
/// the kernel on this process's behalf. The simulator hands the kernel one
/// of these at boot and on every trap; the kernel hands one back on every
/// resume.
#[derive(Debug, Clone, Copy)]
pub struct UserContext {
    pub regs: [i64; NUM_REGS],
    pub pc: usize,
    pub sp: usize,
    pub vector: TrapVector,
    pub code: TrapCode,
    pub addr: usize,
}

impl Default for UserContext {
    fn default() -> Self {
        UserContext {
            regs: [0; NUM_REGS],
            pc: 0,
            sp: 0,
            vector: TrapVector::Kernel,
            code: TrapCode::None,
            addr: 0,
        }
    }
}

/// Opaque kernel execution state, produced and consumed only by
/// `KernelContextSwitch` (spec §4.5). A real simulator fills this with
/// callee-saved registers and a resume pc; since this rewrite hosts the
/// kernel rather than executing real machine code, the fields only need to
/// carry enough to make `KCSwitch`/`KCCopy` observably correct: which PCB
/// produced this snapshot and a generation counter tests can assert on.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelContext {
    pub owner_pid: i32,
    pub generation: u64,
}
