//! Memory-map and ID-space constants shared across the kernel (spec §6, §3).

/// Bytes per page / physical frame. Every region boundary below is page-aligned.
pub const PAGE_SIZE: usize = 4096;

/// Region 0 (kernel) occupies `[0, VMEM_0_LIMIT)`.
pub const VMEM_0_LIMIT: usize = 0x0010_0000;

/// Region 1 (per-process user) occupies `[VMEM_1_BASE, VMEM_1_LIMIT)`.
pub const VMEM_1_BASE: usize = 0x0010_0000;
pub const VMEM_1_LIMIT: usize = 0x0020_0000;

/// Kernel stack lives inside Region 0, at the top of it.
pub const KERNEL_STACK_LIMIT: usize = VMEM_0_LIMIT;
pub const KERNEL_STACK_BASE: usize = KERNEL_STACK_LIMIT - 2 * PAGE_SIZE;

/// Number of frames backing one process's kernel stack.
pub const KSTACK_FRAMES: usize = (KERNEL_STACK_LIMIT - KERNEL_STACK_BASE) / PAGE_SIZE;

/// Scratch virtual page, below the kernel stack, used for temporary
/// kernel-side mappings of another address space's frames (fork copy,
/// `KCCopy`'s kernel-stack clone). One page is enough: the protocol never
/// needs two live scratch mappings at once (spec §4.2, §4.6).
pub const SCRATCH_PAGE: usize = KERNEL_STACK_BASE - PAGE_SIZE;

/// Terminal line / chunk size (spec §4.10).
pub const TERMINAL_MAX_LINE: usize = 128;

/// Pipe circular-buffer capacity (spec §3, §4.8).
pub const PIPE_BUFFER_LEN: usize = 4096;

/// Number of simulated terminals.
pub const NUM_TERMINALS: usize = 4;

/// ID space partitioning (spec §3 "ID space"). `M` stands in for `INT_MAX`;
/// kept small here so tests can exhaust a subspace without allocating
/// millions of objects.
pub const ID_SPACE_MAX: i32 = 900_000;
pub const LOCK_ID_BASE: i32 = 1;
pub const LOCK_ID_LIMIT: i32 = ID_SPACE_MAX / 3;
pub const CVAR_ID_BASE: i32 = LOCK_ID_LIMIT + 1;
pub const CVAR_ID_LIMIT: i32 = 2 * ID_SPACE_MAX / 3;
pub const PIPE_ID_BASE: i32 = CVAR_ID_LIMIT + 1;
pub const PIPE_ID_LIMIT: i32 = ID_SPACE_MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Lock,
    Cvar,
    Pipe,
}

/// Identifies an object's kind from its id alone, per the ID-range design
/// (spec §3, §9 "Id encoding by range").
pub fn kind_of(id: i32) -> Option<ObjectKind> {
    if (LOCK_ID_BASE..=LOCK_ID_LIMIT).contains(&id) {
        Some(ObjectKind::Lock)
    } else if (CVAR_ID_BASE..=CVAR_ID_LIMIT).contains(&id) {
        Some(ObjectKind::Cvar)
    } else if (PIPE_ID_BASE..=PIPE_ID_LIMIT).contains(&id) {
        Some(ObjectKind::Pipe)
    } else {
        None
    }
}

pub const fn round_up(addr: usize, page_size: usize) -> usize {
    (addr + page_size - 1) / page_size * page_size
}

pub const fn round_down(addr: usize, page_size: usize) -> usize {
    addr / page_size * page_size
}

pub const fn page_of(addr: usize) -> usize {
    addr / PAGE_SIZE
}
