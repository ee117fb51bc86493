//! The simulator boundary (spec §1 "the simulator provides...", §10).
//!
//! Everything the spec calls an "external collaborator" — the TLB-flush
//! register, the terminal devices, `Halt`/`Pause`, and the PID allocator —
//! is gathered behind this one trait. Production code runs against
//! [`SimHal`]; the unit tests in every other module run against
//! [`MockHal`], the way the teacher crate isolates `riscv.rs`/`uart.rs`
//! behind small free functions so the rest of the kernel never touches a
//! CSR or MMIO address directly.

use crate::context::KernelContext;
use crate::memlayout::NUM_TERMINALS;

/// A single request to hand the kernel's execution state to `next` and
/// resume whatever kernel context `next` last left behind. The callback
/// signature mirrors `KernelContextSwitch(fn, curr, next)` (spec §4.5):
/// the kernel hands in the current process's pid and the target's pid, the
/// `Hal` invokes `body`, and the returned context becomes the resumption
/// point.
pub trait Hal {
    /// Physical memory size in bytes, fixed for the lifetime of the boot.
    fn pmem_size(&self) -> usize;

    /// Raw read/write into the simulated physical memory, used by the page
    /// table manager to move bytes between address spaces (spec §4.2, §4.6
    /// "Kernel temporary mappings"). `offset` is a physical byte offset.
    fn phys_read(&self, offset: usize, buf: &mut [u8]);
    fn phys_write(&mut self, offset: usize, buf: &[u8]);

    /// Invalidates a single virtual page's TLB entry. `None` address means
    /// flush everything (spec §4.2 "flush the entire Region-1 TLB").
    fn tlb_flush(&mut self, vaddr: Option<usize>);

    /// Allocates a PID. The spec assigns PID allocation to the simulator;
    /// the kernel never invents one itself.
    fn alloc_pid(&mut self) -> i32;

    /// `KernelContextSwitch`: invokes `body(kc_in, curr_pid, next_pid)` and
    /// returns whatever context `body` produces. `curr_pid`/`next_pid` are
    /// supplied so the callback (which lives in the scheduler, not here)
    /// can look PCBs up; `Hal` itself holds no process state.
    fn kernel_context_switch(
        &mut self,
        curr_pid: i32,
        next_pid: i32,
        body: &mut dyn FnMut(KernelContext, i32, i32) -> KernelContext,
    ) -> KernelContext;

    /// Ingests up to `buf.len()` bytes into terminal `tty` from an external
    /// source, as `TtyReceive` would. Used by tests to simulate input
    /// arriving; production `SimHal` would be fed by the real simulator.
    fn tty_receive(&mut self, tty: usize) -> Vec<u8>;

    /// `TtyTransmit`: pushes `buf` out to terminal `tty`.
    fn tty_transmit(&mut self, tty: usize, buf: &[u8]);

    /// Halts the simulated machine. Never returns.
    fn halt(&mut self) -> !;

    /// Yields the rest of this quantum without blocking — used by the idle
    /// process (spec §4.5 "if READY is empty, the idle process runs").
    fn pause(&mut self);
}

/// Production `Hal`: owns the simulated physical memory array and the
/// per-terminal transmit/receive byte queues a real Yalnix simulator would
/// own on the other side of the trap boundary.
pub struct SimHal {
    pmem: Vec<u8>,
    next_pid: i32,
    tty_in: [Vec<u8>; NUM_TERMINALS],
    tty_out: [Vec<u8>; NUM_TERMINALS],
    kc_generation: u64,
    halted: bool,
}

impl SimHal {
    pub fn new(pmem_size: usize) -> Self {
        SimHal {
            pmem: vec![0u8; pmem_size],
            next_pid: 1,
            tty_in: Default::default(),
            tty_out: Default::default(),
            kc_generation: 0,
            halted: false,
        }
    }

    /// Test/debug hook: queues bytes as if they arrived on `tty`'s line.
    pub fn inject_tty_input(&mut self, tty: usize, bytes: &[u8]) {
        self.tty_in[tty].extend_from_slice(bytes);
    }

    pub fn tty_output(&self, tty: usize) -> &[u8] {
        &self.tty_out[tty]
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }
}

impl Hal for SimHal {
    fn pmem_size(&self) -> usize {
        self.pmem.len()
    }

    fn phys_read(&self, offset: usize, buf: &mut [u8]) {
        buf.copy_from_slice(&self.pmem[offset..offset + buf.len()]);
    }

    fn phys_write(&mut self, offset: usize, buf: &[u8]) {
        self.pmem[offset..offset + buf.len()].copy_from_slice(buf);
    }

    fn tlb_flush(&mut self, _vaddr: Option<usize>) {
        // The real register write has no observable state here: address
        // translation in this rewrite goes through the page tables the
        // kernel owns directly, never through a cached hardware TLB.
    }

    fn alloc_pid(&mut self) -> i32 {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    fn kernel_context_switch(
        &mut self,
        curr_pid: i32,
        next_pid: i32,
        body: &mut dyn FnMut(KernelContext, i32, i32) -> KernelContext,
    ) -> KernelContext {
        self.kc_generation += 1;
        let kc_in = KernelContext {
            owner_pid: curr_pid,
            generation: self.kc_generation,
        };
        body(kc_in, curr_pid, next_pid)
    }

    fn tty_receive(&mut self, tty: usize) -> Vec<u8> {
        std::mem::take(&mut self.tty_in[tty])
    }

    fn tty_transmit(&mut self, tty: usize, buf: &[u8]) {
        self.tty_out[tty].extend_from_slice(buf);
    }

    fn halt(&mut self) -> ! {
        self.halted = true;
        log::info!("halt: simulated machine stopped");
        std::process::exit(0);
    }

    fn pause(&mut self) {}
}

/// Test double. Identical semantics to `SimHal` minus the process exit on
/// `halt`, so unit tests can assert a halt happened without killing the
/// test binary.
#[cfg(any(test, feature = "test-util"))]
pub struct MockHal {
    pub inner: SimHal,
    pub halted: bool,
}

#[cfg(any(test, feature = "test-util"))]
impl MockHal {
    pub fn new(pmem_size: usize) -> Self {
        MockHal {
            inner: SimHal::new(pmem_size),
            halted: false,
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Hal for MockHal {
    fn pmem_size(&self) -> usize {
        self.inner.pmem_size()
    }
    fn phys_read(&self, offset: usize, buf: &mut [u8]) {
        self.inner.phys_read(offset, buf)
    }
    fn phys_write(&mut self, offset: usize, buf: &[u8]) {
        self.inner.phys_write(offset, buf)
    }
    fn tlb_flush(&mut self, vaddr: Option<usize>) {
        self.inner.tlb_flush(vaddr)
    }
    fn alloc_pid(&mut self) -> i32 {
        self.inner.alloc_pid()
    }
    fn kernel_context_switch(
        &mut self,
        curr_pid: i32,
        next_pid: i32,
        body: &mut dyn FnMut(KernelContext, i32, i32) -> KernelContext,
    ) -> KernelContext {
        self.inner.kernel_context_switch(curr_pid, next_pid, body)
    }
    fn tty_receive(&mut self, tty: usize) -> Vec<u8> {
        self.inner.tty_receive(tty)
    }
    fn tty_transmit(&mut self, tty: usize, buf: &[u8]) {
        self.inner.tty_transmit(tty, buf)
    }
    fn halt(&mut self) -> ! {
        // Tests never need the real process to die; they only need to
        // observe that a halt was requested, so this path panics with a
        // recognizable message instead of calling `process::exit`.
        self.halted = true;
        panic!("MockHal::halt invoked");
    }
    fn pause(&mut self) {
        self.inner.pause()
    }
}
