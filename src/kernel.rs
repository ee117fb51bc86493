//! Global kernel state and boot sequence (spec §9 "Global mutable kernel
//! state", §6 "Boot entry"). Grounded on the teacher's `proc.rs` process
//! table plus `kmain` in the old entry point: one process-wide singleton,
//! built once at boot and never torn down.

use log::info;

use crate::context::UserContext;
use crate::error::{to_regs, KernelError, ERROR};
use crate::hal::Hal;
use crate::ipc::pipe::PipeTable;
use crate::ipc::sync::{CvarTable, LockTable};
use crate::mem::frame::FrameAllocator;
use crate::mem::kbrk::KernelBrk;
use crate::mem::vm::PageTable;
use crate::memlayout::{kind_of, ObjectKind, KSTACK_FRAMES, PAGE_SIZE, VMEM_0_LIMIT, VMEM_1_BASE, VMEM_1_LIMIT};
use crate::proc::pcb::{Pcb, ProcState};
use crate::proc::sched::Scheduler;
use crate::syscall;
use crate::trap::{TrapCode, TrapVector, TrapVectorTable};
use crate::tty::TtyDriver;

/// The process-wide singleton (spec §9): frame bitmap, kernel page table,
/// kernel break, scheduler and its queues, every IPC object table, and the
/// terminal array. Built once in [`Kernel::start`] and handed to every
/// syscall and trap handler afterward.
pub struct Kernel {
    pub frames: FrameAllocator,
    pub kernel_pt: PageTable,
    pub kbrk: KernelBrk,
    pub sched: Scheduler,
    pub pipes: PipeTable,
    pub locks: LockTable,
    pub cvars: CvarTable,
    pub tty: TtyDriver,
    pub trap_vectors: TrapVectorTable,
}

impl Kernel {
    /// `KernelStart(argv, pmem_size, uctxt)` (spec §6). Reserves the boot
    /// frames, brings up the idle and init processes, and leaves `uctxt`
    /// pointed at init so the caller resumes there.
    pub fn start(hal: &mut dyn Hal, uctxt: &mut UserContext) -> Self {
        let frame_count = hal.pmem_size() / PAGE_SIZE;
        let mut frames = FrameAllocator::new(frame_count);
        let kernel_pages = VMEM_0_LIMIT / PAGE_SIZE;
        for i in 0..kernel_pages {
            frames.mark(i);
        }
        let kernel_pt = PageTable::new(0, kernel_pages);
        // The static kernel image occupies the first half of Region 0; the
        // rest is headroom the kernel break can grow into, up to the
        // kernel stack/scratch pages reserved at the very top (spec §4.3).
        let mut kbrk = KernelBrk::new(kernel_pages / 2);
        // Reserve one pre-VM page for boot-time kernel bookkeeping (spec
        // §4.3 "Pre-VM"), then flip the break manager into post-VM mode now
        // that the kernel page table above exists to back further growth.
        kbrk.grow_pre_vm(1);

        let mut kernel = Kernel {
            frames,
            kernel_pt,
            kbrk,
            sched: Scheduler::new(),
            pipes: PipeTable::new(),
            locks: LockTable::new(),
            cvars: CvarTable::new(),
            tty: TtyDriver::new(),
            trap_vectors: TrapVectorTable::standard(),
        };
        kernel
            .kbrk
            .enable_vm(&mut kernel.kernel_pt, &mut kernel.frames)
            .expect("boot has enough frames for the kernel break's initial growth");

        let idle_pid = hal.alloc_pid();
        let idle = Pcb::new(idle_pid, PageTable::new(VMEM_1_BASE / PAGE_SIZE, 0), Vec::new());
        idle.borrow_mut().name = "idle";
        kernel.sched.register(idle.clone());
        kernel.sched.idle_pid = idle_pid;
        kernel.sched.current_pid = idle_pid;
        idle.borrow_mut().state = ProcState::Running;

        let init_pid = hal.alloc_pid();
        let region1_pages = (VMEM_1_LIMIT - VMEM_1_BASE) / PAGE_SIZE;
        let kstack_pfn = kernel
            .frames
            .get_free_n(KSTACK_FRAMES)
            .expect("boot has enough frames for one kernel stack");
        let init = Pcb::new(init_pid, PageTable::new(VMEM_1_BASE / PAGE_SIZE, region1_pages), kstack_pfn);
        init.borrow_mut().name = "init";
        init.borrow_mut().brk = VMEM_1_BASE;
        kernel.sched.register(init.clone());
        kernel.sched.init_pid = init_pid;
        kernel.sched.enqueue_ready(init);

        kernel.sched.current_pid = idle_pid;
        let next = kernel.sched.context_switch(hal);
        info!("boot: dispatching pid {next} as init");
        *uctxt = UserContext::default();
        kernel
    }

    /// Entry point for every trap (spec §6 "Trap vector"). Unbound vectors
    /// and anything the dispatch table does not recognize are fatal.
    pub fn handle_trap(&mut self, hal: &mut dyn Hal, uctxt: &mut UserContext) {
        if !self.trap_vectors.is_bound(uctxt.vector) {
            log::error!("trap on unbound vector {}: halting", uctxt.vector);
            hal.halt();
        }

        match uctxt.vector {
            TrapVector::Kernel => self.dispatch_syscall(hal, uctxt),
            TrapVector::Clock => {
                self.sched.preempt_tick(hal);
            }
            TrapVector::Memory => self.handle_memory_trap(hal, uctxt),
            TrapVector::TtyReceive => {
                let tty = uctxt.addr;
                self.tty.handle_receive(&mut self.sched, hal, tty);
            }
            TrapVector::TtyTransmit => {
                let tty = uctxt.addr;
                self.tty.handle_transmit(&mut self.sched, hal, tty);
            }
            TrapVector::Illegal | TrapVector::Math | TrapVector::Disk => {
                self.kill_current(hal, uctxt.code);
            }
        }
    }

    fn dispatch_syscall(&mut self, hal: &mut dyn Hal, uctxt: &mut UserContext) {
        let call = match uctxt.code {
            TrapCode::Syscall(s) => s,
            _ => {
                log::error!("kernel trap without a syscall code: halting");
                hal.halt();
            }
        };
        let result = syscall::dispatch(self, hal, call, uctxt);
        uctxt.regs[0] = result;
    }

    /// `MemMapErr`/`MemAccErr` (spec §4.7). `ACCERR` is always fatal;
    /// `MAPERR` below the stack pointer grows the stack, anything else is
    /// fatal too.
    fn handle_memory_trap(&mut self, hal: &mut dyn Hal, uctxt: &mut UserContext) {
        match uctxt.code {
            TrapCode::MemAccErr => self.kill_current(hal, uctxt.code),
            TrapCode::MemMapErr => {
                if !syscall::process::grow_stack_for_fault(self, hal, uctxt.addr) {
                    self.kill_current(hal, uctxt.code);
                }
            }
            _ => self.kill_current(hal, uctxt.code),
        }
    }

    /// Terminates the current process the way `exit` would, but with a
    /// sentinel status marking it killed rather than self-exited (spec §7
    /// "illegal user actions ... terminate the offending process").
    fn kill_current(&mut self, hal: &mut dyn Hal, code: TrapCode) {
        log::warn!("killing pid {} for {:?}", self.sched.current_pid, code);
        syscall::process::exit(self, hal, ERROR as i32);
    }

    /// `Reclaim(id)` (spec §4.6, §3 ID space): dispatches to the right
    /// object table purely from the id's range, per the corrected lookup
    /// semantics of spec §9.
    pub fn reclaim(&mut self, id: i32) -> i64 {
        let result = match kind_of(id) {
            Some(ObjectKind::Lock) => self.locks.reclaim(id),
            Some(ObjectKind::Cvar) => self.cvars.reclaim(id),
            Some(ObjectKind::Pipe) => self.pipes.reclaim(id),
            None => Err(KernelError::InvalidArgument),
        };
        to_regs(result.map(|_| 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockHal;

    #[test]
    fn boot_registers_idle_and_init() {
        let mut hal = MockHal::new(4 * 1024 * 1024);
        let mut uctxt = UserContext::default();
        let kernel = Kernel::start(&mut hal, &mut uctxt);
        assert!(kernel.sched.lookup(kernel.sched.idle_pid).is_some());
        assert!(kernel.sched.lookup(kernel.sched.init_pid).is_some());
        assert_eq!(kernel.sched.current_pid, kernel.sched.init_pid);
    }

    #[test]
    fn unbound_vector_halts() {
        let mut hal = MockHal::new(4 * 1024 * 1024);
        let mut uctxt = UserContext::default();
        let mut kernel = Kernel::start(&mut hal, &mut uctxt);
        kernel.trap_vectors.unbind(TrapVector::Disk);
        uctxt.vector = TrapVector::Disk;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            kernel.handle_trap(&mut hal, &mut uctxt);
        }));
        assert!(result.is_err());
    }
}
