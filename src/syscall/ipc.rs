//! IPC syscalls (spec §4.8, §4.9, §4.10): pipes, locks, condition
//! variables, and the TTY device, dispatched from user-supplied buffer
//! addresses via the page-table copy helpers in `mem::vm`.

use crate::context::UserContext;
use crate::error::{to_regs, KernelError};
use crate::hal::Hal;
use crate::kernel::Kernel;
use crate::mem::vm;

pub fn pipe_init(kernel: &mut Kernel) -> i64 {
    to_regs(kernel.pipes.init().map(|id| id as i64).map_err(|_| KernelError::Exhausted))
}

pub fn pipe_read(kernel: &mut Kernel, hal: &mut dyn Hal, uctxt: &mut UserContext, id: i32, buf_vaddr: usize, len: usize) -> i64 {
    let result = kernel.pipes.read(&mut kernel.sched, hal, id, len);
    deliver(kernel, hal, uctxt, buf_vaddr, result)
}

pub fn pipe_write(kernel: &mut Kernel, hal: &mut dyn Hal, id: i32, buf_vaddr: usize, len: usize) -> i64 {
    let bytes = {
        let pcb = kernel.sched.current();
        let pcb = pcb.borrow();
        vm::copy_in(&pcb.region1_pt, &mut kernel.kernel_pt, hal, buf_vaddr, len)
    };
    match kernel.pipes.write(&mut kernel.sched, hal, id, &bytes) {
        Ok(n) => n,
        Err(e) => to_regs(Err(e)),
    }
}

pub fn tty_read(kernel: &mut Kernel, hal: &mut dyn Hal, uctxt: &mut UserContext, tty: usize, buf_vaddr: usize, len: usize) -> i64 {
    let result = kernel.tty.read(&mut kernel.sched, hal, tty, len);
    deliver(kernel, hal, uctxt, buf_vaddr, result)
}

pub fn tty_write(kernel: &mut Kernel, hal: &mut dyn Hal, tty: usize, buf_vaddr: usize, len: usize) -> i64 {
    let bytes = {
        let pcb = kernel.sched.current();
        let pcb = pcb.borrow();
        vm::copy_in(&pcb.region1_pt, &mut kernel.kernel_pt, hal, buf_vaddr, len)
    };
    match kernel.tty.write(&mut kernel.sched, hal, tty, &bytes) {
        Ok(n) => n,
        Err(e) => to_regs(Err(e)),
    }
}

/// Shared tail for pipe/TTY reads: whatever bytes the fast path or the
/// eventual wakeup stashed in `delivered` get copied out to the caller's
/// buffer before the return value reaches `regs[0]`.
fn deliver(
    kernel: &mut Kernel,
    hal: &mut dyn Hal,
    _uctxt: &mut UserContext,
    buf_vaddr: usize,
    result: Result<i64, KernelError>,
) -> i64 {
    match result {
        Ok(n) => {
            let current = kernel.sched.current();
            let bytes = current.borrow_mut().delivered.take();
            if let Some(bytes) = bytes {
                let pcb = current.borrow();
                vm::copy_out(&pcb.region1_pt, &mut kernel.kernel_pt, hal, buf_vaddr, &bytes);
            }
            n
        }
        Err(e) => to_regs(Err(e)),
    }
}

pub fn lock_init(kernel: &mut Kernel) -> i64 {
    to_regs(kernel.locks.init().map(|id| id as i64).map_err(|_| KernelError::Exhausted))
}

pub fn lock_acquire(kernel: &mut Kernel, hal: &mut dyn Hal, id: i32) -> i64 {
    match kernel.locks.acquire(&mut kernel.sched, hal, id) {
        Ok(n) => n,
        Err(e) => to_regs(Err(e)),
    }
}

pub fn lock_release(kernel: &mut Kernel, id: i32) -> i64 {
    match kernel.locks.release(&mut kernel.sched, id) {
        Ok(n) => n,
        Err(e) => to_regs(Err(e)),
    }
}

pub fn cvar_init(kernel: &mut Kernel) -> i64 {
    to_regs(kernel.cvars.init().map(|id| id as i64).map_err(|_| KernelError::Exhausted))
}

pub fn cvar_signal(kernel: &mut Kernel, id: i32) -> i64 {
    match kernel.cvars.signal(&mut kernel.locks, &mut kernel.sched, id) {
        Ok(n) => n,
        Err(e) => to_regs(Err(e)),
    }
}

pub fn cvar_broadcast(kernel: &mut Kernel, id: i32) -> i64 {
    match kernel.cvars.broadcast(&mut kernel.locks, &mut kernel.sched, id) {
        Ok(n) => n,
        Err(e) => to_regs(Err(e)),
    }
}

pub fn cvar_wait(kernel: &mut Kernel, hal: &mut dyn Hal, id: i32, lock_id: i32) -> i64 {
    let Kernel { cvars, locks, sched, .. } = kernel;
    match cvars.wait(locks, sched, hal, id, lock_id) {
        Ok(n) => n,
        Err(e) => to_regs(Err(e)),
    }
}
