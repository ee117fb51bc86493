//! Syscall dispatch table (spec §6 "Syscall convention"): arguments travel
//! in `regs[0..]`, the return value lands back in `regs[0]`.

pub mod ipc;
pub mod process;

use crate::context::UserContext;
use crate::hal::Hal;
use crate::kernel::Kernel;
use crate::trap::Syscall;

pub fn dispatch(kernel: &mut Kernel, hal: &mut dyn Hal, call: Syscall, uctxt: &mut UserContext) -> i64 {
    let a0 = uctxt.regs[0];
    let a1 = uctxt.regs[1];
    let a2 = uctxt.regs[2];

    match call {
        Syscall::Fork => process::fork(kernel, hal),
        Syscall::Exec => process::exec(kernel, hal, a0 as usize, a1 as usize),
        Syscall::Exit => process::exit(kernel, hal, a0 as i32),
        Syscall::Wait => process::wait(kernel, hal, a0 as usize),
        Syscall::GetPid => process::getpid(kernel),
        Syscall::Brk => process::brk(kernel, hal, a0 as usize),
        Syscall::Delay => process::delay(kernel, hal, a0 as i32),
        Syscall::TtyRead => ipc::tty_read(kernel, hal, uctxt, a0 as usize, a1 as usize, a2 as usize),
        Syscall::TtyWrite => ipc::tty_write(kernel, hal, a0 as usize, a1 as usize, a2 as usize),
        Syscall::PipeInit => ipc::pipe_init(kernel),
        Syscall::PipeRead => ipc::pipe_read(kernel, hal, uctxt, a0 as i32, a1 as usize, a2 as usize),
        Syscall::PipeWrite => ipc::pipe_write(kernel, hal, a0 as i32, a1 as usize, a2 as usize),
        Syscall::LockInit => ipc::lock_init(kernel),
        Syscall::LockAcquire => ipc::lock_acquire(kernel, hal, a0 as i32),
        Syscall::LockRelease => ipc::lock_release(kernel, a0 as i32),
        Syscall::CvarInit => ipc::cvar_init(kernel),
        Syscall::CvarSignal => ipc::cvar_signal(kernel, a0 as i32),
        Syscall::CvarBroadcast => ipc::cvar_broadcast(kernel, a0 as i32),
        Syscall::CvarWait => ipc::cvar_wait(kernel, hal, a0 as i32, a1 as i32),
        Syscall::Reclaim => kernel.reclaim(a0 as i32),
    }
}
