//! TTY driver (spec §4.10): per-terminal read buffer and a chunked
//! transmit engine, grounded on the pipe's waiter-queue-plus-direct-hand-off
//! shape (`src/ipc/pipe.rs`) since both are "bytes in, bytes out, block when
//! none available" devices.

use crate::error::{KernelError, KResult};
use crate::hal::Hal;
use crate::memlayout::{NUM_TERMINALS, TERMINAL_MAX_LINE};
use crate::proc::pcb::PcbRef;
use crate::proc::queue::Queue;
use crate::proc::sched::Scheduler;

struct ReadWaiter {
    pcb: PcbRef,
    len: usize,
}

/// A writer mid-transmit: `remaining` still has to go out in
/// `TERMINAL_MAX_LINE`-sized chunks before the syscall returns.
struct WriteJob {
    pid: i32,
    remaining: Vec<u8>,
    sent: usize,
}

struct Terminal {
    read_buffer: Vec<u8>,
    read_waiters: Queue<ReadWaiter>,
    write_queue: Queue<WriteJob>,
    transmitting: bool,
}

impl Terminal {
    fn new() -> Self {
        Terminal {
            read_buffer: Vec::new(),
            read_waiters: Queue::new(),
            write_queue: Queue::new(),
            transmitting: false,
        }
    }
}

pub struct TtyDriver {
    terminals: Vec<Terminal>,
}

impl TtyDriver {
    pub fn new() -> Self {
        TtyDriver {
            terminals: (0..NUM_TERMINALS).map(|_| Terminal::new()).collect(),
        }
    }

    fn term(&mut self, tty: usize) -> KResult<&mut Terminal> {
        self.terminals.get_mut(tty).ok_or(KernelError::InvalidArgument)
    }

    /// `TtyRead` (spec §4.10). Synchronous fast path copies `min(len,
    /// available)` and compacts the remainder; otherwise the caller blocks
    /// and a later receive interrupt delivers the bytes directly.
    pub fn read(&mut self, sched: &mut Scheduler, hal: &mut dyn Hal, tty: usize, len: usize) -> KResult<i64> {
        if len == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let pid = sched.current().borrow().pid;
        let term = self.term(tty)?;
        if !term.read_buffer.is_empty() {
            let n = len.min(term.read_buffer.len());
            let bytes: Vec<u8> = term.read_buffer.drain(..n).collect();
            let count = bytes.len() as i64;
            sched.current().borrow_mut().delivered = Some(bytes);
            return Ok(count);
        }

        term.read_waiters.push_back(ReadWaiter {
            pcb: sched.current(),
            len,
        });
        sched.block_current(hal);

        let woken = sched.lookup(pid).expect("reader still registered");
        let result = woken.borrow_mut().pending_result.take().unwrap_or(0);
        Ok(result)
    }

    /// `TtyReceive` interrupt (spec §4.10): ingests from the simulator into
    /// `read_buffer`, then wakes the head reader if one is waiting.
    pub fn handle_receive(&mut self, sched: &mut Scheduler, hal: &mut dyn Hal, tty: usize) {
        let bytes = hal.tty_receive(tty);
        if bytes.is_empty() {
            return;
        }
        let term = match self.term(tty) {
            Ok(t) => t,
            Err(_) => return,
        };
        term.read_buffer.extend_from_slice(&bytes);

        if let Some(waiter) = term.read_waiters.pop_front() {
            let n = waiter.len.min(term.read_buffer.len());
            let delivered: Vec<u8> = term.read_buffer.drain(..n).collect();
            let mut pcb = waiter.pcb.borrow_mut();
            pcb.pending_result = Some(delivered.len() as i64);
            pcb.delivered = Some(delivered);
            drop(pcb);
            sched.enqueue_ready(waiter.pcb);
        }
    }

    /// `TtyWrite` (spec §4.10). Carves `buf` into `TERMINAL_MAX_LINE` chunks;
    /// the caller blocks until every chunk has gone out via transmit
    /// interrupts. While a terminal is `using`, later writers queue behind
    /// the one in flight.
    pub fn write(&mut self, sched: &mut Scheduler, hal: &mut dyn Hal, tty: usize, buf: &[u8]) -> KResult<i64> {
        if buf.is_empty() {
            return Err(KernelError::InvalidArgument);
        }
        let pid = sched.current().borrow().pid;
        let term = self.term(tty)?;
        let job = WriteJob {
            pid,
            remaining: buf.to_vec(),
            sent: 0,
        };
        let start_now = !term.transmitting && term.write_queue.is_empty();
        term.write_queue.push_back(job);
        if start_now {
            term.transmitting = true;
            Self::transmit_next_chunk(term, hal, tty);
        }

        sched.block_current(hal);
        let woken = sched.lookup(pid).expect("writer still registered");
        let result = woken.borrow_mut().pending_result.take().unwrap_or(buf.len() as i64);
        Ok(result)
    }

    fn transmit_next_chunk(term: &mut Terminal, hal: &mut dyn Hal, tty: usize) {
        let job = match term.write_queue.front() {
            Some(j) => j,
            None => {
                term.transmitting = false;
                return;
            }
        };
        let end = job.remaining.len().min(job.sent + TERMINAL_MAX_LINE);
        let chunk = job.remaining[job.sent..end].to_vec();
        hal.tty_transmit(tty, &chunk);
    }

    /// `TtyTransmit` interrupt (spec §4.10): progresses `write_pos`; once the
    /// full request is out the writer is unblocked with its byte count, and
    /// the next queued writer (if any) starts.
    pub fn handle_transmit(&mut self, sched: &mut Scheduler, hal: &mut dyn Hal, tty: usize) {
        let term = match self.term(tty) {
            Ok(t) => t,
            Err(_) => return,
        };
        let done = {
            let job = match term.write_queue.front_mut() {
                Some(j) => j,
                None => return,
            };
            let end = job.remaining.len().min(job.sent + TERMINAL_MAX_LINE);
            job.sent = end;
            job.sent >= job.remaining.len()
        };

        if done {
            let job = term.write_queue.pop_front().expect("just matched above");
            if let Some(writer) = sched.lookup(job.pid) {
                writer.borrow_mut().pending_result = Some(job.remaining.len() as i64);
                sched.enqueue_ready(writer);
            }
            Self::transmit_next_chunk(term, hal, tty);
        } else {
            Self::transmit_next_chunk(term, hal, tty);
        }
    }
}

impl Default for TtyDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockHal;
    use crate::mem::vm::PageTable;
    use crate::proc::pcb::Pcb;
    use std::rc::Rc;

    fn spawn(sched: &mut Scheduler, pid: i32) {
        let pcb = Pcb::new(pid, PageTable::new(256, 16), vec![10, 11]);
        sched.register(Rc::clone(&pcb));
    }

    #[test]
    fn blocked_read_wakes_on_receive_interrupt() {
        let mut hal = MockHal::new(1 << 20);
        let mut sched = Scheduler::new();
        spawn(&mut sched, 0);
        sched.idle_pid = 0;
        sched.current_pid = 0;
        spawn(&mut sched, 1);
        sched.current_pid = 1;

        let mut tty = TtyDriver::new();
        tty.read(&mut sched, &mut hal, 0, 4).unwrap();
        assert_eq!(sched.current_pid, 0);

        hal.inner.inject_tty_input(0, b"hi");
        tty.handle_receive(&mut sched, &mut hal, 0);

        let reader = sched.lookup(1).unwrap();
        assert_eq!(reader.borrow_mut().delivered.take().unwrap(), b"hi");
    }

    #[test]
    fn write_longer_than_chunk_needs_multiple_transmit_interrupts() {
        let mut hal = MockHal::new(1 << 20);
        let mut sched = Scheduler::new();
        spawn(&mut sched, 0);
        sched.idle_pid = 0;
        sched.current_pid = 0;
        spawn(&mut sched, 1);
        sched.current_pid = 1;

        let mut tty = TtyDriver::new();
        let buf = vec![b'x'; TERMINAL_MAX_LINE + 10];
        tty.write(&mut sched, &mut hal, 0, &buf).unwrap();
        assert_eq!(sched.current_pid, 0);
        assert!(sched.ready.is_empty());

        tty.handle_transmit(&mut sched, &mut hal, 0);
        assert!(sched.ready.is_empty());
        tty.handle_transmit(&mut sched, &mut hal, 0);
        assert_eq!(sched.ready.len(), 1);
        assert_eq!(sched.ready.front().unwrap().borrow().pid, 1);
    }
}
