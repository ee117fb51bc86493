//! Scheduler and context switch (spec §4.5).
//!
//! Round-robin on READY; delay-blocked processes live on their own queue so
//! the clock handler can tick exactly the processes spec §4.5 names
//! ("decrements `num_delay` for each delay-blocked PCB") without scanning
//! every other wait reason. Processes blocked on a pipe/lock/cvar/tty sit
//! on that object's own waiter queue instead (spec invariant: a PCB is in
//! at most one scheduler queue at a time).

use std::collections::HashMap;
use std::rc::Rc;

use crate::context::KernelContext;
use crate::hal::Hal;
use crate::mem::vm::{self, PageTable};
use crate::proc::pcb::{Pcb, PcbRef, ProcState};
use crate::proc::queue::Queue;

pub struct Scheduler {
    pub table: HashMap<i32, PcbRef>,
    pub ready: Queue<PcbRef>,
    pub delay_queue: Queue<PcbRef>,
    pub zombie: Queue<PcbRef>,
    pub waiting_parent: Queue<PcbRef>,
    pub current_pid: i32,
    pub idle_pid: i32,
    pub init_pid: i32,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            table: HashMap::new(),
            ready: Queue::new(),
            delay_queue: Queue::new(),
            zombie: Queue::new(),
            waiting_parent: Queue::new(),
            current_pid: 0,
            idle_pid: 0,
            init_pid: 0,
        }
    }

    pub fn register(&mut self, pcb: PcbRef) {
        let pid = pcb.borrow().pid;
        self.table.insert(pid, pcb);
    }

    pub fn lookup(&self, pid: i32) -> Option<PcbRef> {
        self.table.get(&pid).cloned()
    }

    pub fn current(&self) -> PcbRef {
        self.lookup(self.current_pid).expect("current process always registered")
    }

    pub fn enqueue_ready(&mut self, pcb: PcbRef) {
        pcb.borrow_mut().state = ProcState::Ready;
        self.ready.push_back(pcb);
    }

    /// Picks the next runnable PCB per spec §4.5: front of READY, or idle if
    /// READY is empty. Marks it RUNNING.
    fn pick_next(&mut self) -> PcbRef {
        let next = match self.ready.pop_front() {
            Some(pcb) => pcb,
            None => self.lookup(self.idle_pid).expect("idle process always exists"),
        };
        next.borrow_mut().state = ProcState::Running;
        next
    }

    /// `KCSwitch` (spec §4.5): copies `kc_in` into `curr.kctxt`, hands
    /// ownership of the CPU to `next`, and flushes the Region-1 TLB since
    /// the running user page table changed. Returns `next`'s pid.
    pub fn context_switch(&mut self, hal: &mut dyn Hal) -> i32 {
        let next_pcb = self.pick_next();
        let next_pid = next_pcb.borrow().pid;
        let curr_pid = self.current_pid;
        let curr_pcb = self.lookup(curr_pid);

        let body_next = Rc::clone(&next_pcb);
        let body_curr = curr_pcb.clone();
        let mut body = move |kc_in: KernelContext, _curr: i32, _next: i32| {
            if let Some(curr) = &body_curr {
                curr.borrow_mut().kctxt = kc_in;
            }
            body_next.borrow().kctxt
        };
        hal.kernel_context_switch(curr_pid, next_pid, &mut body);

        if next_pid != curr_pid {
            hal.tlb_flush(None);
        }
        self.current_pid = next_pid;
        next_pid
    }

    /// `KCCopy` (spec §4.5, §4.6 step 6): clones the parent's kernel stack
    /// into the child's frames via the scratch-page protocol, then invokes
    /// the same `KernelContextSwitch` primitive with a callback that
    /// returns `kc_in` unchanged, so the parent resumes on its own stack
    /// immediately. The child's kernel context is seeded from the same
    /// snapshot; it is entered later through an ordinary `context_switch`.
    pub fn kernel_context_copy(&mut self, hal: &mut dyn Hal, kernel_pt: &mut PageTable, child_pid: i32) {
        let parent_pid = self.current_pid;
        let parent_pcb = self.lookup(parent_pid).expect("parent exists");
        let child_pcb = self.lookup(child_pid).expect("child exists");

        let parent_frames = parent_pcb.borrow().kstack_pfn.clone();
        let child_frames = child_pcb.borrow().kstack_pfn.clone();
        for (&src, &dst) in parent_frames.iter().zip(child_frames.iter()) {
            let bytes = vm::read_frame(kernel_pt, hal, src);
            vm::copy_into_frame(kernel_pt, hal, dst, &bytes);
        }

        let mut body = |kc_in: KernelContext, _curr: i32, _next: i32| kc_in;
        let returned = hal.kernel_context_switch(parent_pid, child_pid, &mut body);
        parent_pcb.borrow_mut().kctxt = returned;
        child_pcb.borrow_mut().kctxt = returned;
    }

    /// Clock-tick preemption (spec §4.5): tick every delay-blocked PCB,
    /// move any that reached zero to READY, requeue the running process
    /// (unless it is idle), and reschedule.
    pub fn preempt_tick(&mut self, hal: &mut dyn Hal) -> i32 {
        let mut woken = Vec::new();
        for pcb in self.delay_queue.iter() {
            if pcb.borrow_mut().tick_delay() {
                woken.push(pcb.borrow().pid);
            }
        }
        for pid in woken {
            if let Some(pcb) = self.delay_queue.remove_first(|p| p.borrow().pid == pid) {
                self.enqueue_ready(pcb);
            }
        }

        if self.current_pid != self.idle_pid {
            if let Some(curr) = self.lookup(self.current_pid) {
                if curr.borrow().state == ProcState::Running {
                    self.enqueue_ready(curr);
                }
            }
        }

        self.context_switch(hal)
    }

    /// Blocks the current process on the delay queue for `ticks` clock
    /// ticks (spec §4.6 `delay`), then reschedules.
    pub fn block_on_delay(&mut self, hal: &mut dyn Hal, ticks: i32) {
        let curr = self.current();
        curr.borrow_mut().num_delay = ticks;
        curr.borrow_mut().state = ProcState::Blocked;
        self.delay_queue.push_back(curr);
        self.context_switch(hal);
    }

    /// Generic suspension point (spec §5 "Suspension points"): marks the
    /// current process BLOCKED and reschedules. The caller is responsible
    /// for having already recorded this PCB on whatever single wait queue
    /// (pipe/lock/cvar/tty) it is suspending on — that queue, not the
    /// scheduler, owns the PCB reference while blocked. Returns the pid
    /// that ran next.
    pub fn block_current(&mut self, hal: &mut dyn Hal) -> i32 {
        self.current().borrow_mut().state = ProcState::Blocked;
        self.context_switch(hal)
    }

    /// Wakes a specific blocked PCB: removes it from `queue` and moves it
    /// to READY. Used whenever a release/signal/write hands a resource
    /// directly to a particular waiter rather than broadcasting.
    pub fn wake_from(&mut self, queue: &mut Queue<PcbRef>, pid: i32) -> Option<PcbRef> {
        let pcb = queue.remove_first(|p| p.borrow().pid == pid)?;
        self.enqueue_ready(Rc::clone(&pcb));
        Some(pcb)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockHal;
    use crate::mem::vm::PageTable;

    fn spawn(sched: &mut Scheduler, pid: i32) -> PcbRef {
        let pcb = Pcb::new(pid, PageTable::new(256, 16), vec![10, 11]);
        sched.register(Rc::clone(&pcb));
        pcb
    }

    #[test]
    fn round_robin_cycles_ready_queue() {
        let mut hal = MockHal::new(1 << 20);
        let mut sched = Scheduler::new();
        let idle = spawn(&mut sched, 0);
        idle.borrow_mut().state = ProcState::Running;
        sched.idle_pid = 0;
        sched.current_pid = 0;

        let a = spawn(&mut sched, 1);
        let b = spawn(&mut sched, 2);
        sched.enqueue_ready(a);
        sched.enqueue_ready(b);

        let first = sched.context_switch(&mut hal);
        assert_eq!(first, 1);
        // requeue pid 1 like preempt_tick would, then switch again.
        sched.enqueue_ready(sched.lookup(1).unwrap());
        let second = sched.context_switch(&mut hal);
        assert_eq!(second, 2);
    }

    #[test]
    fn delay_reaches_ready_after_exact_tick_count() {
        let mut hal = MockHal::new(1 << 20);
        let mut sched = Scheduler::new();
        spawn(&mut sched, 0);
        sched.idle_pid = 0;
        sched.current_pid = 0;
        spawn(&mut sched, 1);
        sched.current_pid = 1;
        sched.lookup(1).unwrap().borrow_mut().state = ProcState::Running;

        sched.block_on_delay(&mut hal, 3);
        assert_eq!(sched.current_pid, 0);

        sched.preempt_tick(&mut hal);
        sched.preempt_tick(&mut hal);
        assert_eq!(sched.delay_queue.len(), 1);
        let next = sched.preempt_tick(&mut hal);
        // third tick wakes pid 1, scheduler picks it up on the following dispatch.
        assert_eq!(sched.delay_queue.len(), 0);
        assert_eq!(next, 1);
    }
}
