//! Process Control Block (spec §3 "PCB"). Parent/child references use
//! `Rc`/`Weak` instead of the teacher's raw pointers (spec §9 "Raw pointer
//! graphs -> owned tables + weak parent references"): each PCB owns its
//! Region-1 page table exclusively, `children` is a vector of strong
//! references, and `parent` is a weak reference cleared when the parent
//! exits, which breaks the otherwise-cyclic parent/child graph.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::context::{KernelContext, UserContext};
use crate::mem::vm::PageTable;

pub type PcbRef = Rc<RefCell<Pcb>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Running,
    Ready,
    Blocked,
    Zombie,
    Orphaned,
}

pub struct Pcb {
    pub pid: i32,
    pub region1_pt: PageTable,
    pub kstack_pfn: Vec<usize>,
    pub uctxt: UserContext,
    pub kctxt: KernelContext,
    pub state: ProcState,
    pub brk: usize,
    pub parent: Weak<RefCell<Pcb>>,
    pub children: Vec<PcbRef>,
    pub num_delay: i32,
    pub exit_status: i32,
    pub name: &'static str,

    /// Bytes a blocked read syscall (TTY or pipe) produced while this
    /// process was off the CPU. The dispatch loop copies these into the
    /// process's own address space the next time it runs, playing the role
    /// spec §4.10 assigns to "the trap epilogue" for TTY reads; pipes reuse
    /// the same delivery mechanism (spec §12).
    pub delivered: Option<Vec<u8>>,

    /// The return value to install in `regs[0]` the next time this process
    /// is dispatched, computed by whatever woke it rather than by this
    /// process resuming its own call frame (spec §10 hosting model).
    pub pending_result: Option<i64>,

    /// Virtual address of the `status` out-parameter a blocked `Wait` call
    /// passed in, so the child that eventually wakes this parent can write
    /// its exit status directly (spec §4.6 `wait`).
    pub wait_status_addr: Option<usize>,
}

impl Pcb {
    pub fn new(pid: i32, region1_pt: PageTable, kstack_pfn: Vec<usize>) -> PcbRef {
        Rc::new(RefCell::new(Pcb {
            pid,
            region1_pt,
            kstack_pfn,
            uctxt: UserContext::default(),
            kctxt: KernelContext::default(),
            state: ProcState::Ready,
            brk: 0,
            parent: Weak::new(),
            children: Vec::new(),
            num_delay: -1,
            exit_status: 0,
            name: "",
            delivered: None,
            pending_result: None,
            wait_status_addr: None,
        }))
    }

    pub fn is_delay_blocked(&self) -> bool {
        self.num_delay >= 0
    }

    /// Ticks a delay-blocked PCB down by one, returning `true` the instant
    /// it reaches zero (spec §4.5 clock handler).
    pub fn tick_delay(&mut self) -> bool {
        if self.num_delay > 0 {
            self.num_delay -= 1;
        }
        self.num_delay == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::vm::PageTable;

    fn make_pcb(pid: i32) -> PcbRef {
        Pcb::new(pid, PageTable::new(256, 256), vec![1, 2])
    }

    #[test]
    fn parent_child_cycle_is_broken_by_weak_ref() {
        let parent = make_pcb(1);
        let child = make_pcb(2);
        child.borrow_mut().parent = Rc::downgrade(&parent);
        parent.borrow_mut().children.push(Rc::clone(&child));

        assert_eq!(Rc::strong_count(&parent), 1);
        // child holds only a Weak to parent, so dropping `parent`'s local
        // binding does not leave a dangling strong cycle.
        let child_sees_parent = child.borrow().parent.upgrade();
        assert!(child_sees_parent.is_some());
        drop(parent);
        assert!(child.borrow().parent.upgrade().is_none());
    }

    #[test]
    fn delay_reaches_zero_exactly_once() {
        let pcb = make_pcb(3);
        pcb.borrow_mut().num_delay = 3;
        assert!(!pcb.borrow_mut().tick_delay());
        assert!(!pcb.borrow_mut().tick_delay());
        assert!(pcb.borrow_mut().tick_delay());
    }
}
