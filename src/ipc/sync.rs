//! Locks and condition variables (spec §4.9).

use crate::error::{KernelError, KResult};
use crate::hal::Hal;
use crate::memlayout::{CVAR_ID_BASE, CVAR_ID_LIMIT, LOCK_ID_BASE, LOCK_ID_LIMIT};
use crate::proc::pcb::PcbRef;
use crate::proc::queue::{find_by_id_mut, Queue};
use crate::proc::sched::Scheduler;

enum LockState {
    Free,
    Held(i32),
}

pub struct Lock {
    pub id: i32,
    state: LockState,
    waiters: Queue<PcbRef>,
}

impl Lock {
    fn new(id: i32) -> Self {
        Lock {
            id,
            state: LockState::Free,
            waiters: Queue::new(),
        }
    }

    fn is_quiescent(&self) -> bool {
        matches!(self.state, LockState::Free) && self.waiters.is_empty()
    }
}

pub struct LockTable {
    locks: Vec<Lock>,
    next_id: i32,
}

impl LockTable {
    pub fn new() -> Self {
        LockTable {
            locks: Vec::new(),
            next_id: LOCK_ID_BASE,
        }
    }

    fn find_mut(&mut self, id: i32) -> Option<&mut Lock> {
        find_by_id_mut(self.locks.iter_mut(), id, |l| l.id)
    }

    pub fn init(&mut self) -> KResult<i32> {
        if self.next_id > LOCK_ID_LIMIT {
            return Err(KernelError::Exhausted);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.locks.push(Lock::new(id));
        Ok(id)
    }

    /// `Acquire` (spec §4.9). Blocks the caller if the lock is HELD; the
    /// eventual `Release` hands ownership directly to the head waiter, so a
    /// woken acquire always finds itself already the owner and never
    /// spuriously wakes to find the lock taken by someone else.
    pub fn acquire(&mut self, sched: &mut Scheduler, hal: &mut dyn Hal, id: i32) -> KResult<i64> {
        let pid = sched.current().borrow().pid;
        let lock = self.find_mut(id).ok_or(KernelError::NotFound)?;
        match lock.state {
            LockState::Free => {
                lock.state = LockState::Held(pid);
                Ok(0)
            }
            LockState::Held(_) => {
                lock.waiters.push_back(sched.current());
                sched.block_current(hal);
                Ok(0)
            }
        }
    }

    /// `Release` (spec §4.9). Errors unless the caller is the current owner.
    pub fn release(&mut self, sched: &mut Scheduler, id: i32) -> KResult<i64> {
        let pid = sched.current().borrow().pid;
        let lock = self.find_mut(id).ok_or(KernelError::NotFound)?;
        match lock.state {
            LockState::Held(owner) if owner == pid => {}
            _ => return Err(KernelError::PermissionDenied),
        }
        if let Some(next) = lock.waiters.pop_front() {
            let next_pid = next.borrow().pid;
            lock.state = LockState::Held(next_pid);
            sched.enqueue_ready(next);
        } else {
            lock.state = LockState::Free;
        }
        Ok(0)
    }

    pub fn reclaim(&mut self, id: i32) -> KResult<()> {
        let idx = self.locks.iter().position(|l| l.id == id).ok_or(KernelError::NotFound)?;
        if !self.locks[idx].is_quiescent() {
            return Err(KernelError::Busy);
        }
        self.locks.remove(idx);
        Ok(())
    }

    /// Contends for `id` on behalf of `pcb` (spec §4.9 "contends via
    /// Acquire"), used by [`CvarTable::signal`]/`broadcast` to reacquire the
    /// lock for a specific woken waiter rather than whichever process
    /// happens to be `sched.current()` by the time the wakeup runs. Grants
    /// the lock immediately and readies `pcb` if free; otherwise parks it on
    /// the lock's own waiter queue, where `release`'s direct hand-off will
    /// pick it up in FIFO order like any other acquirer.
    pub fn contend(&mut self, sched: &mut Scheduler, pcb: PcbRef, id: i32) {
        let pid = pcb.borrow().pid;
        let lock = match self.find_mut(id) {
            Some(lock) => lock,
            None => {
                pcb.borrow_mut().pending_result = Some(crate::error::to_regs(Err(KernelError::NotFound)));
                sched.enqueue_ready(pcb);
                return;
            }
        };
        match lock.state {
            LockState::Free => {
                lock.state = LockState::Held(pid);
                pcb.borrow_mut().pending_result = Some(0);
                sched.enqueue_ready(pcb);
            }
            LockState::Held(_) => {
                lock.waiters.push_back(pcb);
            }
        }
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A blocked `CvarWait` caller, with the lock it must recontend for once
/// woken (spec §4.9: "the waiting process reacquires the lock").
struct CvarWaiter {
    pcb: PcbRef,
    lock_id: i32,
}

pub struct Cvar {
    pub id: i32,
    waiters: Queue<CvarWaiter>,
}

impl Cvar {
    fn new(id: i32) -> Self {
        Cvar {
            id,
            waiters: Queue::new(),
        }
    }

    fn is_quiescent(&self) -> bool {
        self.waiters.is_empty()
    }
}

pub struct CvarTable {
    cvars: Vec<Cvar>,
    next_id: i32,
}

impl CvarTable {
    pub fn new() -> Self {
        CvarTable {
            cvars: Vec::new(),
            next_id: CVAR_ID_BASE,
        }
    }

    fn find_mut(&mut self, id: i32) -> Option<&mut Cvar> {
        find_by_id_mut(self.cvars.iter_mut(), id, |c| c.id)
    }

    pub fn init(&mut self) -> KResult<i32> {
        if self.next_id > CVAR_ID_LIMIT {
            return Err(KernelError::Exhausted);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.cvars.push(Cvar::new(id));
        Ok(id)
    }

    /// `CvarWait` (spec §4.9): releases `lock_id`, blocks on the cvar, and
    /// on waking contends for the lock again via `Acquire`. Unlike
    /// `LockTable::acquire`'s own blocking path, this call's woken contender
    /// is not necessarily `sched.current()` by the time `signal`/`broadcast`
    /// runs the reacquire (some other process may be running by then), so
    /// the result is delivered back to this specific PCB through
    /// `pending_result` (spec §13.1) instead of being read off whatever is
    /// current when this function's own call frame resumes past the block.
    pub fn wait(
        &mut self,
        locks: &mut LockTable,
        sched: &mut Scheduler,
        hal: &mut dyn Hal,
        id: i32,
        lock_id: i32,
    ) -> KResult<i64> {
        locks.release(sched, lock_id)?;
        let pid = sched.current().borrow().pid;
        let pcb = sched.current();
        let cvar = self.find_mut(id).ok_or(KernelError::NotFound)?;
        cvar.waiters.push_back(CvarWaiter { pcb, lock_id });
        sched.block_current(hal);

        let woken = sched.lookup(pid).expect("cvar waiter still registered");
        let result = woken.borrow_mut().pending_result.take().unwrap_or(0);
        Ok(result)
    }

    /// `CvarSignal` (spec §4.9): wakes one FIFO waiter and has it contend for
    /// its lock directly, since signal/broadcast are the only point after
    /// the block where the waiter's own pid is known for certain.
    pub fn signal(&mut self, locks: &mut LockTable, sched: &mut Scheduler, id: i32) -> KResult<i64> {
        let cvar = self.find_mut(id).ok_or(KernelError::NotFound)?;
        if let Some(waiter) = cvar.waiters.pop_front() {
            locks.contend(sched, waiter.pcb, waiter.lock_id);
        }
        Ok(0)
    }

    /// `CvarBroadcast` (spec §4.9): wakes every waiter, each contending for
    /// its own lock independently.
    pub fn broadcast(&mut self, locks: &mut LockTable, sched: &mut Scheduler, id: i32) -> KResult<i64> {
        let cvar = self.find_mut(id).ok_or(KernelError::NotFound)?;
        while let Some(waiter) = cvar.waiters.pop_front() {
            locks.contend(sched, waiter.pcb, waiter.lock_id);
        }
        Ok(0)
    }

    pub fn reclaim(&mut self, id: i32) -> KResult<()> {
        let idx = self.cvars.iter().position(|c| c.id == id).ok_or(KernelError::NotFound)?;
        if !self.cvars[idx].is_quiescent() {
            return Err(KernelError::Busy);
        }
        self.cvars.remove(idx);
        Ok(())
    }
}

impl Default for CvarTable {
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
    fn release_hands_ownership_directly_to_waiter() {
        let mut hal = MockHal::new(1 << 20);
        let mut sched = Scheduler::new();
        spawn(&mut sched, 0);
        sched.idle_pid = 0;
        sched.current_pid = 0;

        let mut locks = LockTable::new();
        let id = locks.init().unwrap();

        spawn(&mut sched, 1);
        sched.current_pid = 1;
        locks.acquire(&mut sched, &mut hal, id).unwrap();

        spawn(&mut sched, 2);
        sched.current_pid = 2;
        // pid 2's acquire blocks and reschedules to idle since nothing else is ready.
        locks.acquire(&mut sched, &mut hal, id).unwrap();
        assert_eq!(sched.current_pid, 0);

        sched.current_pid = 1;
        locks.release(&mut sched, id).unwrap();
        assert_eq!(sched.ready.len(), 1);
        assert_eq!(sched.ready.front().unwrap().borrow().pid, 2);
    }

    #[test]
    fn release_by_non_owner_is_rejected() {
        let mut hal = MockHal::new(1 << 20);
        let mut sched = Scheduler::new();
        spawn(&mut sched, 0);
        sched.idle_pid = 0;
        sched.current_pid = 0;

        let mut locks = LockTable::new();
        let id = locks.init().unwrap();
        spawn(&mut sched, 1);
        sched.current_pid = 1;
        locks.acquire(&mut sched, &mut hal, id).unwrap();

        spawn(&mut sched, 2);
        sched.current_pid = 2;
        assert!(matches!(locks.release(&mut sched, id), Err(KernelError::PermissionDenied)));
    }

    #[test]
    fn signal_wakes_and_grants_a_free_lock() {
        let mut sched = Scheduler::new();
        spawn(&mut sched, 0);
        sched.idle_pid = 0;
        sched.current_pid = 0;

        let mut locks = LockTable::new();
        let lock_id = locks.init().unwrap();
        let mut cvars = CvarTable::new();
        let id = cvars.init().unwrap();
        spawn(&mut sched, 1);
        cvars.cvars[0].waiters.push_back(CvarWaiter {
            pcb: sched.lookup(1).unwrap(),
            lock_id,
        });

        cvars.signal(&mut locks, &mut sched, id).unwrap();
        assert_eq!(sched.ready.len(), 1);
        let waiter = sched.ready.front().unwrap();
        assert_eq!(waiter.borrow().pid, 1);
        assert_eq!(waiter.borrow().pending_result, Some(0));
    }

    #[test]
    fn signal_queues_waiter_behind_a_held_lock() {
        let mut sched = Scheduler::new();
        spawn(&mut sched, 0);
        sched.idle_pid = 0;
        sched.current_pid = 0;

        let mut locks = LockTable::new();
        let lock_id = locks.init().unwrap();
        spawn(&mut sched, 1);
        sched.current_pid = 1;
        locks.acquire(&mut sched, &mut MockHal::new(1 << 20), lock_id).unwrap();

        let mut cvars = CvarTable::new();
        let id = cvars.init().unwrap();
        spawn(&mut sched, 2);
        cvars.cvars[0].waiters.push_back(CvarWaiter {
            pcb: sched.lookup(2).unwrap(),
            lock_id,
        });

        cvars.signal(&mut locks, &mut sched, id).unwrap();
        // pid 1 still owns the lock; pid 2 is parked on it, not readied.
        assert!(sched.ready.is_empty());
        assert!(sched.lookup(2).unwrap().borrow().pending_result.is_none());

        locks.release(&mut sched, lock_id).unwrap();
        assert_eq!(sched.ready.len(), 1);
        assert_eq!(sched.ready.front().unwrap().borrow().pid, 2);
    }
}
