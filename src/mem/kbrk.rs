//! Kernel break manager: pre- and post-VM kernel heap growth (spec §4.3).

use crate::error::{KernelError, KResult};
use crate::hal::Hal;
use crate::mem::frame::FrameAllocator;
use crate::mem::vm::{PageTable, Protection};
use crate::memlayout::{PAGE_SIZE, VMEM_0_LIMIT};

pub struct KernelBrk {
    /// Page index of the original brk, the floor growth/shrink can't cross.
    original_page: usize,
    /// Current break, in pages, once VM is live.
    current_page: usize,
    vm_enabled: bool,
    /// Pre-VM delta, applied once VM comes up (spec §4.3 "Pre-VM").
    pending_delta_pages: isize,
}

impl KernelBrk {
    pub fn new(original_page: usize) -> Self {
        KernelBrk {
            original_page,
            current_page: original_page,
            vm_enabled: false,
            pending_delta_pages: 0,
        }
    }

    /// Pre-VM growth: the caller may write into the grown region immediately
    /// because the MMU is off and every address is identity-mapped.
    pub fn grow_pre_vm(&mut self, pages: usize) {
        debug_assert!(!self.vm_enabled);
        self.pending_delta_pages += pages as isize;
    }

    /// Applies the accumulated pre-VM delta once VM comes up, switching this
    /// manager into post-VM mode.
    pub fn enable_vm(&mut self, kernel_pt: &mut PageTable, frames: &mut FrameAllocator) -> KResult<()> {
        debug_assert!(!self.vm_enabled);
        self.vm_enabled = true;
        let delta = self.pending_delta_pages;
        self.pending_delta_pages = 0;
        if delta > 0 {
            self.grow(kernel_pt, frames, delta as usize)
        } else {
            Ok(())
        }
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    /// Post-VM growth: allocates one frame per new page, R+W, mapped into
    /// the kernel table. Rolls back on partial failure (spec §4.3, §7).
    pub fn grow(&mut self, kernel_pt: &mut PageTable, frames: &mut FrameAllocator, pages: usize) -> KResult<()> {
        if self.current_page + pages > VMEM_0_LIMIT / PAGE_SIZE {
            return Err(KernelError::NoMem);
        }
        let got = frames.get_free_n(pages).ok_or(KernelError::NoMem)?;
        for (i, pfn) in got.into_iter().enumerate() {
            kernel_pt.map(self.current_page + i, pfn, Protection::READ_WRITE);
        }
        self.current_page += pages;
        Ok(())
    }

    /// Post-VM shrink: unmaps and frees the top `pages` pages, flushing each.
    /// Never shrinks below the original brk (spec §4.3).
    pub fn shrink(&mut self, kernel_pt: &mut PageTable, frames: &mut FrameAllocator, hal: &mut dyn Hal, pages: usize) -> KResult<()> {
        if self.current_page < self.original_page + pages {
            return Err(KernelError::InvalidArgument);
        }
        for i in 0..pages {
            let vpn = self.current_page - 1 - i;
            kernel_pt.unmap(frames, vpn);
            hal.tlb_flush(Some(vpn * PAGE_SIZE));
        }
        self.current_page -= pages;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockHal;

    #[test]
    fn grow_then_shrink_frees_same_frames() {
        let mut hal = MockHal::new(4 * 1024 * 1024);
        let mut frames = FrameAllocator::new(1024);
        let mut kpt = PageTable::new(0, 1024);
        let mut brk = KernelBrk::new(100);
        brk.vm_enabled = true;

        let free_before = frames.free_count();
        brk.grow(&mut kpt, &mut frames, 4).unwrap();
        assert_eq!(frames.free_count(), free_before - 4);

        brk.shrink(&mut kpt, &mut frames, &mut hal, 4).unwrap();
        assert_eq!(frames.free_count(), free_before);
        assert_eq!(brk.current_page(), 100);
    }

    #[test]
    fn shrink_below_original_fails() {
        let mut hal = MockHal::new(4 * 1024 * 1024);
        let mut frames = FrameAllocator::new(1024);
        let mut kpt = PageTable::new(0, 1024);
        let mut brk = KernelBrk::new(100);
        brk.vm_enabled = true;
        assert!(brk.shrink(&mut kpt, &mut frames, &mut hal, 1).is_err());
    }

    #[test]
    fn pre_vm_delta_applied_on_enable() {
        let mut frames = FrameAllocator::new(1024);
        let mut kpt = PageTable::new(0, 1024);
        let mut brk = KernelBrk::new(50);
        brk.grow_pre_vm(3);
        brk.enable_vm(&mut kpt, &mut frames).unwrap();
        assert_eq!(brk.current_page(), 53);
        assert!(kpt.is_valid(50));
        assert!(kpt.is_valid(52));
    }
}
