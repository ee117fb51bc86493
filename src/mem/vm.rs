//! Page-table manager: kernel (Region 0) and per-process Region-1 tables
//! (spec §4.2), plus the scratch-mapping protocol fork/exec use to move
//! bytes between address spaces.

use crate::hal::Hal;
use crate::mem::frame::FrameAllocator;
use crate::memlayout::{PAGE_SIZE, SCRATCH_PAGE};

/// `{valid, protection, pfn}` (spec §3 "Page-table entry").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pte {
    pub valid: bool,
    pub prot: Protection,
    pub pfn: usize,
}

impl Pte {
    const INVALID: Pte = Pte {
        valid: false,
        prot: Protection::NONE,
        pfn: 0,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protection(u8);

impl Protection {
    pub const NONE: Protection = Protection(0);
    pub const READ: Protection = Protection(0b001);
    pub const WRITE: Protection = Protection(0b010);
    pub const EXEC: Protection = Protection(0b100);
    pub const READ_WRITE: Protection = Protection(0b011);
    pub const READ_EXEC: Protection = Protection(0b101);

    pub const fn contains(self, other: Protection) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Protection {
    type Output = Protection;
    fn bitor(self, rhs: Protection) -> Protection {
        Protection(self.0 | rhs.0)
    }
}

/// One page table: either the single kernel table (Region 0, `base_page ==
/// 0`) or a process's Region-1 table (`base_page == VMEM_1_BASE /
/// PAGE_SIZE`). Identical entry format for both, per spec §3.
pub struct PageTable {
    base_page: usize,
    entries: Vec<Pte>,
}

impl PageTable {
    pub fn new(base_page: usize, num_pages: usize) -> Self {
        PageTable {
            base_page,
            entries: vec![Pte::INVALID; num_pages],
        }
    }

    fn slot(&self, vpn: usize) -> usize {
        vpn - self.base_page
    }

    pub fn num_pages(&self) -> usize {
        self.entries.len()
    }

    pub fn base_page(&self) -> usize {
        self.base_page
    }

    pub fn pte(&self, vpn: usize) -> Option<Pte> {
        self.entries.get(self.slot(vpn)).copied()
    }

    pub fn is_valid(&self, vpn: usize) -> bool {
        self.pte(vpn).map(|p| p.valid).unwrap_or(false)
    }

    /// Sets a PTE without touching the TLB or the frame allocator — callers
    /// that need the invariant "every valid PTE references a bitmap-set
    /// frame" (spec §3) go through [`map`]/[`unmap`] instead.
    fn set_raw(&mut self, vpn: usize, pte: Pte) {
        let slot = self.slot(vpn);
        self.entries[slot] = pte;
    }

    /// Maps `vpn -> pfn` with the given protection. Does not flush the TLB;
    /// the caller decides whether the mapped process is current (spec §4.2
    /// "requires invalidating that virtual address in the TLB ... if the
    /// process is current").
    pub fn map(&mut self, vpn: usize, pfn: usize, prot: Protection) {
        self.set_raw(
            vpn,
            Pte {
                valid: true,
                prot,
                pfn,
            },
        );
    }

    /// Invalidates `vpn` and releases its frame back to the allocator.
    /// No-op if already invalid.
    pub fn unmap(&mut self, frames: &mut FrameAllocator, vpn: usize) {
        if let Some(pte) = self.pte(vpn) {
            if pte.valid {
                frames.free(pte.pfn);
                self.set_raw(vpn, Pte::INVALID);
            }
        }
    }

    /// Translates a virtual address to a physical byte offset, or `None` if
    /// the containing page is invalid.
    pub fn translate(&self, vaddr: usize) -> Option<usize> {
        let vpn = vaddr / PAGE_SIZE;
        let offset = vaddr % PAGE_SIZE;
        let pte = self.pte(vpn)?;
        pte.valid.then(|| pte.pfn * PAGE_SIZE + offset)
    }

    /// Every page currently valid, ascending, for iteration during fork,
    /// exec teardown, and process destruction.
    pub fn valid_pages(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, p)| p.valid)
            .map(|(i, _)| i + self.base_page)
            .collect()
    }

    /// Unmaps every valid page, releasing all its frames (spec §4.6 "reset
    /// current process's Region 1 by freeing all valid frames").
    pub fn unmap_all(&mut self, frames: &mut FrameAllocator) {
        for vpn in self.valid_pages() {
            self.unmap(frames, vpn);
        }
    }
}

/// Maps `pfn` into the kernel table's scratch page (spec §4.2 "Kernel
/// temporary mappings ... use dedicated virtual pages immediately below the
/// kernel stack") and returns the virtual address now backing it. The
/// caller must pair this with [`unmap_scratch`].
pub fn map_scratch(kernel_pt: &mut PageTable, hal: &mut dyn Hal, pfn: usize, prot: Protection) -> usize {
    kernel_pt.map(SCRATCH_PAGE / PAGE_SIZE, pfn, prot);
    hal.tlb_flush(Some(SCRATCH_PAGE));
    SCRATCH_PAGE
}

/// Invalidates the scratch page without freeing its frame (the frame is
/// owned by whichever page table handed it to `map_scratch`, never by the
/// scratch mapping itself).
pub fn unmap_scratch(kernel_pt: &mut PageTable, hal: &mut dyn Hal) {
    kernel_pt.set_raw(SCRATCH_PAGE / PAGE_SIZE, Pte::INVALID);
    hal.tlb_flush(Some(SCRATCH_PAGE));
}

/// Copies one page's worth of bytes into `dst_pfn`, a frame not yet mapped
/// anywhere, via the scratch-page protocol (spec §4.6 step 2).
pub fn copy_into_frame(kernel_pt: &mut PageTable, hal: &mut dyn Hal, dst_pfn: usize, src: &[u8]) {
    debug_assert_eq!(src.len(), PAGE_SIZE);
    let vaddr = map_scratch(kernel_pt, hal, dst_pfn, Protection::READ_WRITE);
    let phys = kernel_pt.translate(vaddr).expect("scratch mapping just installed");
    hal.phys_write(phys, src);
    unmap_scratch(kernel_pt, hal);
}

/// Reads one page's worth of bytes out of `src_pfn` via the scratch-page
/// protocol. Used when the source frame is not the current process's
/// (e.g. copying a soon-to-be-freed page during diagnostics).
pub fn read_frame(kernel_pt: &mut PageTable, hal: &mut dyn Hal, src_pfn: usize) -> Vec<u8> {
    let vaddr = map_scratch(kernel_pt, hal, src_pfn, Protection::READ);
    let phys = kernel_pt.translate(vaddr).expect("scratch mapping just installed");
    let mut buf = vec![0u8; PAGE_SIZE];
    hal.phys_read(phys, &mut buf);
    unmap_scratch(kernel_pt, hal);
    buf
}

/// Copies `buf` into a process's own address space at `vaddr`, one page at a
/// time through the scratch mapping — used by syscalls handing data back to
/// user space (TTY/pipe reads, `wait`'s status out-parameter).
pub fn copy_out(pt: &PageTable, kernel_pt: &mut PageTable, hal: &mut dyn Hal, vaddr: usize, buf: &[u8]) {
    let mut written = 0;
    while written < buf.len() {
        let addr = vaddr + written;
        let vpn = addr / PAGE_SIZE;
        let offset = addr % PAGE_SIZE;
        let pte = pt.pte(vpn).filter(|p| p.valid).expect("destination page must be mapped");
        let n = (PAGE_SIZE - offset).min(buf.len() - written);
        let scratch = map_scratch(kernel_pt, hal, pte.pfn, Protection::READ_WRITE);
        let phys = kernel_pt.translate(scratch).unwrap() + offset;
        hal.phys_write(phys, &buf[written..written + n]);
        unmap_scratch(kernel_pt, hal);
        written += n;
    }
}

/// Reads `len` bytes out of a process's address space starting at `vaddr`
/// (used by `TtyWrite`/`PipeWrite`/`exec` argv to pull user-supplied bytes
/// into the kernel).
pub fn copy_in(pt: &PageTable, kernel_pt: &mut PageTable, hal: &mut dyn Hal, vaddr: usize, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut read = 0;
    while read < len {
        let addr = vaddr + read;
        let vpn = addr / PAGE_SIZE;
        let offset = addr % PAGE_SIZE;
        let pte = pt.pte(vpn).filter(|p| p.valid).expect("source page must be mapped");
        let n = (PAGE_SIZE - offset).min(len - read);
        let scratch = map_scratch(kernel_pt, hal, pte.pfn, Protection::READ);
        let phys = kernel_pt.translate(scratch).unwrap() + offset;
        let mut chunk = vec![0u8; n];
        hal.phys_read(phys, &mut chunk);
        out.extend_from_slice(&chunk);
        unmap_scratch(kernel_pt, hal);
        read += n;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockHal;

    #[test]
    fn map_unmap_roundtrip() {
        let mut frames = FrameAllocator::new(8);
        let mut pt = PageTable::new(0, 4);
        let pfn = frames.get_free().unwrap();
        pt.map(0, pfn, Protection::READ_WRITE);
        assert!(pt.is_valid(0));
        assert_eq!(pt.translate(10), Some(pfn * PAGE_SIZE + 10));

        pt.unmap(&mut frames, 0);
        assert!(!pt.is_valid(0));
        assert!(!frames.is_used(pfn));
    }

    #[test]
    fn scratch_copy_moves_bytes_between_frames() {
        let mut hal = MockHal::new(64 * PAGE_SIZE);
        let mut frames = FrameAllocator::new(16);
        let mut kernel_pt = PageTable::new(0, 16);

        let dst = frames.get_free().unwrap();
        let mut src = vec![0u8; PAGE_SIZE];
        src[0] = 0x55;
        src[PAGE_SIZE - 1] = 0xAA;

        copy_into_frame(&mut kernel_pt, &mut hal, dst, &src);
        // Scratch page must not be left mapped afterwards.
        assert!(!kernel_pt.is_valid(SCRATCH_PAGE / PAGE_SIZE));

        let mut readback = vec![0u8; PAGE_SIZE];
        hal.phys_read(dst * PAGE_SIZE, &mut readback);
        assert_eq!(readback, src);
    }
}
