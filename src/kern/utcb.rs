//! User thread control blocks
//!
//! A UTCB is the per-thread area where IPC message registers are staged.
//! Threads of one address space share a UTCB area; the [`UtcbHead`] of that
//! space hands out one `UTCB_SIZE` slot per thread, a page at a time.

use alloc::boxed::Box;
use alloc::vec;
use spin::Mutex;

use crate::config::{MR_TOTAL, PAGE_SIZE, UTCB_DESCS_MAX, UTCB_SIZE, UTCB_SLOTS_PER_PAGE};
use crate::error::{TaskError, TaskResult};
use crate::kern::idpool::IdPool;
use crate::kern::zalloc::ZoneElement;

/// Check that `offset..offset + size` lies inside a buffer of `limit` bytes
pub fn check_range(offset: usize, size: usize, limit: usize) -> TaskResult<()> {
    match offset.checked_add(size) {
        Some(end) if end <= limit => Ok(()),
        _ => Err(TaskError::OutOfRange),
    }
}

// ============================================================================
// Message Registers
// ============================================================================

/// Message registers as laid out in a thread's UTCB slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Utcb {
    pub mr: [u32; MR_TOTAL],
    pub saved_tag: u32,
    pub saved_sender: u32,
}

impl Utcb {
    pub const fn new() -> Self {
        Self {
            mr: [0; MR_TOTAL],
            saved_tag: 0,
            saved_sender: 0,
        }
    }

    pub fn read_mr(&self, offset: usize) -> TaskResult<u32> {
        self.mr.get(offset).copied().ok_or(TaskError::OutOfRange)
    }

    pub fn write_mr(&mut self, offset: usize, val: u32) -> TaskResult<()> {
        let mr = self.mr.get_mut(offset).ok_or(TaskError::OutOfRange)?;
        *mr = val;
        Ok(())
    }
}

/// One page of UTCB memory, used for arguments too large for registers
pub struct UtcbPage {
    bytes: Box<[u8]>,
}

impl UtcbPage {
    pub fn new() -> Self {
        Self {
            bytes: vec![0; PAGE_SIZE].into_boxed_slice(),
        }
    }

    /// Copy `arg` into the page at `offset`
    pub fn copy_to(&mut self, arg: &[u8], offset: usize) -> TaskResult<()> {
        check_range(offset, arg.len(), PAGE_SIZE)?;
        self.bytes[offset..offset + arg.len()].copy_from_slice(arg);
        Ok(())
    }

    /// Copy `buf.len()` bytes out of the page from `offset`
    pub fn copy_from(&self, buf: &mut [u8], offset: usize) -> TaskResult<()> {
        check_range(offset, buf.len(), PAGE_SIZE)?;
        buf.copy_from_slice(&self.bytes[offset..offset + buf.len()]);
        Ok(())
    }
}

impl Default for UtcbPage {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// UTCB Area Bookkeeping
// ============================================================================

/// One page of the UTCB area and its slot allocator
#[derive(Debug)]
struct UtcbDesc {
    base: usize,
    slots: IdPool,
}

impl UtcbDesc {
    fn new(base: usize) -> Self {
        Self {
            base,
            slots: IdPool::new("utcb slot", UTCB_SLOTS_PER_PAGE),
        }
    }

    fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.base + PAGE_SIZE
    }
}

/// UTCB area of one address space, shared by every thread in it
#[derive(Debug)]
pub struct UtcbHead {
    area_start: usize,
    descs: Mutex<heapless::Vec<UtcbDesc, UTCB_DESCS_MAX>>,
    _mem: ZoneElement,
}

impl UtcbHead {
    /// Create an empty head whose pages start at `area_start`
    pub fn new(area_start: usize, mem: ZoneElement) -> Self {
        Self {
            area_start,
            descs: Mutex::new(heapless::Vec::new()),
            _mem: mem,
        }
    }

    /// Reserve a UTCB slot and return its address
    pub fn new_utcb(&self) -> TaskResult<usize> {
        let mut descs = self.descs.lock();

        for desc in descs.iter_mut() {
            if let Ok(slot) = desc.slots.alloc() {
                return Ok(desc.base + slot as usize * UTCB_SIZE);
            }
        }

        // Every page is full: add the lowest page not yet in use
        let base = (0..UTCB_DESCS_MAX)
            .map(|i| self.area_start + i * PAGE_SIZE)
            .find(|base| !descs.iter().any(|d| d.base == *base))
            .ok_or(TaskError::NoMemory)?;
        let mut desc = UtcbDesc::new(base);
        let slot = desc.slots.alloc()?;
        descs.push(desc).map_err(|_| TaskError::NoMemory)?;

        log::trace!("utcb: new page at {:#x}", base);
        Ok(base + slot as usize * UTCB_SIZE)
    }

    /// Give back the slot at `addr`; empty pages are dropped
    pub fn delete_utcb(&self, addr: usize) -> TaskResult<()> {
        let mut descs = self.descs.lock();
        let pos = descs
            .iter()
            .position(|d| d.contains(addr))
            .ok_or(TaskError::InvalidArgument)?;

        let desc = &mut descs[pos];
        let offset = addr - desc.base;
        if offset % UTCB_SIZE != 0 || !desc.slots.is_allocated((offset / UTCB_SIZE) as u32) {
            return Err(TaskError::InvalidArgument);
        }
        desc.slots.release((offset / UTCB_SIZE) as u32);

        if desc.slots.is_empty() {
            descs.swap_remove(pos);
        }
        Ok(())
    }

    /// Slots currently handed out
    pub fn slots_in_use(&self) -> usize {
        self.descs.lock().iter().map(|d| d.slots.in_use()).sum()
    }

    /// Pages currently backing the area
    pub fn pages(&self) -> usize {
        self.descs.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UTCB_AREA_START;
    use crate::kern::zalloc::Zone;

    fn head() -> UtcbHead {
        let zone = Zone::new("utcb head", 4);
        UtcbHead::new(UTCB_AREA_START, zone.zalloc().unwrap())
    }

    #[test]
    fn test_message_registers() {
        let mut utcb = Utcb::new();
        utcb.write_mr(2, 0xCAFE).unwrap();
        assert_eq!(utcb.read_mr(2), Ok(0xCAFE));
        assert_eq!(utcb.read_mr(MR_TOTAL), Err(TaskError::OutOfRange));
        assert_eq!(utcb.write_mr(MR_TOTAL, 1), Err(TaskError::OutOfRange));
    }

    #[test]
    fn test_page_copy_bounds() {
        let mut page = UtcbPage::new();
        page.copy_to(b"hello", 10).unwrap();

        let mut buf = [0u8; 5];
        page.copy_from(&mut buf, 10).unwrap();
        assert_eq!(&buf, b"hello");

        // Exactly at the end is fine, one past is not
        assert!(page.copy_to(&[1, 2], PAGE_SIZE - 2).is_ok());
        assert_eq!(page.copy_to(&[1, 2], PAGE_SIZE - 1), Err(TaskError::OutOfRange));
        assert_eq!(page.copy_from(&mut buf, usize::MAX), Err(TaskError::OutOfRange));
    }

    #[test]
    fn test_utcb_slots_fill_pages() {
        let head = head();
        let first = head.new_utcb().unwrap();
        assert_eq!(first, UTCB_AREA_START);
        assert_eq!(head.new_utcb().unwrap(), UTCB_AREA_START + UTCB_SIZE);

        for _ in 2..UTCB_SLOTS_PER_PAGE {
            head.new_utcb().unwrap();
        }
        assert_eq!(head.pages(), 1);

        // Next slot opens a second page
        assert_eq!(head.new_utcb().unwrap(), UTCB_AREA_START + PAGE_SIZE);
        assert_eq!(head.pages(), 2);
        assert_eq!(head.slots_in_use(), UTCB_SLOTS_PER_PAGE + 1);
    }

    #[test]
    fn test_delete_utcb() {
        let head = head();
        let a = head.new_utcb().unwrap();
        let b = head.new_utcb().unwrap();

        head.delete_utcb(a).unwrap();
        assert_eq!(head.delete_utcb(a), Err(TaskError::InvalidArgument));
        assert_eq!(head.delete_utcb(b + 1), Err(TaskError::InvalidArgument));
        assert_eq!(head.delete_utcb(0), Err(TaskError::InvalidArgument));

        // Freed slot is reused
        assert_eq!(head.new_utcb().unwrap(), a);

        head.delete_utcb(a).unwrap();
        head.delete_utcb(b).unwrap();
        assert_eq!(head.pages(), 0);
    }

    #[test]
    fn test_area_exhaustion() {
        let head = head();
        for _ in 0..UTCB_DESCS_MAX * UTCB_SLOTS_PER_PAGE {
            head.new_utcb().unwrap();
        }
        assert_eq!(head.new_utcb(), Err(TaskError::NoMemory));
    }
}
