//! Guest virtual memory: an on-demand, copy-on-write page table addressed by
//! guest page number, plus the gather/scatter primitives the syscall layer
//! uses for zero-copy I/O.
//!
//! There is no MMU to program here, only a guest-address-space simulation —
//! a plain `HashMap<page_no, Page>` per [`Memory`] instance — that the
//! syscall layer and (out of scope) interpreter read through.

pub mod elf;
pub mod page;

use crate::error::{MachineError, Result};
use page::{Page, PageAttributes, PAGE_SHIFT, PAGE_SIZE};
use std::collections::HashMap;

/// One contiguous `{host_ptr, len}` span of guest memory backed by a single
/// page's buffer. Returned by [`Memory::gather_buffers_from_range`]; the
/// syscall layer adapts these into `libc::iovec` for vectored I/O.
#[derive(Debug)]
pub struct GuestSpan {
    pub ptr: *mut u8,
    pub len: usize,
}

/// One-entry cache of the last page touched in each direction, so
/// sequential access skips the `HashMap` lookup. Invalidated on any
/// allocation or attribute change of the cached page.
#[derive(Clone, Copy, Default)]
struct PageCache {
    page_no: Option<u64>,
}

impl PageCache {
    fn invalidate(&mut self, page_no: u64) {
        if self.page_no == Some(page_no) {
            self.page_no = None;
        }
    }
}

pub struct Memory {
    pages: HashMap<u64, Page>,
    pages_total: u64,
    pages_highest: u64,
    read_cache: PageCache,
    write_cache: PageCache,

    pub start_address: u64,
    pub stack_address: u64,
    pub heap_address: u64,
    pub elf_end_vaddr: u64,
    pub exit_address: u64,
    pub protect_segments: bool,
}

impl Memory {
    pub fn new(pages_total: u64, protect_segments: bool) -> Self {
        let mut mem = Self {
            pages: HashMap::new(),
            pages_total,
            pages_highest: 0,
            read_cache: PageCache::default(),
            write_cache: PageCache::default(),
            start_address: 0,
            stack_address: 0,
            heap_address: 0,
            elf_end_vaddr: 0,
            exit_address: 0,
            protect_segments,
        };
        // Page 0 is always present and deny-all, so null derefs fault.
        mem.pages.insert(0, Page::new_owned(PageAttributes::deny_all()));
        mem
    }

    pub fn pages_active(&self) -> u64 {
        self.pages.len() as u64
    }

    pub fn pages_highest(&self) -> u64 {
        self.pages_highest
    }

    pub fn page_no(addr: u64) -> u64 {
        addr >> PAGE_SHIFT
    }

    fn invalidate_caches(&mut self, page_no: u64) {
        self.read_cache.invalidate(page_no);
        self.write_cache.invalidate(page_no);
    }

    /// Insert a freshly zeroed owned page at `page_no` with `attr`.
    /// Fails with `OutOfMemory` once `pages_active >= pages_total`.
    pub fn allocate_page(&mut self, page_no: u64, attr: PageAttributes) -> Result<&mut Page> {
        if !self.pages.contains_key(&page_no) && self.pages.len() as u64 >= self.pages_total {
            return Err(MachineError::OutOfMemory { page_no, pages_total: self.pages_total });
        }
        self.invalidate_caches(page_no);
        self.pages_highest = self.pages_highest.max(page_no);
        log::debug!("allocate_page({page_no:#x}) attr={attr:?}");
        Ok(self.pages.entry(page_no).or_insert_with(|| Page::new_owned(attr)))
    }

    /// Identical to `allocate_page`, used while the ELF loader builds the
    /// initial address space (page 0 is created this way with deny-all
    /// attributes before the loader runs).
    pub fn create_page(&mut self, page_no: u64, attr: PageAttributes) -> Result<&mut Page> {
        self.allocate_page(page_no, attr)
    }

    /// Place a caller-owned shared page at `page_no`. Fails if an existing
    /// page there is not COW, or the supplied page is not itself shared.
    pub fn install_shared_page(&mut self, page_no: u64, page: Page) -> Result<()> {
        if !page.attr.shared {
            return Err(MachineError::IllegalOperation("install_shared_page: page is not shared"));
        }
        if let Some(existing) = self.pages.get(&page_no) {
            if !existing.attr.is_cow {
                return Err(MachineError::IllegalOperation(
                    "install_shared_page: target page is not COW",
                ));
            }
        }
        self.invalidate_caches(page_no);
        self.pages_highest = self.pages_highest.max(page_no);
        self.pages.insert(page_no, page);
        Ok(())
    }

    /// On-demand page creation for an unmapped address: allocate if under
    /// quota, otherwise `OutOfMemory`. Used to service faults encountered by
    /// the gather/scatter and memcpy-family helpers below.
    pub fn default_page_fault(&mut self, page_no: u64) -> Result<&mut Page> {
        self.allocate_page(page_no, PageAttributes::rwx())
    }

    fn page_mut(&mut self, page_no: u64) -> Result<&mut Page> {
        if self.pages.contains_key(&page_no) {
            Ok(self.pages.get_mut(&page_no).unwrap())
        } else {
            self.default_page_fault(page_no)
        }
    }

    fn page(&self, page_no: u64) -> Result<&Page> {
        self.pages.get(&page_no).ok_or(MachineError::Fault { addr: page_no << PAGE_SHIFT })
    }

    /// Bounded-safe copy from a host buffer into guest memory, walking page
    /// by page and triggering page faults (which may allocate) as needed.
    pub fn memcpy(&mut self, mut guest_addr: u64, mut src: &[u8]) -> Result<()> {
        while !src.is_empty() {
            let page_no = Self::page_no(guest_addr);
            let offset = (guest_addr as usize) & (PAGE_SIZE - 1);
            let chunk = (PAGE_SIZE - offset).min(src.len());
            let page = self.page_mut(page_no)?;
            page.make_writable()[offset..offset + chunk].copy_from_slice(&src[..chunk]);
            src = &src[chunk..];
            guest_addr += chunk as u64;
        }
        Ok(())
    }

    /// Bounded-safe fill of `len` bytes of guest memory with `byte`.
    pub fn memset(&mut self, mut guest_addr: u64, byte: u8, mut len: usize) -> Result<()> {
        while len > 0 {
            let page_no = Self::page_no(guest_addr);
            let offset = (guest_addr as usize) & (PAGE_SIZE - 1);
            let chunk = (PAGE_SIZE - offset).min(len);
            let page = self.page_mut(page_no)?;
            page.make_writable()[offset..offset + chunk].fill(byte);
            len -= chunk;
            guest_addr += chunk as u64;
        }
        Ok(())
    }

    /// Bounded-safe copy of `len` bytes of guest memory out to a host
    /// buffer.
    pub fn copy_from_guest_raw(&mut self, mut guest_addr: u64, dst: &mut [u8]) -> Result<()> {
        let mut remaining = dst.len();
        let mut written = 0usize;
        while remaining > 0 {
            let page_no = Self::page_no(guest_addr);
            let offset = (guest_addr as usize) & (PAGE_SIZE - 1);
            let chunk = (PAGE_SIZE - offset).min(remaining);
            let page = self.page_mut(page_no)?;
            dst[written..written + chunk].copy_from_slice(&page.as_slice()[offset..offset + chunk]);
            written += chunk;
            remaining -= chunk;
            guest_addr += chunk as u64;
        }
        Ok(())
    }

    /// Reads a NUL-terminated string starting at `addr`. The returned
    /// string's bytes plus the terminator are all readable guest memory.
    pub fn memstring(&mut self, addr: u64) -> Result<String> {
        let mut out = Vec::new();
        let mut cur = addr;
        loop {
            let page_no = Self::page_no(cur);
            let offset = (cur as usize) & (PAGE_SIZE - 1);
            let page = self.page(page_no)?;
            let slice = &page.as_slice()[offset..];
            match slice.iter().position(|&b| b == 0) {
                Some(nul) => {
                    out.extend_from_slice(&slice[..nul]);
                    return Ok(String::from_utf8_lossy(&out).into_owned());
                }
                None => {
                    out.extend_from_slice(slice);
                    cur += slice.len() as u64;
                }
            }
        }
    }

    /// Type-preserving copy of a `Copy` struct from the host into guest
    /// memory (e.g. writing a translated `riscv_stat`).
    pub fn copy_to_guest<T: Copy>(&mut self, guest_addr: u64, value: &T) -> Result<()> {
        let bytes = unsafe {
            std::slice::from_raw_parts(value as *const T as *const u8, std::mem::size_of::<T>())
        };
        self.memcpy(guest_addr, bytes)
    }

    /// Type-preserving copy of a `Copy` struct out of guest memory (e.g.
    /// reading a guest `timespec`).
    pub fn copy_from_guest<T: Copy + Default>(&mut self, guest_addr: u64) -> Result<T> {
        let mut value = T::default();
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(&mut value as *mut T as *mut u8, std::mem::size_of::<T>())
        };
        self.copy_from_guest_raw(guest_addr, bytes)?;
        Ok(value)
    }

    /// Fills `out` with up to `max` `{host_ptr, len}` descriptors covering
    /// `[guest_addr, guest_addr + len)`, splitting at page boundaries.
    /// Returns the number of spans written. Stops once `max` spans have been
    /// gathered, even if the requested range is not fully covered yet — the
    /// caller is expected to pass a cap large enough for the ranges it deals
    /// in. Every covered page must be mapped (faulted in on demand); when
    /// `writable` is set, COW pages are materialized into owned storage
    /// before their pointer is handed out.
    pub fn gather_buffers_from_range(
        &mut self,
        out: &mut Vec<GuestSpan>,
        guest_addr: u64,
        len: usize,
        writable: bool,
        max: usize,
    ) -> Result<usize> {
        out.clear();
        let mut remaining = len;
        let mut addr = guest_addr;
        while remaining > 0 && out.len() < max {
            let page_no = Self::page_no(addr);
            let offset = (addr as usize) & (PAGE_SIZE - 1);
            let chunk = (PAGE_SIZE - offset).min(remaining);
            let page = self.page_mut(page_no)?;
            let ptr = if writable {
                page.make_writable().as_mut_ptr()
            } else {
                page.as_slice().as_ptr() as *mut u8
            };
            out.push(GuestSpan { ptr: unsafe { ptr.add(offset) }, len: chunk });
            remaining -= chunk;
            addr += chunk as u64;
        }
        Ok(out.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem() -> Memory {
        Memory::new(4096, true)
    }

    #[test]
    fn page_zero_is_always_present_and_deny_all() {
        let m = mem();
        let p = m.page(0).unwrap();
        assert!(!p.attr.read && !p.attr.write && !p.attr.exec);
    }

    #[test]
    fn memcpy_then_copy_from_guest_round_trips_across_page_boundary() {
        let mut m = mem();
        let addr = PAGE_SIZE as u64 - 2;
        let data = [1u8, 2, 3, 4, 5];
        m.memcpy(addr, &data).unwrap();
        let mut back = [0u8; 5];
        m.copy_from_guest_raw(addr, &mut back).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn memstring_reads_nul_terminated_bytes_spanning_pages() {
        let mut m = mem();
        let addr = PAGE_SIZE as u64 - 3;
        m.memcpy(addr, b"hello\0").unwrap();
        assert_eq!(m.memstring(addr).unwrap(), "hello");
    }

    #[test]
    fn gather_covers_exact_length_and_splits_on_page_boundary() {
        let mut m = mem();
        let addr = PAGE_SIZE as u64 - 4;
        let mut out = Vec::new();
        let n = m.gather_buffers_from_range(&mut out, addr, 16, true, 256).unwrap();
        assert_eq!(n, 2);
        let total: usize = out.iter().map(|s| s.len).sum();
        assert_eq!(total, 16);
        assert_eq!(out[0].len, 4);
        assert_eq!(out[1].len, 12);
    }

    #[test]
    fn gather_stops_once_the_span_cap_is_reached() {
        let mut m = mem();
        let addr = PAGE_SIZE as u64 - 4;
        let mut out = Vec::new();
        let n = m.gather_buffers_from_range(&mut out, addr, 16, true, 1).unwrap();
        assert_eq!(n, 1);
        assert_eq!(out[0].len, 4);
    }

    #[test]
    fn allocate_page_fails_once_quota_exhausted() {
        let mut m = Memory::new(1, true); // page 0 already consumes the only slot
        let err = m.allocate_page(1, PageAttributes::rwx()).unwrap_err();
        assert!(matches!(err, MachineError::OutOfMemory { .. }));
    }

    #[test]
    fn install_shared_page_requires_cow_target_and_shared_source() {
        use std::sync::Arc;
        let mut m = mem();
        // Target page 1 is not yet mapped -> default_page_fault makes it an
        // owned rwx page, not COW, so install must fail.
        m.allocate_page(1, PageAttributes::rwx()).unwrap();
        let shared = Page::new_shared(Arc::new([7u8; PAGE_SIZE]), PageAttributes::rwx());
        assert!(m.install_shared_page(1, shared).is_err());

        // A COW page at 2 accepts the shared replacement.
        m.install_shared_page(2, Page::new_cow()).unwrap();
        let shared2 = Page::new_shared(Arc::new([9u8; PAGE_SIZE]), PageAttributes::rwx());
        assert!(m.install_shared_page(2, shared2).is_ok());
    }
}
