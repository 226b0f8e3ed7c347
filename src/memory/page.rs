//! Guest pages: the smallest unit of guest memory, and the owned/shared/COW
//! storage backing it.

use std::sync::Arc;

/// Guest pages are always 4 KiB, matching the RISC-V Sv32/Sv39 base page size.
pub const PAGE_SIZE: usize = 4096;
pub const PAGE_SHIFT: u32 = 12;

/// Read/write/execute/shared/COW attributes for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageAttributes {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
    pub shared: bool,
    pub is_cow: bool,
}

impl PageAttributes {
    pub const fn deny_all() -> Self {
        Self { read: false, write: false, exec: false, shared: false, is_cow: false }
    }

    pub const fn rwx() -> Self {
        Self { read: true, write: true, exec: true, shared: false, is_cow: false }
    }

    pub const fn from_elf_flags(p_flags: u32, protect: bool) -> Self {
        if protect {
            Self {
                read: p_flags & 0x4 != 0,
                write: p_flags & 0x2 != 0,
                exec: p_flags & 0x1 != 0,
                shared: false,
                is_cow: false,
            }
        } else {
            Self::rwx()
        }
    }
}

/// Backing storage for a page. `Owned` pages are freed exactly once, when
/// their `Page` is dropped. `Shared` pages are reference-counted and are
/// never individually deallocated by `Memory` — the last `Arc` drop frees
/// them, matching the invariant that only the owner deallocates a page.
#[derive(Clone)]
enum Storage {
    Owned(Box<[u8; PAGE_SIZE]>),
    Shared(Arc<[u8; PAGE_SIZE]>),
}

/// One guest page: 4096 bytes plus attributes.
///
/// A page with `attr.is_cow == true` is always `Shared`, aliasing the global
/// read-only zero page, until the first write replaces it with an `Owned`
/// buffer (see [`Page::make_writable`]).
#[derive(Clone)]
pub struct Page {
    storage: Storage,
    pub attr: PageAttributes,
}

lazy_static::lazy_static! {
    static ref ZERO_PAGE: Arc<[u8; PAGE_SIZE]> = Arc::new([0u8; PAGE_SIZE]);
}

impl Page {
    /// A freshly allocated, owned, zeroed page with the given attributes.
    pub fn new_owned(attr: PageAttributes) -> Self {
        Self { storage: Storage::Owned(Box::new([0u8; PAGE_SIZE])), attr }
    }

    /// A page aliasing the process-wide read-only zero page. First write
    /// must go through [`Page::make_writable`].
    pub fn new_cow() -> Self {
        let mut attr = PageAttributes::rwx();
        attr.shared = true;
        attr.is_cow = true;
        Self { storage: Storage::Shared(ZERO_PAGE.clone()), attr }
    }

    /// Wrap a caller-owned shared buffer (used by `install_shared_page`).
    pub fn new_shared(data: Arc<[u8; PAGE_SIZE]>, mut attr: PageAttributes) -> Self {
        attr.shared = true;
        Self { storage: Storage::Shared(data), attr }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self.storage, Storage::Owned(_))
    }

    pub fn as_slice(&self) -> &[u8; PAGE_SIZE] {
        match &self.storage {
            Storage::Owned(b) => b,
            Storage::Shared(a) => a,
        }
    }

    /// Returns a mutable view of the page, copying out of shared/COW storage
    /// into a private owned buffer on first write (copy-on-write).
    pub fn make_writable(&mut self) -> &mut [u8; PAGE_SIZE] {
        if let Storage::Shared(shared) = &self.storage {
            let copy = Box::new(**shared);
            self.storage = Storage::Owned(copy);
            self.attr.shared = false;
            self.attr.is_cow = false;
        }
        match &mut self.storage {
            Storage::Owned(b) => b,
            Storage::Shared(_) => unreachable!("just converted to Owned above"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cow_page_starts_shared_and_becomes_owned_on_write() {
        let mut p = Page::new_cow();
        assert!(!p.is_owned());
        assert!(p.attr.is_cow);
        p.make_writable()[0] = 0xAB;
        assert!(p.is_owned());
        assert!(!p.attr.is_cow);
        assert_eq!(p.as_slice()[0], 0xAB);
    }

    #[test]
    fn two_cow_pages_share_the_same_zero_backing() {
        let a = Page::new_cow();
        let b = Page::new_cow();
        assert_eq!(a.as_slice().as_ptr(), b.as_slice().as_ptr());
    }

    #[test]
    fn null_page_attrs_deny_everything() {
        let attr = PageAttributes::deny_all();
        assert!(!attr.read && !attr.write && !attr.exec);
    }
}
