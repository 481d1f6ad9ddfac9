use crate::error::{DrvError, DrvResult};
use std::io;
use std::ptr::{self, NonNull};

const PAGE_SIZE_4K: u32 = 0x1000;

/// Direction of a copy, from the point of view of the simulated HBM window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyKind {
    HostToHost,
    HostToDevice,
    DeviceToHost,
    DeviceToDevice,
}

/// Where an address lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemLocation {
    Host,
    Device,
}

/// Result of an attribute query on a raw address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemAttribute {
    pub device: u32,
    pub location: MemLocation,
    pub page_size: u32,
}

/// The fixed address range standing in for accelerator HBM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressWindow {
    pub base: u64,
    pub size: u64,
}

impl AddressWindow {
    #[must_use]
    pub const fn new(base: u64, size: u64) -> Self {
        Self { base, size }
    }

    #[must_use]
    pub const fn limit(&self) -> u64 {
        self.base + self.size
    }

    #[must_use]
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.limit()
    }

    /// True if `[addr, addr + len)` lies entirely inside the window.
    #[must_use]
    pub const fn contains_range(&self, addr: u64, len: u64) -> bool {
        match addr.checked_add(len) {
            Some(end) => self.contains(addr) && end <= self.limit(),
            None => false,
        }
    }

    /// Chooses the copy direction from where each address lives.
    #[must_use]
    pub const fn classify(&self, src: u64, dst: u64) -> CopyKind {
        match (self.contains(src), self.contains(dst)) {
            (false, false) => CopyKind::HostToHost,
            (false, true) => CopyKind::HostToDevice,
            (true, false) => CopyKind::DeviceToHost,
            (true, true) => CopyKind::DeviceToDevice,
        }
    }

    #[must_use]
    pub const fn attribute(&self, addr: u64) -> MemAttribute {
        MemAttribute {
            device: 0,
            location: if self.contains(addr) {
                MemLocation::Device
            } else {
                MemLocation::Host
            },
            page_size: PAGE_SIZE_4K,
        }
    }
}

/// Host memory standing behind the simulated window.
///
/// An anonymous, non-reserved private mapping: pages are only committed when touched.
#[derive(Debug)]
pub struct HbmBacking {
    ptr: NonNull<u8>,
    len: usize,
}

unsafe impl Send for HbmBacking {}
unsafe impl Sync for HbmBacking {}

impl HbmBacking {
    /// Maps `len` bytes of zeroed memory.
    ///
    /// # Errors
    /// Returns the OS error if `mmap` fails.
    pub fn map(len: usize) -> DrvResult<Self> {
        let ret = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if ret == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            log::error!("hbm backing: mmap of 0x{len:x} bytes failed: {err}");
            return Err(DrvError::Io(err));
        }
        let ptr = NonNull::new(ret.cast::<u8>()).ok_or(DrvError::OutOfMemory)?;
        Ok(Self { ptr, len })
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Host pointer for `offset` bytes into the window.
    ///
    /// # Panics
    /// Panics if `offset` is beyond the mapping.
    #[must_use]
    pub fn at(&self, offset: usize) -> *mut u8 {
        assert!(offset <= self.len, "offset 0x{offset:x} beyond hbm backing");
        unsafe { self.ptr.as_ptr().add(offset) }
    }
}

impl Drop for HbmBacking {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}
