#![allow(clippy::cast_possible_truncation)]

pub mod block_list;
pub mod host;
pub mod window;

use crate::error::{DrvError, DrvResult};
use crate::utils::align_up;
use std::ptr;

pub use block_list::{Block, BlockList, BlockStatus};
pub use host::{HostHeap, MemType};
pub use window::{AddressWindow, CopyKind, HbmBacking, MemAttribute, MemLocation};

/// Simulated HBM of one device: the block allocator plus lazily mapped backing storage.
#[derive(Debug)]
pub struct DeviceMemory {
    window: AddressWindow,
    align: u64,
    blocks: BlockList,
    backing: Option<HbmBacking>,
}

impl DeviceMemory {
    #[must_use]
    pub fn new(window: AddressWindow, align: u64) -> Self {
        Self {
            window,
            align,
            blocks: BlockList::new(window.size),
            backing: None,
        }
    }

    #[must_use]
    pub const fn window(&self) -> AddressWindow {
        self.window
    }

    #[must_use]
    pub const fn blocks(&self) -> &BlockList {
        &self.blocks
    }

    /// Forgets every allocation. Backing contents are left as they are.
    pub fn reset(&mut self) {
        self.blocks.reset();
    }

    /// Allocates `size` bytes (rounded up to the allocation granularity) and returns the
    /// device address.
    ///
    /// # Errors
    /// `InvalidValue` for a zero size, `OutOfMemory` when no free block is large enough.
    pub fn alloc(&mut self, size: u64) -> DrvResult<u64> {
        if size == 0 {
            return Err(DrvError::InvalidValue("alloc size is 0".into()));
        }
        let rounded = align_up(size, self.align)
            .filter(|&s| s <= self.window.size)
            .ok_or_else(|| {
                log::warn!("alloc of 0x{size:x} bytes exceeds hbm window 0x{:x}", self.window.size);
                DrvError::OutOfMemory
            })?;

        let offset = self.blocks.alloc(rounded).ok_or_else(|| {
            log::warn!(
                "hbm exhausted: 0x{rounded:x} requested, 0x{:x} free",
                self.blocks.free_bytes()
            );
            DrvError::OutOfMemory
        })?;
        Ok(self.window.base + offset)
    }

    /// Frees the block that starts at device address `addr`.
    ///
    /// # Errors
    /// `InvalidHandle` for a null address, `NotFound` if `addr` is not the start of a busy block.
    pub fn free(&mut self, addr: u64) -> DrvResult<()> {
        if addr == 0 {
            return Err(DrvError::InvalidHandle("device pointer"));
        }
        if !self.window.contains(addr) {
            return Err(DrvError::NotFound(format!(
                "0x{addr:x} is outside the hbm window"
            )));
        }
        self.blocks.free(addr - self.window.base)
    }

    /// Host pointer behind `[addr, addr + len)` of the window, mapping the backing on first use.
    fn device_ptr(&mut self, addr: u64, len: usize) -> DrvResult<*mut u8> {
        if !self.window.contains_range(addr, len as u64) {
            return Err(DrvError::InvalidValue(format!(
                "device range 0x{addr:x}+0x{len:x} leaves the hbm window"
            )));
        }
        if self.backing.is_none() {
            log::debug!("mapping 0x{:x} bytes of hbm backing", self.window.size);
            self.backing = Some(HbmBacking::map(self.window.size as usize)?);
        }
        let backing = self.backing.as_ref().ok_or(DrvError::OutOfMemory)?;
        Ok(backing.at((addr - self.window.base) as usize))
    }

    /// Window addresses are not host pointers and must never be dereferenced as such.
    fn host_side(&self, addr: u64, kind: CopyKind) -> DrvResult<()> {
        if self.window.contains(addr) {
            return Err(DrvError::InvalidValue(format!(
                "0x{addr:x} is device memory, not a host address for {kind:?}"
            )));
        }
        Ok(())
    }

    /// Resolves `addr` to a host pointer, translating window addresses.
    fn resolve(&mut self, addr: u64, len: usize) -> DrvResult<*mut u8> {
        if self.window.contains(addr) {
            self.device_ptr(addr, len)
        } else {
            Ok(addr as usize as *mut u8)
        }
    }

    /// Fills `size` bytes at `dst` with `value`.
    ///
    /// # Safety
    /// If `dst` is outside the window it must be a host pointer valid for `dst_max` writes.
    ///
    /// # Errors
    /// `InvalidValue` for a null destination, a zero size, `size > dst_max`, or a device
    /// range that leaves the window.
    pub unsafe fn memset(&mut self, dst: u64, dst_max: usize, value: u8, size: usize) -> DrvResult<()> {
        if dst == 0 {
            return Err(DrvError::InvalidValue("memset dst is null".into()));
        }
        if size == 0 || size > dst_max {
            return Err(DrvError::InvalidValue(format!(
                "memset size {size} with dst_max {dst_max}"
            )));
        }
        let p = self.resolve(dst, size)?;
        unsafe { ptr::write_bytes(p, value, size) };
        Ok(())
    }

    /// Copies `size` bytes from `src` to `dst` in direction `kind`.
    ///
    /// # Safety
    /// Host-side addresses must be valid for `size` bytes of reads (`src`) or writes (`dst`).
    ///
    /// # Errors
    /// `InvalidHandle` for null addresses, `InvalidValue` for bad sizes or addresses that do not
    /// match `kind`, `NotSupported` for device-to-device copies.
    pub unsafe fn copy(
        &mut self,
        dst: u64,
        dst_max: usize,
        src: u64,
        size: usize,
        kind: CopyKind,
    ) -> DrvResult<()> {
        if dst == 0 {
            return Err(DrvError::InvalidHandle("copy dst"));
        }
        if src == 0 {
            return Err(DrvError::InvalidHandle("copy src"));
        }
        if size == 0 || size > dst_max {
            return Err(DrvError::InvalidValue(format!(
                "copy size {size} with dst_max {dst_max}"
            )));
        }

        let (to, from) = match kind {
            CopyKind::HostToHost => {
                self.host_side(dst, kind)?;
                self.host_side(src, kind)?;
                (dst as usize as *mut u8, src as usize as *const u8)
            }
            CopyKind::HostToDevice => {
                self.host_side(src, kind)?;
                let to = self.device_ptr(dst, size)?;
                (to, src as usize as *const u8)
            }
            CopyKind::DeviceToHost => {
                self.host_side(dst, kind)?;
                let from = self.device_ptr(src, size)?;
                (dst as usize as *mut u8, from.cast_const())
            }
            CopyKind::DeviceToDevice => {
                log::error!("device-to-device copy 0x{src:x} -> 0x{dst:x} rejected");
                return Err(DrvError::NotSupported("device-to-device copy"));
            }
        };
        unsafe { ptr::copy(from, to, size) };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const BASE: u64 = 0x1000_0000;

    fn hbm() -> DeviceMemory {
        DeviceMemory::new(AddressWindow::new(BASE, 0x3000_0000), 512)
    }

    #[test]
    fn first_fit_reuses_merged_hole() {
        let mut mem = hbm();
        let p1 = mem.alloc(64).unwrap();
        assert_eq!(p1, BASE);
        let p2 = mem.alloc(64).unwrap();
        assert_eq!(p2, p1 + 512);
        mem.free(p1).unwrap();
        // The hole below p2 is only 512 bytes, so 1024 must come from above p2.
        let p3 = mem.alloc(1024).unwrap();
        assert_eq!(p3, p2 + 512);
        mem.free(p2).unwrap();
        // p1's hole, p2 and the space below p3 are now one free block.
        let p4 = mem.alloc(1024).unwrap();
        assert_eq!(p4, p1);
        mem.blocks().check_invariants().unwrap();
    }

    #[test]
    fn size_limits() {
        let mut mem = hbm();
        assert_eq!(mem.alloc(0).unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert!(matches!(mem.alloc(0x3000_0001), Err(DrvError::OutOfMemory)));
        assert!(matches!(mem.alloc(u64::MAX), Err(DrvError::OutOfMemory)));
        let all = mem.alloc(0x3000_0000).unwrap();
        assert!(matches!(mem.alloc(64), Err(DrvError::OutOfMemory)));
        mem.free(all).unwrap();
    }

    #[test]
    fn free_rejects_foreign_addresses() {
        let mut mem = hbm();
        assert!(matches!(mem.free(0), Err(DrvError::InvalidHandle(_))));
        assert!(matches!(mem.free(0x1000_0001), Err(DrvError::NotFound(_))));
        assert!(matches!(mem.free(0x5000_0000), Err(DrvError::NotFound(_))));
    }

    #[test]
    fn unrounded_allocations_pack_tightly() {
        let mut mem = DeviceMemory::new(AddressWindow::new(BASE, 0x1000), 1);
        let a = mem.alloc(3).unwrap();
        let b = mem.alloc(5).unwrap();
        assert_eq!(b - a, 3);
    }

    #[test]
    fn host_device_round_trip() {
        let mut mem = DeviceMemory::new(AddressWindow::new(BASE, 0x10_0000), 512);
        let dev = mem.alloc(64).unwrap();
        let src = *b"HelloWorld";
        let mut back = [0u8; 10];
        unsafe {
            mem.copy(dev, 64, src.as_ptr() as u64, src.len(), CopyKind::HostToDevice)
                .unwrap();
            mem.copy(back.as_mut_ptr() as u64, back.len(), dev, 10, CopyKind::DeviceToHost)
                .unwrap();
        }
        assert_eq!(back, src);
    }

    #[test]
    fn copy_validation() {
        let mut mem = DeviceMemory::new(AddressWindow::new(BASE, 0x10_0000), 512);
        let a = mem.alloc(64).unwrap();
        let b = mem.alloc(64).unwrap();
        let mut host = [0u8; 64];
        let h = host.as_mut_ptr() as u64;
        unsafe {
            assert!(matches!(
                mem.copy(b, 64, a, 64, CopyKind::DeviceToDevice),
                Err(DrvError::NotSupported(_))
            ));
            assert!(matches!(
                mem.copy(0, 64, h, 64, CopyKind::HostToDevice),
                Err(DrvError::InvalidHandle(_))
            ));
            assert!(matches!(
                mem.copy(a, 32, h, 64, CopyKind::HostToDevice),
                Err(DrvError::InvalidValue(_))
            ));
            assert!(matches!(
                mem.copy(BASE + 0x10_0000 - 8, 64, h, 64, CopyKind::HostToDevice),
                Err(DrvError::InvalidValue(_))
            ));
            assert!(matches!(
                mem.copy(h, 64, a, 64, CopyKind::HostToDevice),
                Err(DrvError::InvalidValue(_))
            ));
            assert!(matches!(
                mem.copy(a, 64, h, 64, CopyKind::HostToHost),
                Err(DrvError::InvalidValue(_))
            ));
        }
    }

    #[test]
    fn memset_host_and_device() {
        let mut mem = DeviceMemory::new(AddressWindow::new(BASE, 0x10_0000), 512);
        let dev = mem.alloc(16).unwrap();
        let mut host = [0u8; 16];
        unsafe {
            mem.memset(dev, 16, 0xab, 16).unwrap();
            mem.copy(host.as_mut_ptr() as u64, 16, dev, 16, CopyKind::DeviceToHost)
                .unwrap();
            assert_eq!(host, [0xab; 16]);
            mem.memset(host.as_mut_ptr() as u64, 16, 0, 8).unwrap();
            assert!(mem.memset(host.as_mut_ptr() as u64, 8, 0, 16).is_err());
            assert!(mem.memset(0, 8, 0, 8).is_err());
            assert!(mem.memset(dev, 8, 0, 0).is_err());
        }
        assert_eq!(&host[..8], &[0; 8]);
        assert_eq!(&host[8..], &[0xab; 8]);
    }
}
