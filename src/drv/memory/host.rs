use crate::error::{DrvError, DrvResult};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Memory type requested from [`Driver::mem_alloc_typed`](crate::drv::Driver::mem_alloc_typed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemType {
    /// Simulated HBM, served by the device allocator.
    Hbm,
    /// Device DDR. The stub has none.
    Ddr,
    /// Plain host memory from the C heap.
    Host,
}

/// Host allocations handed out by the driver.
///
/// Only pointers returned by [`HostHeap::alloc`] are accepted by [`HostHeap::free`], so a
/// stray or repeated free is an error instead of heap corruption. Whatever is still live when
/// the heap is dropped is returned to the C heap.
#[derive(Debug, Default)]
pub struct HostHeap {
    live: Mutex<HashMap<u64, usize>>,
}

impl HostHeap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates `size` bytes with `malloc` and returns the address.
    ///
    /// # Errors
    /// `InvalidValue` for a zero size, `InvalidHandle` if `malloc` fails.
    pub fn alloc(&self, size: usize) -> DrvResult<u64> {
        if size == 0 {
            return Err(DrvError::InvalidValue("host alloc size is 0".into()));
        }
        let p = unsafe { libc::malloc(size) };
        if p.is_null() {
            log::error!("host alloc of {size} bytes failed");
            return Err(DrvError::InvalidHandle("malloc result"));
        }
        let addr = p as usize as u64;
        self.live.lock().insert(addr, size);
        Ok(addr)
    }

    /// Frees a pointer returned by [`HostHeap::alloc`].
    ///
    /// # Errors
    /// `InvalidValue` for a null pointer, `NotFound` if `addr` is not a live host allocation.
    pub fn free(&self, addr: u64) -> DrvResult<()> {
        if addr == 0 {
            return Err(DrvError::InvalidValue("host pointer is null".into()));
        }
        if self.live.lock().remove(&addr).is_none() {
            log::error!("host free of unknown pointer 0x{addr:x}");
            return Err(DrvError::NotFound(format!(
                "0x{addr:x} is not a host allocation"
            )));
        }
        unsafe { libc::free(addr as usize as *mut libc::c_void) };
        Ok(())
    }

    /// Size of the live allocation at `addr`.
    #[must_use]
    pub fn size_of(&self, addr: u64) -> Option<usize> {
        self.live.lock().get(&addr).copied()
    }

    #[must_use]
    pub fn live(&self) -> usize {
        self.live.lock().len()
    }
}

impl Drop for HostHeap {
    fn drop(&mut self) {
        for (addr, _) in self.live.get_mut().drain() {
            unsafe { libc::free(addr as usize as *mut libc::c_void) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_write_free() {
        let heap = HostHeap::new();
        let p = heap.alloc(32).unwrap();
        assert_eq!(heap.size_of(p), Some(32));
        unsafe { std::ptr::write_bytes(p as usize as *mut u8, 0x5a, 32) };
        heap.free(p).unwrap();
        assert_eq!(heap.live(), 0);
        assert!(matches!(heap.free(p), Err(DrvError::NotFound(_))));
    }

    #[test]
    fn rejects_zero_size_and_null() {
        let heap = HostHeap::new();
        assert!(matches!(heap.alloc(0), Err(DrvError::InvalidValue(_))));
        assert!(matches!(heap.free(0), Err(DrvError::InvalidValue(_))));
    }

    #[test]
    fn drop_releases_live_allocations() {
        let heap = HostHeap::new();
        heap.alloc(8).unwrap();
        heap.alloc(16).unwrap();
        assert_eq!(heap.live(), 2);
    }
}
