use std::cell::UnsafeCell;
use std::fmt;
use std::ptr;

/// A contiguous, address-stable array of fixed-size byte slots.
///
/// The backing storage never moves, so the address of a slot can be handed out and later
/// resolved back to its index by offset arithmetic. Synchronisation of slot contents is the
/// responsibility of the ring protocol that owns the buffer.
pub struct SlotBuffer {
    cells: Box<[UnsafeCell<u8>]>,
    slot_size: usize,
    slots: usize,
}

// SAFETY: cells are only touched through raw pointers. A ring writes a slot before publishing
// its cursor with Release and reads it after an Acquire load, so no slot is accessed from two
// threads at once.
unsafe impl Sync for SlotBuffer {}

impl fmt::Debug for SlotBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotBuffer")
            .field("base", &format_args!("0x{:x}", self.base_addr()))
            .field("slot_size", &self.slot_size)
            .field("slots", &self.slots)
            .finish()
    }
}

impl SlotBuffer {
    #[must_use]
    pub fn new(slots: usize, slot_size: usize) -> Self {
        let cells = (0..slots * slot_size).map(|_| UnsafeCell::new(0)).collect();
        Self {
            cells,
            slot_size,
            slots,
        }
    }

    #[must_use]
    pub const fn slot_size(&self) -> usize {
        self.slot_size
    }

    #[must_use]
    pub const fn slots(&self) -> usize {
        self.slots
    }

    #[must_use]
    pub fn base_addr(&self) -> usize {
        self.cells.as_ptr() as usize
    }

    /// Size in bytes of the whole slot array.
    #[must_use]
    pub const fn span(&self) -> usize {
        self.slots * self.slot_size
    }

    /// Raw pointer to the first byte of slot `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn slot_ptr(&self, index: usize) -> *mut u8 {
        assert!(index < self.slots, "slot {index} out of {}", self.slots);
        UnsafeCell::raw_get(self.cells[index * self.slot_size..].as_ptr())
    }

    /// Resolves an address to the index of the slot starting there.
    ///
    /// Addresses outside the array or not on a slot boundary resolve to `None`.
    #[must_use]
    pub fn locate(&self, addr: usize) -> Option<usize> {
        let offset = addr.checked_sub(self.base_addr())?;
        if offset >= self.span() || offset % self.slot_size != 0 {
            return None;
        }
        Some(offset / self.slot_size)
    }

    /// Copies `src` into slot `index`, zero-filling the remainder of the slot.
    ///
    /// # Safety
    /// No other thread may access slot `index` for the duration of the call.
    ///
    /// # Panics
    /// Panics if `src` is longer than a slot or `index` is out of range.
    pub unsafe fn write_slot(&self, index: usize, src: &[u8]) {
        assert!(src.len() <= self.slot_size);
        let dst = self.slot_ptr(index);
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len());
            ptr::write_bytes(dst.add(src.len()), 0, self.slot_size - src.len());
        }
    }

    /// Copies the head of slot `index` into `dst`.
    ///
    /// # Safety
    /// No other thread may write slot `index` for the duration of the call.
    ///
    /// # Panics
    /// Panics if `dst` is longer than a slot or `index` is out of range.
    pub unsafe fn read_slot(&self, index: usize, dst: &mut [u8]) {
        assert!(dst.len() <= self.slot_size);
        let src = self.slot_ptr(index);
        unsafe {
            ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_accepts_only_slot_starts() {
        let buf = SlotBuffer::new(4, 64);
        let base = buf.base_addr();
        assert_eq!(buf.locate(base), Some(0));
        assert_eq!(buf.locate(base + 64 * 3), Some(3));
        assert_eq!(buf.locate(base + 65), None);
        assert_eq!(buf.locate(base + 64 * 4), None);
        assert_eq!(buf.locate(base.wrapping_sub(64)), None);
        assert_eq!(buf.slot_ptr(2) as usize, base + 128);
    }

    #[test]
    fn write_zero_fills_tail() {
        let buf = SlotBuffer::new(2, 8);
        let mut out = [0xffu8; 8];
        unsafe {
            buf.write_slot(1, &[0xaa; 8]);
            buf.write_slot(1, &[1, 2, 3]);
            buf.read_slot(1, &mut out);
        }
        assert_eq!(out, [1, 2, 3, 0, 0, 0, 0, 0]);
    }
}
