use crate::error::{DrvError, DrvResult};
use crate::slots::SlotBuffer;
use crate::utils::ring_used;
use std::sync::atomic::{AtomicU32, Ordering};

/// A single-producer / single-consumer ring of fixed-size slots.
///
/// Mirrors the cursor contract of the task scheduler's hardware-style queues: the producer
/// owns `write`, the consumer owns `read`, the ring is empty when they are equal and full
/// when `write + 1 == read` modulo the capacity, so one slot always stays unused.
#[derive(Debug)]
pub struct SlotRing {
    buf: SlotBuffer,
    write: AtomicU32,
    read: AtomicU32,
}

impl SlotRing {
    /// # Panics
    /// Panics if `capacity` is below 2.
    #[must_use]
    pub fn new(capacity: u32, slot_size: usize) -> Self {
        assert!(capacity >= 2, "ring capacity {capacity} too small");
        Self {
            buf: SlotBuffer::new(capacity as usize, slot_size),
            write: AtomicU32::new(0),
            read: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.buf.slots() as u32
    }

    #[must_use]
    pub const fn slot_size(&self) -> usize {
        self.buf.slot_size()
    }

    #[must_use]
    pub fn write_cursor(&self) -> u32 {
        self.write.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn read_cursor(&self) -> u32 {
        self.read.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn len(&self) -> u32 {
        ring_used(self.write_cursor(), self.read_cursor(), self.capacity())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.write_cursor() == self.read_cursor()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        (self.write_cursor() + 1) % self.capacity() == self.read_cursor()
    }

    /// Producer side: copies `entry` into the slot at the write cursor and publishes it.
    ///
    /// # Errors
    /// `QueueFull` if no slot is free, `InvalidValue` if `entry` exceeds the slot size.
    pub fn push(&self, entry: &[u8]) -> DrvResult<()> {
        if entry.len() > self.slot_size() {
            return Err(DrvError::InvalidValue(format!(
                "entry of {} bytes exceeds slot size {}",
                entry.len(),
                self.slot_size()
            )));
        }
        let write = self.write.load(Ordering::Relaxed);
        let next = (write + 1) % self.capacity();
        if next == self.read.load(Ordering::Acquire) {
            return Err(DrvError::QueueFull);
        }
        // The slot at `write` is invisible to the consumer until the cursor moves.
        unsafe { self.buf.write_slot(write as usize, entry) };
        self.write.store(next, Ordering::Release);
        Ok(())
    }

    /// Consumer side: copies the oldest entry into `out` and releases its slot.
    ///
    /// # Errors
    /// `NotFound` if the ring is empty, `InvalidValue` if `out` exceeds the slot size.
    pub fn pop(&self, out: &mut [u8]) -> DrvResult<()> {
        if out.len() > self.slot_size() {
            return Err(DrvError::InvalidValue(format!(
                "buffer of {} bytes exceeds slot size {}",
                out.len(),
                self.slot_size()
            )));
        }
        let read = self.read.load(Ordering::Relaxed);
        if read == self.write.load(Ordering::Acquire) {
            return Err(DrvError::NotFound("ring is empty".into()));
        }
        // The producer does not touch `read` until the cursor moves past it.
        unsafe { self.buf.read_slot(read as usize, out) };
        self.read.store((read + 1) % self.capacity(), Ordering::Release);
        Ok(())
    }
}
