#![allow(clippy::cast_possible_truncation)]

use super::CommandSlot;
use crate::config::CreditPolicy;
use crate::error::{DrvError, DrvResult};
use crate::slots::SlotBuffer;
use crate::ts::{COMMAND_SLOT_SIZE, SlotRing};
use crate::utils::ring_used;
use std::slice;
use std::sync::Arc;

/// Lifecycle of one command slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    /// Handed to a caller, not yet filled.
    Reserved,
    /// Filled and waiting to be drained downstream.
    Submitted,
}

/// Result of one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainOutcome {
    pub drained: usize,
    /// Draining stopped because the downstream queue had no credit left.
    pub stalled: bool,
}

/// One priority level of a device's command queue.
///
/// `head` is the next slot to drain, `tail` the next slot to reserve. The ring is full when
/// `head == tail + 1`, so one slot always stays unused.
#[derive(Debug)]
pub struct QosQueue {
    qos: u8,
    slots: Arc<SlotBuffer>,
    states: Vec<SlotState>,
    head: u16,
    tail: u16,
    credit: u32,
}

impl QosQueue {
    /// # Panics
    /// Panics if `capacity` is below 2 or above 65536.
    #[must_use]
    pub fn new(qos: u8, capacity: u32) -> Self {
        assert!(
            (2..=u32::from(u16::MAX) + 1).contains(&capacity),
            "qos queue capacity {capacity} out of range"
        );
        Self {
            qos,
            slots: Arc::new(SlotBuffer::new(capacity as usize, COMMAND_SLOT_SIZE)),
            states: vec![SlotState::Free; capacity as usize],
            head: 0,
            tail: 0,
            credit: 0,
        }
    }

    #[must_use]
    pub const fn qos(&self) -> u8 {
        self.qos
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.states.len() as u32
    }

    #[must_use]
    pub const fn head(&self) -> u16 {
        self.head
    }

    #[must_use]
    pub const fn tail(&self) -> u16 {
        self.tail
    }

    /// Cached downstream credit, as left by the last drain.
    #[must_use]
    pub const fn credit(&self) -> u32 {
        self.credit
    }

    /// Slots between `head` and `tail`, reserved or submitted.
    #[must_use]
    pub fn len(&self) -> u32 {
        ring_used(u32::from(self.tail), u32::from(self.head), self.capacity())
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    #[must_use]
    pub fn state(&self, index: usize) -> Option<SlotState> {
        self.states.get(index).copied()
    }

    fn advance(&self, cursor: u16) -> u16 {
        ((u32::from(cursor) + 1) % self.capacity()) as u16
    }

    /// Reserves the slot at `tail`.
    ///
    /// # Errors
    /// `QueueFull` if the ring is full or the tail slot is still in use.
    pub fn reserve(&mut self) -> DrvResult<CommandSlot> {
        let next = self.advance(self.tail);
        let tail = usize::from(self.tail);
        if next == self.head || self.states[tail] != SlotState::Free {
            log::warn!(
                "qos {} queue is full, head={} tail={}",
                self.qos,
                self.head,
                self.tail
            );
            return Err(DrvError::QueueFull);
        }
        self.states[tail] = SlotState::Reserved;
        self.tail = next;
        Ok(CommandSlot::new(Arc::clone(&self.slots), tail, self.qos))
    }

    /// Index of the slot starting at `addr`, if it belongs to this level.
    #[must_use]
    pub fn locate(&self, addr: usize) -> Option<usize> {
        self.slots.locate(addr)
    }

    /// # Errors
    /// `InvalidValue` if the slot is not currently reserved.
    pub fn mark_submitted(&mut self, index: usize) -> DrvResult<()> {
        match self.states.get(index) {
            Some(SlotState::Reserved) => {
                self.states[index] = SlotState::Submitted;
                Ok(())
            }
            state => Err(DrvError::InvalidValue(format!(
                "qos {} slot {index} cannot be submitted in state {state:?}",
                self.qos
            ))),
        }
    }

    /// Free slots in `ring` according to its own cursors.
    fn downstream_credit(ring: &SlotRing) -> u32 {
        ring.capacity() - ring_used(ring.write_cursor(), ring.read_cursor(), ring.capacity())
    }

    /// Moves contiguous submitted slots from `head` into `ring` while credit allows.
    ///
    /// Stops at the first slot that is not submitted, so a reserved-but-unfilled slot holds
    /// back everything behind it.
    pub fn drain(&mut self, ring: &SlotRing, policy: CreditPolicy) -> DrainOutcome {
        let mut outcome = DrainOutcome::default();
        if policy == CreditPolicy::EveryCycle {
            self.credit = Self::downstream_credit(ring);
        }

        while self.states[usize::from(self.head)] == SlotState::Submitted {
            if self.credit <= 1 || self.credit > ring.capacity() {
                self.credit = Self::downstream_credit(ring);
            }
            if self.credit <= 1 {
                log::warn!("qos {}: task scheduler queue is full", self.qos);
                outcome.stalled = true;
                break;
            }

            let head = usize::from(self.head);
            // A submitted slot is no longer written by its reserver.
            let sqe = unsafe { slice::from_raw_parts(self.slots.slot_ptr(head), COMMAND_SLOT_SIZE) };
            if let Err(e) = ring.push(sqe) {
                log::warn!("qos {}: push to task scheduler failed: {e}", self.qos);
                self.credit = 0;
                outcome.stalled = true;
                break;
            }

            self.states[head] = SlotState::Free;
            self.head = self.advance(self.head);
            self.credit -= 1;
            outcome.drained += 1;
        }
        outcome
    }
}
