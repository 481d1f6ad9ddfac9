//! Command submission and completion report paths.
//!
//! Two implementations of [`SubmitPath`] exist: the per-device ring path (a [`Device`]) and the
//! [`CallbackPath`], which bypasses queueing entirely for in-process testing.
//!
//! [`Device`]: crate::drv::device::Device

pub mod callback;
pub mod qos;
pub mod report;

use crate::error::{DrvError, DrvResult};
use crate::slots::SlotBuffer;
use std::sync::Arc;

pub use callback::CallbackPath;
pub use qos::{DrainOutcome, QosQueue, SlotState};
pub use report::{DrainState, Report, ReportQueue};

/// Selects which submission path an entry point uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqType {
    Normal,
    Callback,
    Logic,
    Shm,
}

/// A command slot handed out by `reserve`.
///
/// The slot stays addressable for as long as this handle lives, even if the queue it came
/// from is torn down.
#[derive(Debug, Clone)]
pub struct CommandSlot {
    buf: Arc<SlotBuffer>,
    index: usize,
    qos: u8,
}

impl CommandSlot {
    pub(crate) fn new(buf: Arc<SlotBuffer>, index: usize, qos: u8) -> Self {
        Self { buf, index, qos }
    }

    /// Address used to submit the slot.
    #[must_use]
    pub fn addr(&self) -> usize {
        self.as_ptr() as usize
    }

    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.buf.slot_ptr(self.index)
    }

    #[must_use]
    pub const fn qos(&self) -> u8 {
        self.qos
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.slot_size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fills the slot with `descriptor`, zero-padding the rest.
    ///
    /// # Safety
    /// The slot must still be reserved by the caller: it must not have been submitted yet.
    ///
    /// # Errors
    /// `InvalidValue` if `descriptor` is larger than a slot.
    pub unsafe fn write(&self, descriptor: &[u8]) -> DrvResult<()> {
        if descriptor.len() > self.len() {
            return Err(DrvError::InvalidValue(format!(
                "descriptor of {} bytes exceeds slot size {}",
                descriptor.len(),
                self.len()
            )));
        }
        unsafe { self.buf.write_slot(self.index, descriptor) };
        Ok(())
    }
}

/// Reserve, submit, wait and release: everything a runtime needs from a submission path.
pub trait SubmitPath: Send + Sync {
    /// Reserves a command slot at priority level `qos`.
    ///
    /// # Errors
    /// `QueueFull` when no slot is available, `InvalidValue` for an unknown level.
    fn reserve(&self, qos: u8) -> DrvResult<CommandSlot>;

    /// Marks the slot at `addr` as filled and hands ready slots to the task scheduler.
    ///
    /// # Errors
    /// `NotFound` if `addr` is not a reserved slot, `Inner` if the scheduler queue is full.
    fn submit(&self, addr: usize) -> DrvResult<()>;

    /// Returns the oldest completion report, blocking until one is available.
    ///
    /// # Errors
    /// Fails only if the report queue is found inconsistent.
    fn wait_report(&self) -> DrvResult<Report>;

    /// Gives the last report back to the driver.
    ///
    /// # Errors
    /// Implementation specific.
    fn release_report(&self) -> DrvResult<()>;
}
