//! Boundary with the downstream task scheduler.
//!
//! The stub writes task descriptors into the scheduler's command rings and copies completion
//! reports out of its report rings. Only the ring/cursor contract and the interrupt trigger
//! are visible here; scheduling policy belongs to the scheduler.

pub mod ring;
pub mod sim;

use crate::error::DrvResult;

pub use ring::SlotRing;
pub use sim::SimTaskScheduler;

/// Size in bytes of one task descriptor (command queue slot).
pub const COMMAND_SLOT_SIZE: usize = 64;
/// Size in bytes of one completion report (report queue slot).
pub const REPORT_SLOT_SIZE: usize = 16;

/// Interrupt lines between the stub and the task scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interrupt {
    /// New descriptors were published to a command ring.
    TaskQueue,
    /// New reports were published to a report ring.
    ReportReady,
}

/// The task-scheduler module as seen from the driver stub.
pub trait TaskScheduler: Send + Sync {
    /// Command ring for one (device, priority level) pair.
    ///
    /// # Errors
    /// `InvalidDevice`/`InvalidValue` if the pair does not exist.
    fn command_ring(&self, device: usize, qos: u8) -> DrvResult<&SlotRing>;

    /// Report ring for one device.
    ///
    /// # Errors
    /// `InvalidDevice` if the device does not exist.
    fn report_ring(&self, device: usize) -> DrvResult<&SlotRing>;

    /// Raises an interrupt towards the scheduler.
    fn trigger_interrupt(&self, device: usize, irq: Interrupt);
}
