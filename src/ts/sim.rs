#![allow(clippy::cast_possible_truncation)]

use super::{COMMAND_SLOT_SIZE, Interrupt, REPORT_SLOT_SIZE, SlotRing, TaskScheduler};
use crate::config::StubConfig;
use crate::error::{DrvError, DrvResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Byte offset of the priority level in a simulated completion report.
pub const REPORT_QOS_OFFSET: usize = 8;

#[derive(Debug)]
struct SimDevice {
    command: Vec<SlotRing>,
    report: SlotRing,
    // Serializes the scheduler side: popping command rings and pushing the report ring.
    worker: Mutex<()>,
    task_irqs: AtomicU64,
    report_irqs: AtomicU64,
}

/// An in-process task scheduler.
///
/// It only counts interrupts; descriptors are executed when a test calls
/// [`SimTaskScheduler::execute`], which turns each queued descriptor into a completion report
/// carrying the descriptor's first 8 bytes and its priority level, then raises one
/// [`Interrupt::ReportReady`] if anything was produced.
///
/// [`SimTaskScheduler::execute`], [`SimTaskScheduler::take_command`] and
/// [`SimTaskScheduler::post_report`] may be called from any thread; they take a per-device
/// lock so each ring keeps a single consumer and a single producer.
#[derive(Debug)]
pub struct SimTaskScheduler {
    devices: Vec<SimDevice>,
}

impl SimTaskScheduler {
    #[must_use]
    pub fn new(config: &StubConfig) -> Self {
        let devices = (0..config.max_devices)
            .map(|_| SimDevice {
                command: (0..config.qos_levels)
                    .map(|_| SlotRing::new(config.ts_command_queue_size, COMMAND_SLOT_SIZE))
                    .collect(),
                report: SlotRing::new(config.ts_report_queue_size, REPORT_SLOT_SIZE),
                worker: Mutex::new(()),
                task_irqs: AtomicU64::new(0),
                report_irqs: AtomicU64::new(0),
            })
            .collect();
        Self { devices }
    }

    fn sim_device(&self, device: usize) -> DrvResult<&SimDevice> {
        self.devices
            .get(device)
            .ok_or(DrvError::InvalidDevice(device as u32))
    }

    /// Number of interrupts of kind `irq` raised for `device` so far.
    #[must_use]
    pub fn interrupt_count(&self, device: usize, irq: Interrupt) -> u64 {
        self.devices.get(device).map_or(0, |d| match irq {
            Interrupt::TaskQueue => d.task_irqs.load(Ordering::Acquire),
            Interrupt::ReportReady => d.report_irqs.load(Ordering::Acquire),
        })
    }

    /// Descriptors waiting in the command ring of (`device`, `qos`).
    ///
    /// # Errors
    /// Fails if the pair does not exist.
    pub fn pending_commands(&self, device: usize, qos: u8) -> DrvResult<u32> {
        Ok(self.command_ring(device, qos)?.len())
    }

    /// Pops one descriptor from the command ring of (`device`, `qos`).
    ///
    /// # Errors
    /// `NotFound` if the ring is empty.
    pub fn take_command(&self, device: usize, qos: u8) -> DrvResult<[u8; COMMAND_SLOT_SIZE]> {
        let ring = self.command_ring(device, qos)?;
        let _worker = self.sim_device(device)?.worker.lock();
        let mut sqe = [0u8; COMMAND_SLOT_SIZE];
        ring.pop(&mut sqe)?;
        Ok(sqe)
    }

    /// Publishes a raw report for `device`.
    ///
    /// # Errors
    /// `QueueFull` if the report ring is full.
    pub fn post_report(&self, device: usize, report: &[u8]) -> DrvResult<()> {
        let dev = self.sim_device(device)?;
        let _worker = dev.worker.lock();
        dev.report.push(report)
    }

    /// Executes queued descriptors of every level, lowest level first, producing one report
    /// per descriptor. Stops early once the report ring is full.
    ///
    /// Returns the number of reports produced.
    ///
    /// # Errors
    /// `InvalidDevice` if the device does not exist.
    pub fn execute(&self, device: usize) -> DrvResult<usize> {
        let dev = self.sim_device(device)?;
        let _worker = dev.worker.lock();
        let mut produced = 0;

        'levels: for (qos, ring) in dev.command.iter().enumerate() {
            while !ring.is_empty() {
                if dev.report.is_full() {
                    log::warn!("sim ts: report ring of device {device} is full");
                    break 'levels;
                }
                let mut sqe = [0u8; COMMAND_SLOT_SIZE];
                ring.pop(&mut sqe)?;

                let mut report = [0u8; REPORT_SLOT_SIZE];
                report[..REPORT_QOS_OFFSET].copy_from_slice(&sqe[..REPORT_QOS_OFFSET]);
                report[REPORT_QOS_OFFSET] = qos as u8;
                dev.report.push(&report)?;
                produced += 1;
            }
        }

        log::debug!("sim ts: device {device} executed {produced} tasks");
        if produced > 0 {
            self.trigger_interrupt(device, Interrupt::ReportReady);
        }
        Ok(produced)
    }
}

impl TaskScheduler for SimTaskScheduler {
    fn command_ring(&self, device: usize, qos: u8) -> DrvResult<&SlotRing> {
        self.sim_device(device)?
            .command
            .get(usize::from(qos))
            .ok_or_else(|| DrvError::InvalidValue(format!("invalid qos level {qos}")))
    }

    fn report_ring(&self, device: usize) -> DrvResult<&SlotRing> {
        Ok(&self.sim_device(device)?.report)
    }

    fn trigger_interrupt(&self, device: usize, irq: Interrupt) {
        let Some(dev) = self.devices.get(device) else {
            log::error!("sim ts: interrupt {irq:?} for unknown device {device}");
            return;
        };
        match irq {
            Interrupt::TaskQueue => dev.task_irqs.fetch_add(1, Ordering::AcqRel),
            Interrupt::ReportReady => dev.report_irqs.fetch_add(1, Ordering::AcqRel),
        };
    }
}
