use crate::config::StubConfig;
use crate::drv::memory::{AddressWindow, CopyKind, DeviceMemory, MemAttribute};
use crate::drv::queues::{CommandSlot, DrainOutcome, QosQueue, Report, ReportQueue, SubmitPath};
use crate::drv::resource::{ResourceIds, ResourceKind};
use crate::error::{DrvError, DrvResult};
use crate::ts::{Interrupt, TaskScheduler};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;

/// Everything the stub keeps for one open device.
///
/// Created by [`Driver::open_device`](crate::drv::Driver::open_device) and dropped on close.
/// The locks around each component are uncontended under the usual one submitting thread
/// per device; the report queue is the only part shared with an interrupt thread.
pub struct Device {
    index: usize,
    config: StubConfig,
    ids: Mutex<ResourceIds>,
    memory: Mutex<DeviceMemory>,
    qos: Vec<Mutex<QosQueue>>,
    reports: ReportQueue,
    scheduler: Arc<dyn TaskScheduler>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("index", &self.index)
            .field("qos_levels", &self.qos.len())
            .field("pending_reports", &self.reports.pending())
            .finish_non_exhaustive()
    }
}

impl Device {
    #[must_use]
    pub fn new(index: usize, config: &StubConfig, scheduler: Arc<dyn TaskScheduler>) -> Self {
        let window = AddressWindow::new(config.hbm_base, config.hbm_size);
        Self {
            index,
            config: *config,
            ids: Mutex::new(ResourceIds::new()),
            memory: Mutex::new(DeviceMemory::new(window, config.alloc_align)),
            qos: (0..config.qos_levels)
                .map(|level| Mutex::new(QosQueue::new(level, config.qos_queue_size)))
                .collect(),
            reports: ReportQueue::new(config.report_queue_size),
            scheduler,
        }
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub const fn config(&self) -> &StubConfig {
        &self.config
    }

    // ===========================================================================================
    // Resource Ids
    // ===========================================================================================

    /// # Errors
    /// See [`ResourceIds::allocate`].
    pub fn alloc_id(&self, kind: ResourceKind) -> DrvResult<u32> {
        self.ids.lock().allocate(kind)
    }

    /// # Errors
    /// See [`ResourceIds::release`].
    pub fn free_id(&self, kind: ResourceKind, id: u32) -> DrvResult<()> {
        self.ids.lock().release(kind, id)
    }

    #[must_use]
    pub fn ids_in_use(&self, kind: ResourceKind) -> u32 {
        self.ids.lock().in_use(kind)
    }

    // ===========================================================================================
    // Device Memory
    // ===========================================================================================

    /// Direct access to the allocator, for introspection and reset.
    pub fn memory(&self) -> MutexGuard<'_, DeviceMemory> {
        self.memory.lock()
    }

    /// # Errors
    /// See [`DeviceMemory::alloc`].
    pub fn mem_alloc(&self, size: u64) -> DrvResult<u64> {
        self.memory.lock().alloc(size)
    }

    /// # Errors
    /// See [`DeviceMemory::free`].
    pub fn mem_free(&self, addr: u64) -> DrvResult<()> {
        self.memory.lock().free(addr)
    }

    #[must_use]
    pub fn mem_attribute(&self, addr: u64) -> MemAttribute {
        let mut attr = self.memory.lock().window().attribute(addr);
        attr.device = self.index as u32;
        attr
    }

    /// # Safety
    /// See [`DeviceMemory::memset`].
    ///
    /// # Errors
    /// See [`DeviceMemory::memset`].
    pub unsafe fn memset(&self, dst: u64, dst_max: usize, value: u8, size: usize) -> DrvResult<()> {
        unsafe { self.memory.lock().memset(dst, dst_max, value, size) }
    }

    /// # Safety
    /// See [`DeviceMemory::copy`].
    ///
    /// # Errors
    /// See [`DeviceMemory::copy`].
    pub unsafe fn copy(
        &self,
        dst: u64,
        dst_max: usize,
        src: u64,
        size: usize,
        kind: CopyKind,
    ) -> DrvResult<()> {
        unsafe { self.memory.lock().copy(dst, dst_max, src, size, kind) }
    }

    // ===========================================================================================
    // Command Queue
    // ===========================================================================================

    fn level(&self, qos: u8) -> DrvResult<&Mutex<QosQueue>> {
        self.qos.get(usize::from(qos)).ok_or_else(|| {
            log::error!("device {}: invalid qos level {qos}", self.index);
            DrvError::InvalidValue(format!("invalid qos level {qos}"))
        })
    }

    /// `(head, tail)` cursors of one priority level.
    ///
    /// # Errors
    /// `InvalidValue` for an unknown level.
    pub fn queue_cursors(&self, qos: u8) -> DrvResult<(u16, u16)> {
        let q = self.level(qos)?.lock();
        Ok((q.head(), q.tail()))
    }

    /// Reserves a command slot at level `qos`.
    ///
    /// # Errors
    /// `InvalidValue` for an unknown level, `QueueFull` when the level has no free slot.
    pub fn reserve(&self, qos: u8) -> DrvResult<CommandSlot> {
        self.level(qos)?.lock().reserve()
    }

    /// Marks the slot at `addr` submitted and drains its level.
    ///
    /// # Errors
    /// `NotFound` if `addr` is not a slot of this device, `InvalidValue` if the slot is not
    /// reserved, `Inner` if the task scheduler queue filled up before the level was drained.
    pub fn submit(&self, addr: usize) -> DrvResult<()> {
        for level in &self.qos {
            let mut q = level.lock();
            if let Some(index) = q.locate(addr) {
                q.mark_submitted(index)?;
                let qos = q.qos();
                return self.drain_locked(&mut q, qos);
            }
        }
        log::error!("device {}: 0x{addr:x} is not a command slot", self.index);
        Err(DrvError::NotFound(format!("no command slot at 0x{addr:x}")))
    }

    /// Retries draining level `qos`, e.g. after the task scheduler consumed descriptors.
    ///
    /// # Errors
    /// As for [`Device::submit`].
    pub fn drain(&self, qos: u8) -> DrvResult<()> {
        let mut q = self.level(qos)?.lock();
        self.drain_locked(&mut q, qos)
    }

    fn drain_locked(&self, q: &mut QosQueue, qos: u8) -> DrvResult<()> {
        let ring = self.scheduler.command_ring(self.index, qos)?;
        let DrainOutcome { drained, stalled } = q.drain(ring, self.config.credit_policy);
        if drained > 0 {
            log::debug!("device {}: drained {drained} tasks at qos {qos}", self.index);
            self.scheduler.trigger_interrupt(self.index, Interrupt::TaskQueue);
        }
        if stalled {
            return Err(DrvError::Inner(format!(
                "task scheduler queue for qos {qos} is full"
            )));
        }
        Ok(())
    }

    // ===========================================================================================
    // Report Queue
    // ===========================================================================================

    #[must_use]
    pub const fn reports(&self) -> &ReportQueue {
        &self.reports
    }

    /// Report-ready interrupt: pulls reports from the task scheduler.
    ///
    /// # Errors
    /// Fails if the scheduler has no report ring for this device.
    pub fn report_interrupt(&self) -> DrvResult<usize> {
        let src = self.scheduler.report_ring(self.index)?;
        let moved = self.reports.on_interrupt(src);
        log::debug!("device {}: {moved} reports delivered", self.index);
        Ok(moved)
    }
}

impl SubmitPath for Device {
    fn reserve(&self, qos: u8) -> DrvResult<CommandSlot> {
        Self::reserve(self, qos)
    }

    fn submit(&self, addr: usize) -> DrvResult<()> {
        Self::submit(self, addr)
    }

    fn wait_report(&self) -> DrvResult<Report> {
        self.reports.wait()
    }

    fn release_report(&self) -> DrvResult<()> {
        Ok(())
    }
}
