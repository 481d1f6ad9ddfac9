#![allow(clippy::cast_possible_truncation)]

use crate::config::StubConfig;
use crate::drv::device::Device;
use crate::drv::memory::HostHeap;
use crate::drv::queues::{CallbackPath, SqType, SubmitPath};
use crate::error::{DrvError, DrvResult};
use crate::ts::{SimTaskScheduler, TaskScheduler};
use crate::utils::device_index;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;

/// Registry of open devices sharing one task scheduler.
///
/// Devices are built on open and dropped on close, so every device starts with empty
/// bitmaps, a fresh allocator and empty queues.
pub struct Driver {
    config: StubConfig,
    scheduler: Arc<dyn TaskScheduler>,
    callback: Arc<CallbackPath>,
    host: HostHeap,
    devices: RwLock<Vec<Option<Arc<Device>>>>,
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("config", &self.config)
            .field("open_devices", &self.open_devices())
            .finish_non_exhaustive()
    }
}

impl Driver {
    /// # Errors
    /// `InvalidValue` if `config` does not validate.
    pub fn new(config: StubConfig, scheduler: Arc<dyn TaskScheduler>) -> DrvResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            scheduler,
            callback: Arc::new(CallbackPath::new()),
            host: HostHeap::new(),
            devices: RwLock::new(vec![None; config.max_devices as usize]),
        })
    }

    /// Builds a driver backed by a fresh [`SimTaskScheduler`] and returns both.
    ///
    /// # Errors
    /// `InvalidValue` if `config` does not validate.
    pub fn with_sim(config: StubConfig) -> DrvResult<(Self, Arc<SimTaskScheduler>)> {
        config.validate()?;
        let sim = Arc::new(SimTaskScheduler::new(&config));
        let driver = Self::new(config, sim.clone())?;
        Ok((driver, sim))
    }

    #[must_use]
    pub const fn config(&self) -> &StubConfig {
        &self.config
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<dyn TaskScheduler> {
        &self.scheduler
    }

    /// Host allocations made through this driver.
    #[must_use]
    pub const fn host_heap(&self) -> &HostHeap {
        &self.host
    }

    #[must_use]
    pub const fn device_count(&self) -> u32 {
        self.config.max_devices
    }

    /// Handles of the devices currently open.
    #[must_use]
    pub fn open_devices(&self) -> Vec<u32> {
        self.devices
            .read()
            .iter()
            .enumerate()
            .filter(|(_, d)| d.is_some())
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// Opens `handle`, or returns the already open device.
    ///
    /// # Errors
    /// `InvalidDevice` if `handle` is out of range.
    pub fn open_device(&self, handle: u32) -> DrvResult<Arc<Device>> {
        let index = device_index(handle, self.config.max_devices)?;
        let mut devices = self.devices.write();
        if let Some(dev) = &devices[index] {
            return Ok(Arc::clone(dev));
        }
        let dev = Arc::new(Device::new(index, &self.config, Arc::clone(&self.scheduler)));
        devices[index] = Some(Arc::clone(&dev));
        log::debug!("device {handle} opened");
        Ok(dev)
    }

    /// Tears down the per-device state of `handle`.
    ///
    /// Outstanding `Arc<Device>` handles stay usable but are no longer reachable through the
    /// driver.
    ///
    /// # Errors
    /// `InvalidDevice` if out of range, `NotFound` if the device is not open.
    pub fn close_device(&self, handle: u32) -> DrvResult<()> {
        let index = device_index(handle, self.config.max_devices)?;
        if self.devices.write()[index].take().is_none() {
            return Err(DrvError::NotFound(format!("device {handle} is not open")));
        }
        log::debug!("device {handle} closed");
        Ok(())
    }

    /// # Errors
    /// `InvalidDevice` if out of range, `NotFound` if the device is not open.
    pub fn device(&self, handle: u32) -> DrvResult<Arc<Device>> {
        let index = device_index(handle, self.config.max_devices)?;
        self.devices.read()[index].clone().ok_or_else(|| {
            log::error!("device {handle} is not open");
            DrvError::NotFound(format!("device {handle} is not open"))
        })
    }

    /// Submission path for `handle` selected by `ty`.
    ///
    /// # Errors
    /// `InvalidValue` for `Logic`/`Shm`; device lookup errors for `Normal`.
    pub fn path(&self, handle: u32, ty: SqType) -> DrvResult<Arc<dyn SubmitPath>> {
        let path: Arc<dyn SubmitPath> = match ty {
            SqType::Normal => self.device(handle)?,
            SqType::Callback => self.callback.clone(),
            SqType::Logic | SqType::Shm => {
                log::error!("invalid sq type {ty:?}");
                return Err(DrvError::InvalidValue(format!("invalid sq type {ty:?}")));
            }
        };
        Ok(path)
    }

    /// Delivers a report-ready interrupt to `handle`.
    ///
    /// # Errors
    /// Device lookup errors.
    pub fn report_interrupt(&self, handle: u32) -> DrvResult<usize> {
        self.device(handle)?.report_interrupt()
    }
}

// ===============================================================================================
// Global Driver Management
// ===============================================================================================

struct Global {
    driver: Arc<Driver>,
    sim: Option<Arc<SimTaskScheduler>>,
}

static GLOBAL_DRIVER: Mutex<Option<Global>> = parking_lot::const_mutex(None);

fn global_init(slot: &mut Option<Global>) -> DrvResult<&Global> {
    if slot.is_none() {
        let (driver, sim) = Driver::with_sim(StubConfig::new())?;
        for handle in 0..driver.device_count() {
            driver.open_device(handle)?;
        }
        *slot = Some(Global {
            driver: Arc::new(driver),
            sim: Some(sim),
        });
    }
    slot.as_ref()
        .ok_or_else(|| DrvError::Inner("global driver missing after init".into()))
}

/// Returns the process-wide driver, creating it on first use.
///
/// The first call builds a driver with the default configuration on a [`SimTaskScheduler`] and
/// opens every device.
///
/// # Errors
/// Propagates configuration and device errors from the first initialization.
pub fn acquire() -> DrvResult<Arc<Driver>> {
    let mut guard = GLOBAL_DRIVER.lock();
    Ok(global_init(&mut guard)?.driver.clone())
}

/// Like [`acquire`], also returning the simulator the process-wide driver submits to.
///
/// Both handles come from the same initialization, so descriptors sent through the driver
/// can be executed on the returned simulator.
///
/// # Errors
/// `NotSupported` if the installed driver was not built on a [`SimTaskScheduler`], otherwise
/// as [`acquire`].
pub fn acquire_with_sim() -> DrvResult<(Arc<Driver>, Arc<SimTaskScheduler>)> {
    let mut guard = GLOBAL_DRIVER.lock();
    let global = global_init(&mut guard)?;
    let sim = global
        .sim
        .clone()
        .ok_or(DrvError::NotSupported("global driver has no simulated scheduler"))?;
    Ok((global.driver.clone(), sim))
}

/// Installs `driver` as the process-wide driver unless one already exists.
///
/// Pass the simulator behind `driver`, if any, so [`acquire_with_sim`] can hand it out.
/// Returns the driver that ends up installed.
pub fn install(driver: Driver, sim: Option<Arc<SimTaskScheduler>>) -> Arc<Driver> {
    let mut guard = GLOBAL_DRIVER.lock();
    guard
        .get_or_insert_with(|| Global {
            driver: Arc::new(driver),
            sim,
        })
        .driver
        .clone()
}

/// Drops the process-wide driver. Existing `Arc<Driver>` handles stay valid.
pub fn release() {
    GLOBAL_DRIVER.lock().take();
}
