//! Driver entry points as the runtime calls them.
//!
//! Every call names a device handle and, for the queue calls, an [`SqType`] choosing between
//! the ring path and the callback bypass.

use crate::drv::context::Driver;
use crate::drv::memory::{AddressWindow, CopyKind, MemAttribute, MemType};
use crate::drv::queues::{CommandSlot, Report, SqType};
use crate::drv::resource::ResourceKind;
use crate::error::{DrvError, DrvResult};

/// Id kinds accepted by [`Driver::resource_id_alloc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceIdType {
    Stream,
    Event,
    /// Not tracked; always id 1.
    Model,
    /// Not tracked; always id 1.
    Notify,
}

/// Id returned for the untracked kinds.
pub const UNTRACKED_RESOURCE_ID: u32 = 1;

/// Submission/completion queue pair handed out by [`Driver::sqcq_allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqCqPair {
    pub sq_id: u32,
    pub cq_id: u32,
}

fn invalid_type(ty: SqType) -> DrvError {
    log::error!("invalid type: {ty:?}");
    DrvError::InvalidValue(format!("invalid type {ty:?}"))
}

impl Driver {
    fn window(&self) -> AddressWindow {
        AddressWindow::new(self.config().hbm_base, self.config().hbm_size)
    }

    // ===========================================================================================
    // Resource Ids
    // ===========================================================================================

    /// # Errors
    /// Device lookup errors, or the bitmap exhaustion error for `Stream`/`Event`.
    pub fn resource_id_alloc(&self, device: u32, ty: ResourceIdType) -> DrvResult<u32> {
        match ty {
            ResourceIdType::Stream => self.device(device)?.alloc_id(ResourceKind::Stream),
            ResourceIdType::Event => self.device(device)?.alloc_id(ResourceKind::Event),
            ResourceIdType::Model | ResourceIdType::Notify => Ok(UNTRACKED_RESOURCE_ID),
        }
    }

    /// # Errors
    /// Device lookup errors, or `InvalidValue` for a `Stream`/`Event` id that is not allocated.
    pub fn resource_id_free(&self, device: u32, ty: ResourceIdType, id: u32) -> DrvResult<()> {
        match ty {
            ResourceIdType::Stream => self.device(device)?.free_id(ResourceKind::Stream, id),
            ResourceIdType::Event => self.device(device)?.free_id(ResourceKind::Event, id),
            ResourceIdType::Model | ResourceIdType::Notify => Ok(()),
        }
    }

    /// Allocates a task pool id.
    ///
    /// # Errors
    /// `OutOfMemory` when every task pool id is taken.
    pub fn task_pool_alloc(&self, device: u32) -> DrvResult<u32> {
        self.device(device)?.alloc_id(ResourceKind::TaskPool)
    }

    /// # Errors
    /// `InvalidValue` if `id` is not allocated.
    pub fn task_pool_free(&self, device: u32, id: u32) -> DrvResult<()> {
        self.device(device)?.free_id(ResourceKind::TaskPool, id)
    }

    // ===========================================================================================
    // Queue Pairs
    // ===========================================================================================

    /// Allocates a queue pair.
    ///
    /// `Callback` pairs come from the device's SQCQ bitmap. `Normal` pairs are owned by the
    /// caller, which passes their id in `requested`; it is echoed back.
    ///
    /// # Errors
    /// `InvalidValue` for `Logic`/`Shm`, `Inner` when the bitmap is exhausted.
    pub fn sqcq_allocate(&self, device: u32, ty: SqType, requested: u32) -> DrvResult<SqCqPair> {
        let id = match ty {
            SqType::Callback => self.device(device)?.alloc_id(ResourceKind::SqCq)?,
            SqType::Normal => requested,
            SqType::Logic | SqType::Shm => return Err(invalid_type(ty)),
        };
        Ok(SqCqPair { sq_id: id, cq_id: id })
    }

    /// # Errors
    /// `InvalidValue` for `Logic`/`Shm` or an unallocated `Callback` id.
    pub fn sqcq_free(&self, device: u32, ty: SqType, sq_id: u32) -> DrvResult<()> {
        match ty {
            SqType::Callback => self.device(device)?.free_id(ResourceKind::SqCq, sq_id),
            SqType::Normal => Ok(()),
            SqType::Logic | SqType::Shm => Err(invalid_type(ty)),
        }
    }

    // ===========================================================================================
    // Submission
    // ===========================================================================================

    /// Reserves a command slot.
    ///
    /// # Errors
    /// `QueueFull` when the level has no free slot; `InvalidValue` for an unknown level or type.
    pub fn sq_mem_get(&self, device: u32, ty: SqType, qos: u8) -> DrvResult<CommandSlot> {
        self.path(device, ty)?.reserve(qos)
    }

    /// Submits the filled slot at `addr`.
    ///
    /// # Errors
    /// See [`Device::submit`](crate::drv::device::Device::submit).
    pub fn sq_msg_send(&self, device: u32, ty: SqType, addr: usize) -> DrvResult<()> {
        if addr == 0 {
            return Err(DrvError::InvalidHandle("command slot"));
        }
        self.path(device, ty)?.submit(addr)
    }

    /// Waits for the report interrupt. Reports are delivered by
    /// [`Driver::report_interrupt`], so there is nothing to wait for here.
    ///
    /// # Errors
    /// `InvalidValue` for `Logic`/`Shm`.
    pub fn cq_report_irq_wait(&self, _device: u32, ty: SqType) -> DrvResult<()> {
        match ty {
            SqType::Normal | SqType::Callback => Ok(()),
            SqType::Logic | SqType::Shm => Err(invalid_type(ty)),
        }
    }

    /// Returns the oldest completion report. Blocks in `Normal` mode until one arrives.
    ///
    /// # Errors
    /// `InvalidValue` for `Logic`/`Shm`, device lookup errors for `Normal`.
    pub fn cq_report_get(&self, device: u32, ty: SqType) -> DrvResult<Report> {
        self.path(device, ty)?.wait_report()
    }

    /// # Errors
    /// `InvalidValue` for `Logic`/`Shm`.
    pub fn report_release(&self, device: u32, ty: SqType) -> DrvResult<()> {
        self.path(device, ty)?.release_report()
    }

    // ===========================================================================================
    // Memory
    // ===========================================================================================

    /// # Errors
    /// See [`DeviceMemory::alloc`](crate::drv::memory::DeviceMemory::alloc).
    pub fn mem_alloc(&self, device: u32, size: u64) -> DrvResult<u64> {
        self.device(device)?.mem_alloc(size)
    }

    /// # Errors
    /// See [`DeviceMemory::free`](crate::drv::memory::DeviceMemory::free).
    pub fn mem_free(&self, device: u32, addr: u64) -> DrvResult<()> {
        self.device(device)?.mem_free(addr)
    }

    /// Allocates `size` bytes of memory type `ty`.
    ///
    /// `Hbm` goes to the device allocator of `device`; `Host` comes from the host heap and
    /// ignores `device`. Host blocks are released with [`Driver::host_free`].
    ///
    /// # Errors
    /// `InvalidMallocType` for `Ddr`, otherwise as [`Driver::mem_alloc`] or
    /// [`Driver::host_alloc`].
    pub fn mem_alloc_typed(&self, device: u32, size: u64, ty: MemType) -> DrvResult<u64> {
        match ty {
            MemType::Hbm => self.mem_alloc(device, size),
            MemType::Host => {
                let size = usize::try_from(size).map_err(|_| DrvError::OutOfMemory)?;
                self.host_alloc(size)
            }
            MemType::Ddr => {
                log::error!("device {device}: ddr allocation requested");
                Err(DrvError::InvalidMallocType("ddr"))
            }
        }
    }

    /// Allocates `size` bytes of host memory.
    ///
    /// # Errors
    /// See [`HostHeap::alloc`](crate::drv::memory::HostHeap::alloc).
    pub fn host_alloc(&self, size: usize) -> DrvResult<u64> {
        self.host_heap().alloc(size)
    }

    /// # Errors
    /// See [`HostHeap::free`](crate::drv::memory::HostHeap::free).
    pub fn host_free(&self, addr: u64) -> DrvResult<()> {
        self.host_heap().free(addr)
    }

    /// # Safety
    /// A `dst` outside the HBM window must be valid for `dst_max` bytes of writes.
    ///
    /// # Errors
    /// See [`DeviceMemory::memset`](crate::drv::memory::DeviceMemory::memset).
    pub unsafe fn memset_d8(
        &self,
        device: u32,
        dst: u64,
        dst_max: usize,
        value: u8,
        size: usize,
    ) -> DrvResult<()> {
        unsafe { self.device(device)?.memset(dst, dst_max, value, size) }
    }

    /// Copy direction for a pair of raw addresses.
    #[must_use]
    pub fn trans_way(&self, src: u64, dst: u64) -> CopyKind {
        self.window().classify(src, dst)
    }

    /// Copies `size` bytes, choosing the direction from where `src` and `dst` live.
    ///
    /// # Safety
    /// Host-side addresses must be valid for `size` bytes.
    ///
    /// # Errors
    /// `NotSupported` when both addresses are in the HBM window, otherwise as
    /// [`Driver::memcpy_kind`].
    pub unsafe fn memcpy(
        &self,
        device: u32,
        dst: u64,
        dst_max: usize,
        src: u64,
        size: usize,
    ) -> DrvResult<()> {
        let kind = self.trans_way(src, dst);
        unsafe { self.memcpy_kind(device, dst, dst_max, src, size, kind) }
    }

    /// Copies `size` bytes in an explicit direction.
    ///
    /// # Safety
    /// Host-side addresses must be valid for `size` bytes.
    ///
    /// # Errors
    /// See [`DeviceMemory::copy`](crate::drv::memory::DeviceMemory::copy).
    pub unsafe fn memcpy_kind(
        &self,
        device: u32,
        dst: u64,
        dst_max: usize,
        src: u64,
        size: usize,
        kind: CopyKind,
    ) -> DrvResult<()> {
        unsafe { self.device(device)?.copy(dst, dst_max, src, size, kind) }
    }

    /// # Errors
    /// Device lookup errors.
    pub fn mem_get_attribute(&self, device: u32, addr: u64) -> DrvResult<MemAttribute> {
        Ok(self.device(device)?.mem_attribute(addr))
    }

    /// Device address to physical address. The stub has no translation, so this is the
    /// identity.
    ///
    /// # Errors
    /// `InvalidValue` for a null address.
    pub fn address_translate(&self, addr: u64) -> DrvResult<u64> {
        if addr == 0 {
            return Err(DrvError::InvalidValue("address is 0".into()));
        }
        Ok(addr)
    }
}
