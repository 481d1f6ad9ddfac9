//! The driver stub proper: per-device state, the device registry and the entry points.

pub mod api;
pub mod context;
pub mod device;
pub mod memory;
pub mod queues;
pub mod resource;
pub mod semaphore;

pub use api::{ResourceIdType, SqCqPair, UNTRACKED_RESOURCE_ID};
pub use context::{Driver, acquire, acquire_with_sim, install, release};
pub use device::Device;
pub use memory::{CopyKind, DeviceMemory, HostHeap, MemAttribute, MemLocation, MemType};
pub use queues::{CallbackPath, CommandSlot, Report, SqType, SubmitPath};
pub use resource::{ResourceIds, ResourceKind};
pub use semaphore::Semaphore;
