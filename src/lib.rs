//! In-process stand-in for an AI-accelerator device driver.
//!
//! The stub hands out resource ids, simulates device HBM with a first-fit allocator, moves
//! task descriptors to a task scheduler through per-priority command queues with credit flow
//! control, and moves completion reports back to waiting threads.

pub mod config;
pub mod drv;
pub mod error;
pub mod slots;
pub mod ts;
pub mod utils;

pub use config::{CreditPolicy, StubConfig};
pub use drv::{Device, Driver, SqType};
pub use error::{DrvError, DrvResult, ErrorKind};
