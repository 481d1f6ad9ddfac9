use super::{CommandSlot, Report, SubmitPath};
use crate::error::DrvResult;
use crate::slots::SlotBuffer;
use crate::ts::COMMAND_SLOT_SIZE;
use std::sync::Arc;

/// Submission path that never queues anything.
///
/// Every reservation returns the same scratch slot, submission is a no-op and every wait
/// returns the same scratch report immediately. Meant for in-process runs with no task
/// scheduler behind the driver.
#[derive(Debug)]
pub struct CallbackPath {
    scratch: Arc<SlotBuffer>,
    report: Report,
}

impl Default for CallbackPath {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackPath {
    #[must_use]
    pub fn new() -> Self {
        Self::with_report(Report::default())
    }

    /// Uses `report` as the answer to every wait.
    #[must_use]
    pub fn with_report(report: Report) -> Self {
        Self {
            scratch: Arc::new(SlotBuffer::new(1, COMMAND_SLOT_SIZE)),
            report,
        }
    }

    /// Address of the shared scratch slot.
    #[must_use]
    pub fn scratch_addr(&self) -> usize {
        self.scratch.base_addr()
    }
}

impl SubmitPath for CallbackPath {
    fn reserve(&self, qos: u8) -> DrvResult<CommandSlot> {
        Ok(CommandSlot::new(Arc::clone(&self.scratch), 0, qos))
    }

    fn submit(&self, addr: usize) -> DrvResult<()> {
        log::debug!("callback path: submit 0x{addr:x} ignored");
        Ok(())
    }

    fn wait_report(&self) -> DrvResult<Report> {
        Ok(self.report)
    }

    fn release_report(&self) -> DrvResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hands_out_one_shared_slot() {
        let path = CallbackPath::new();
        let a = path.reserve(0).unwrap();
        let b = path.reserve(3).unwrap();
        assert_eq!(a.addr(), b.addr());
        assert_eq!(a.addr(), path.scratch_addr());
        assert_eq!(b.qos(), 3);
        path.submit(a.addr()).unwrap();
        path.submit(0).unwrap();
    }

    #[test]
    fn wait_returns_scratch_report_without_blocking() {
        let mut raw = [0u8; 16];
        raw[0] = 0x42;
        let path = CallbackPath::with_report(Report(raw));
        assert_eq!(path.wait_report().unwrap().as_bytes()[0], 0x42);
        assert_eq!(path.wait_report().unwrap(), Report(raw));
        path.release_report().unwrap();
    }
}
