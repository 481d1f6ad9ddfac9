use crate::drv::semaphore::Semaphore;
use crate::error::{DrvError, DrvResult};
use crate::ts::{REPORT_SLOT_SIZE, SlotRing};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// One completion report as produced by the task scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Report(pub [u8; REPORT_SLOT_SIZE]);

impl Report {
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; REPORT_SLOT_SIZE] {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Idle,
    Draining,
}

/// Device-visible report ring, filled from the task scheduler's report ring on interrupt.
///
/// `lock` is held for every single move and every dequeue. Each stored report is matched by
/// one semaphore permit. Interrupt handlers may overlap; the queue reads as draining until
/// the last of them returns.
#[derive(Debug)]
pub struct ReportQueue {
    ring: SlotRing,
    lock: Mutex<()>,
    available: Semaphore,
    draining: AtomicU32,
}

/// Marks one interrupt handler as running for as long as it lives.
struct DrainGuard<'a>(&'a AtomicU32);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ReportQueue {
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        Self {
            ring: SlotRing::new(capacity, REPORT_SLOT_SIZE),
            lock: Mutex::new(()),
            available: Semaphore::new(0),
            draining: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn state(&self) -> DrainState {
        if self.draining.load(Ordering::Acquire) > 0 {
            DrainState::Draining
        } else {
            DrainState::Idle
        }
    }

    /// Reports stored and not yet taken by a consumer.
    #[must_use]
    pub fn pending(&self) -> u32 {
        self.ring.len()
    }

    /// Copies one report from `src` into this queue and wakes one consumer.
    ///
    /// # Errors
    /// `NotFound` if `src` is empty, `Inner` if this queue is full.
    pub fn move_one(&self, src: &SlotRing) -> DrvResult<()> {
        {
            let _guard = self.lock.lock();
            if src.is_empty() {
                return Err(DrvError::NotFound("task scheduler report ring is empty".into()));
            }
            if self.ring.is_full() {
                return Err(DrvError::Inner("report queue is full".into()));
            }
            let mut report = [0u8; REPORT_SLOT_SIZE];
            src.pop(&mut report)?;
            self.ring.push(&report)?;
        }
        self.available.post();
        Ok(())
    }

    /// Report-ready interrupt handler. Moves reports until `src` is empty or this queue is full.
    ///
    /// Returns the number of reports moved.
    fn begin_drain(&self) -> DrainGuard<'_> {
        self.draining.fetch_add(1, Ordering::AcqRel);
        DrainGuard(&self.draining)
    }

    pub fn on_interrupt(&self, src: &SlotRing) -> usize {
        let _drain = self.begin_drain();
        let mut moved = 0;
        while !self.ring.is_full() {
            match self.move_one(src) {
                Ok(()) => moved += 1,
                Err(e) => {
                    log::debug!("report drain stopped after {moved}: {e}");
                    break;
                }
            }
        }
        moved
    }

    /// Blocks until a report is available and dequeues the oldest one.
    ///
    /// # Errors
    /// `Inner` if a permit was taken but the ring was empty.
    pub fn wait(&self) -> DrvResult<Report> {
        self.available.wait();
        let _guard = self.lock.lock();
        let mut report = Report::default();
        self.ring.pop(&mut report.0).map_err(|e| {
            log::error!("report queue out of sync with its semaphore: {e}");
            DrvError::Inner("report queue out of sync".into())
        })?;
        Ok(report)
    }

    /// Dequeues the oldest report without blocking.
    #[must_use]
    pub fn try_wait(&self) -> Option<Report> {
        if !self.available.try_wait() {
            return None;
        }
        let _guard = self.lock.lock();
        let mut report = Report::default();
        self.ring.pop(&mut report.0).ok()?;
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn report(tag: u8) -> [u8; REPORT_SLOT_SIZE] {
        [tag; REPORT_SLOT_SIZE]
    }

    #[test]
    fn move_reports_errors_at_both_ends() {
        let src = SlotRing::new(8, REPORT_SLOT_SIZE);
        let q = ReportQueue::new(2);
        assert!(matches!(q.move_one(&src), Err(DrvError::NotFound(_))));
        src.push(&report(1)).unwrap();
        src.push(&report(2)).unwrap();
        q.move_one(&src).unwrap();
        assert!(matches!(q.move_one(&src), Err(DrvError::Inner(_))));
        assert_eq!(src.len(), 1);
    }

    #[test]
    fn interrupt_delivers_in_fifo_order() {
        let src = SlotRing::new(16, REPORT_SLOT_SIZE);
        let q = ReportQueue::new(16);
        for tag in 0..5 {
            src.push(&report(tag)).unwrap();
        }
        assert_eq!(q.on_interrupt(&src), 5);
        assert_eq!(q.state(), DrainState::Idle);
        assert_eq!(q.pending(), 5);
        for tag in 0..5 {
            assert_eq!(q.wait().unwrap(), Report(report(tag)));
        }
        assert_eq!(q.try_wait(), None);
    }

    #[test]
    fn interrupt_stops_when_queue_is_full() {
        let src = SlotRing::new(16, REPORT_SLOT_SIZE);
        let q = ReportQueue::new(4);
        for tag in 0..6 {
            src.push(&report(tag)).unwrap();
        }
        assert_eq!(q.on_interrupt(&src), 3);
        assert_eq!(src.len(), 3);
        assert_eq!(q.try_wait(), Some(Report(report(0))));
        assert_eq!(q.on_interrupt(&src), 1);
    }

    #[test]
    fn overlapping_interrupts_keep_draining_state() {
        let src = SlotRing::new(8, REPORT_SLOT_SIZE);
        let q = ReportQueue::new(8);
        src.push(&report(1)).unwrap();

        let outer = q.begin_drain();
        assert_eq!(q.state(), DrainState::Draining);
        // A second handler finishing first must not flip the queue to idle.
        assert_eq!(q.on_interrupt(&src), 1);
        assert_eq!(q.state(), DrainState::Draining);
        drop(outer);
        assert_eq!(q.state(), DrainState::Idle);
    }

    #[test]
    fn concurrent_interrupts_move_every_report_once() {
        let src = Arc::new(SlotRing::new(64, REPORT_SLOT_SIZE));
        let q = Arc::new(ReportQueue::new(64));
        for tag in 0..40 {
            src.push(&report(tag)).unwrap();
        }
        let handlers: Vec<_> = (0..4)
            .map(|_| {
                let (src, q) = (Arc::clone(&src), Arc::clone(&q));
                thread::spawn(move || q.on_interrupt(&src))
            })
            .collect();
        let moved: usize = handlers.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(moved, 40);
        assert_eq!(q.state(), DrainState::Idle);
        for tag in 0..40 {
            assert_eq!(q.wait().unwrap(), Report(report(tag)));
        }
    }

    #[test]
    fn wait_blocks_until_next_move() {
        let src = Arc::new(SlotRing::new(8, REPORT_SLOT_SIZE));
        let q = Arc::new(ReportQueue::new(8));
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.wait().unwrap())
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!consumer.is_finished());

        src.push(&report(9)).unwrap();
        assert_eq!(q.on_interrupt(&src), 1);
        assert_eq!(consumer.join().unwrap(), Report(report(9)));
    }
}
