use parking_lot::{Condvar, Mutex};

/// Counting semaphore used to hand completion reports to waiting consumers.
///
/// `wait` has no timeout and cannot be cancelled.
#[derive(Debug, Default)]
pub struct Semaphore {
    count: Mutex<u64>,
    available: Condvar,
}

impl Semaphore {
    #[must_use]
    pub const fn new(initial: u64) -> Self {
        Self {
            count: parking_lot::const_mutex(initial),
            available: Condvar::new(),
        }
    }

    /// Adds one permit and wakes a single waiter.
    pub fn post(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.available.notify_one();
    }

    /// Blocks until a permit is available, then takes it.
    pub fn wait(&self) {
        let mut count = self.count.lock();
        self.available.wait_while(&mut count, |c| *c == 0);
        *count -= 1;
    }

    /// Takes a permit if one is available.
    pub fn try_wait(&self) -> bool {
        let mut count = self.count.lock();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        *self.count.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn permits_are_counted() {
        let sem = Semaphore::new(0);
        assert!(!sem.try_wait());
        sem.post();
        sem.post();
        assert_eq!(sem.count(), 2);
        sem.wait();
        assert!(sem.try_wait());
        assert!(!sem.try_wait());
    }

    #[test]
    fn wait_blocks_until_post() {
        let sem = Arc::new(Semaphore::new(0));
        let waiter = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || sem.wait())
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        sem.post();
        waiter.join().unwrap();
        assert_eq!(sem.count(), 0);
    }
}
