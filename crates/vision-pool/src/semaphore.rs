//! Blocking counting semaphore with a ceiling.
//!
//! Mirrors an RTOS counting semaphore: `give` is safe to call from interrupt
//! context (it never waits for the count) and saturates at `max`, `take`
//! blocks the calling thread until the count is positive.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Counting semaphore bounded by `max`.
#[derive(Debug)]
pub struct CountingSemaphore {
    count: Mutex<usize>,
    available: Condvar,
    max: usize,
}

impl CountingSemaphore {
    /// Creates a semaphore holding `initial` (clamped to `max`) permits.
    pub fn new(initial: usize, max: usize) -> Self {
        Self {
            count: Mutex::new(initial.min(max)),
            available: Condvar::new(),
            max,
        }
    }

    /// Adds one permit. Returns `false` and leaves the count unchanged when it
    /// is already at `max`.
    pub fn give(&self) -> bool {
        let mut count = self.count.lock();
        if *count >= self.max {
            return false;
        }
        *count += 1;
        drop(count);
        self.available.notify_one();
        true
    }

    /// Takes one permit, waiting indefinitely for it.
    pub fn take(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.available.wait(&mut count);
        }
        *count -= 1;
    }

    /// Takes one permit if one is available right now.
    #[must_use]
    pub fn try_take(&self) -> bool {
        let mut count = self.count.lock();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Takes one permit, giving up after `timeout`.
    #[must_use]
    pub fn take_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count == 0 {
            if self.available.wait_until(&mut count, deadline).timed_out() && *count == 0 {
                return false;
            }
        }
        *count -= 1;
        true
    }

    /// Current number of permits.
    #[must_use]
    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Ceiling on the number of permits.
    #[must_use]
    pub fn max(&self) -> usize {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn give_saturates_at_max() {
        let sem = CountingSemaphore::new(0, 1);
        assert!(sem.give());
        assert!(!sem.give());
        assert!(!sem.give());
        assert_eq!(sem.count(), 1);

        assert!(sem.try_take());
        assert!(!sem.try_take());
    }

    #[test]
    fn initial_count_is_clamped() {
        let sem = CountingSemaphore::new(5, 2);
        assert_eq!(sem.count(), 2);
        assert_eq!(sem.max(), 2);
    }

    #[test]
    fn take_blocks_until_give() {
        let sem = Arc::new(CountingSemaphore::new(0, 1));
        let waiter = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || {
                sem.take();
                true
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        assert!(sem.give());
        assert!(waiter.join().unwrap());
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn take_timeout_expires() {
        let sem = CountingSemaphore::new(0, 1);
        assert!(!sem.take_timeout(Duration::from_millis(10)));

        sem.give();
        assert!(sem.take_timeout(Duration::from_millis(10)));
    }
}
