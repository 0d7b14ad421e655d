//! Global cap on concurrently running speech
//!
//! A counting semaphore built from `Mutex` + `Condvar`. Fire-and-forget
//! callers probe briefly and report "busy"; callers that asked to wait
//! for completion block until a slot frees up.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

struct Slots {
    available: Mutex<usize>,
    freed: Condvar,
}

/// Fixed-capacity permit pool
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    slots: Arc<Slots>,
    capacity: usize,
}

impl ConcurrencyLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Arc::new(Slots {
                available: Mutex::new(capacity),
                freed: Condvar::new(),
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held
    pub fn available(&self) -> usize {
        *self
            .slots
            .available
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Take a permit, waiting at most `probe`
    pub fn try_acquire_for(&self, probe: Duration) -> Option<Permit> {
        let deadline = Instant::now().checked_add(probe);
        let mut available = self
            .slots
            .available
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        while *available == 0 {
            let now = Instant::now();
            let remaining = match deadline {
                Some(deadline) if now < deadline => deadline - now,
                Some(_) => return None,
                None => Duration::from_secs(3600),
            };
            let (guard, _) = self
                .slots
                .freed
                .wait_timeout(available, remaining)
                .unwrap_or_else(|e| e.into_inner());
            available = guard;
        }

        *available -= 1;
        Some(self.permit())
    }

    /// Take a permit, blocking until one is free
    pub fn acquire(&self) -> Permit {
        let mut available = self
            .slots
            .available
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        while *available == 0 {
            available = self
                .slots
                .freed
                .wait(available)
                .unwrap_or_else(|e| e.into_inner());
        }
        *available -= 1;
        self.permit()
    }

    fn permit(&self) -> Permit {
        Permit {
            slots: Arc::clone(&self.slots),
            released: false,
        }
    }
}

/// One held slot; returned to the pool on `release` or drop
pub struct Permit {
    slots: Arc<Slots>,
    released: bool,
}

impl Permit {
    /// Give the slot back. Calling it again does nothing.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut available = self
            .slots
            .available
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *available += 1;
        self.slots.freed.notify_one();
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_try_acquire_until_full() {
        let limiter = ConcurrencyLimiter::new(2);
        let a = limiter.try_acquire_for(Duration::from_millis(10));
        let b = limiter.try_acquire_for(Duration::from_millis(10));
        assert!(a.is_some() && b.is_some());
        assert_eq!(limiter.available(), 0);

        let started = Instant::now();
        assert!(limiter.try_acquire_for(Duration::from_millis(10)).is_none());
        assert!(started.elapsed() < Duration::from_secs(1));

        drop(a);
        assert_eq!(limiter.available(), 1);
        assert!(limiter.try_acquire_for(Duration::from_millis(10)).is_some());
    }

    #[test]
    fn test_release_is_idempotent() {
        let limiter = ConcurrencyLimiter::new(1);
        let mut permit = limiter.acquire();
        permit.release();
        permit.release();
        drop(permit);
        assert_eq!(limiter.available(), 1);
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let limiter = ConcurrencyLimiter::new(1);
        let held = limiter.acquire();

        let waiter = {
            let limiter = limiter.clone();
            thread::spawn(move || {
                let started = Instant::now();
                let _permit = limiter.acquire();
                started.elapsed()
            })
        };

        thread::sleep(Duration::from_millis(150));
        drop(held);
        let waited = waiter.join().unwrap();
        assert!(waited >= Duration::from_millis(100));
        assert_eq!(limiter.available(), 1);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let limiter = ConcurrencyLimiter::new(0);
        assert_eq!(limiter.capacity(), 1);
        assert!(limiter.try_acquire_for(Duration::ZERO).is_some());
    }
}
