use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Counting permit pool bounding the number of blocks in flight.
///
/// The producer acquires one permit per block before handing it to the
/// worker pool. Once every permit is out, `acquire` blocks, which caps the
/// number of buffered blocks independently of the worker count.
#[derive(Debug)]
pub struct Gate {
    capacity: usize,
    available: Mutex<usize>,
    freed: Condvar,
}

impl Gate {
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        Arc::new(Self {
            capacity,
            available: Mutex::new(capacity),
            freed: Condvar::new(),
        })
    }

    /// Block until a permit is free and take it.
    pub fn acquire(self: &Arc<Self>) -> Permit {
        let mut available = self.available.lock();
        while *available == 0 {
            self.freed.wait(&mut available);
        }
        *available -= 1;
        Permit {
            gate: Arc::clone(self),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        *self.available.lock()
    }

    fn release(&self) {
        let mut available = self.available.lock();
        debug_assert!(*available < self.capacity, "permit released twice");
        *available += 1;
        self.freed.notify_one();
    }
}

/// A held gate permit. Returned to the gate when dropped, whatever path the
/// holder leaves by.
#[derive(Debug)]
pub struct Permit {
    gate: Arc<Gate>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.gate.release();
    }
}
