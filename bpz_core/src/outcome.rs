use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::BpzError;

/// Cancellation flag and error collector shared by every task of one
/// `Engine::process` call.
#[derive(Debug, Default)]
pub struct Outcome {
    cancelled: AtomicBool,
    errors: Mutex<Vec<BpzError>>,
}

impl Outcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure and request cancellation.
    ///
    /// The flag flips once; every call still appends its error.
    pub fn set_failed(&self, error: BpzError) {
        self.cancelled.store(true, Ordering::Release);
        self.errors.lock().push(error);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Snapshot of the errors collected so far.
    pub fn error_count(&self) -> usize {
        self.errors.lock().len()
    }

    /// Take every collected error, leaving the list empty.
    pub fn take_errors(&self) -> Vec<BpzError> {
        std::mem::take(&mut *self.errors.lock())
    }
}
