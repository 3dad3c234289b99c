use std::sync::Arc;

use crossbeam::atomic::AtomicCell;

/// A flag shared between the owner of some background work and the work itself.
///
/// Cloning yields a handle to the same flag. Once cancelled, it stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    cancelled: Arc<AtomicCell<bool>>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load()
    }

    /// Whether both handles share the same flag
    pub fn is_same(&self, other: &Cancellation) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}
