use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Handle shared between the SSE body and the relay so that a client
/// disconnect can be told apart from a stream that finished on its own.
#[derive(Clone, Default)]
pub struct StreamCancelHandle {
    cancelled: Arc<AtomicBool>,
    /// Set once the relay emitted its terminal frame
    completed: Arc<AtomicBool>,
}

impl StreamCancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the stream as completed normally.
    pub fn mark_completed(&self) {
        self.completed.store(true, Ordering::SeqCst);
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Signal cancellation (only if not already completed)
    pub fn cancel(&self) {
        if !self.is_completed() {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
