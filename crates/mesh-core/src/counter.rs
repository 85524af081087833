use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Successful-request counter shared between every in-flight send and the
/// statistics aggregator. Monotonic for the process lifetime.
#[derive(Debug, Clone, Default)]
pub struct RequestCounter {
    sent: Arc<AtomicU64>,
}

impl RequestCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one success and return the new total.
    pub fn increment(&self) -> u64 {
        self.sent.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

/// Source of request ids, owned by the dispatcher. Ids start at 1.
#[derive(Debug, Default)]
pub struct RequestIds {
    last: u64,
}

impl RequestIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> u64 {
        self.last += 1;
        self.last
    }

    pub fn issued(&self) -> u64 {
        self.last
    }
}
