use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Minimal counters for operational visibility.
#[derive(Clone, Default, Debug)]
pub struct Counters {
    // admission
    pub reserve_granted: Arc<AtomicU64>,
    pub reserve_waitlisted: Arc<AtomicU64>,

    // cancellation / waitlist
    pub cancel_applied: Arc<AtomicU64>,
    pub cancel_repeated: Arc<AtomicU64>,
    pub promoted: Arc<AtomicU64>,
    pub promote_none_waiting: Arc<AtomicU64>,

    // pipeline
    pub relayed: Arc<AtomicU64>,
    pub finalized: Arc<AtomicU64>,
    pub redelivered: Arc<AtomicU64>,
    pub dead_lettered: Arc<AtomicU64>,
    pub notify_failed: Arc<AtomicU64>,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
