//! In-process pipeline counters. Exposition is someone else's job; the
//! pipeline only increments.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    pub lines_received: AtomicU64,
    pub parse_unsupported: AtomicU64,
    pub parse_malformed: AtomicU64,
    pub unknown_sources: AtomicU64,
    pub beacons_accepted: AtomicU64,
    pub events_processed: AtomicU64,
    pub events_dead_lettered: AtomicU64,
    /// Total nanoseconds ingress spent blocked on a full queue.
    pub queue_wait_nanos: AtomicU64,
    pub rcon_queue_drops: AtomicU64,
    pub notifications_sent: AtomicU64,
    pub notifications_failed: AtomicU64,
}

impl Metrics {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
