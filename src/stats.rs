//! Per-machine allocation and collection counters (§3 `stats`)
//!
//! Plain atomics rather than a mutex-guarded struct: every field here is
//! written only by the owning machine's thread and read opportunistically
//! by the diagnostics dump, the same split this crate's ancestor uses for
//! its cross-thread memory-stats registry (single-writer counters, `Relaxed`
//! reads from elsewhere).

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Stats {
    bytes_allocated: AtomicU64,
    collections: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
}

impl Stats {
    pub fn new() -> Stats {
        Stats::default()
    }

    pub fn record_allocation(&self, bytes: u64) {
        self.bytes_allocated.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_collection(&self) {
        self.collections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_receive(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_allocated(&self) -> u64 {
        self.bytes_allocated.load(Ordering::Relaxed)
    }

    pub fn collections(&self) -> u64 {
        self.collections.load(Ordering::Relaxed)
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Snapshot returned from `terminate` (§6 Machine control).
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_allocated: self.bytes_allocated(),
            collections: self.collections(),
            messages_sent: self.messages_sent(),
            messages_received: self.messages_received(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct StatsSnapshot {
    pub bytes_allocated: u64,
    pub collections: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let s = Stats::new();
        assert_eq!(s.bytes_allocated(), 0);
        assert_eq!(s.collections(), 0);
    }

    #[test]
    fn counters_accumulate() {
        let s = Stats::new();
        s.record_allocation(16);
        s.record_allocation(8);
        s.record_collection();
        s.record_send();
        s.record_receive();
        let snap = s.snapshot();
        assert_eq!(snap.bytes_allocated, 24);
        assert_eq!(snap.collections, 1);
        assert_eq!(snap.messages_sent, 1);
        assert_eq!(snap.messages_received, 1);
    }
}
