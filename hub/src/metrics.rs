//! Counters for the policy decisions that silently shed work: slow
//! subscribers cut off, replication records dropped or rejected.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct HubMetrics {
    rooms_started: AtomicU64,
    subscribers_dropped: AtomicU64,
    replicas_dropped: AtomicU64,
    records_dropped: AtomicU64,
    records_applied: AtomicU64,
    records_rejected: AtomicU64,
}

/// Point-in-time copy of [`HubMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub rooms_started: u64,
    pub subscribers_dropped: u64,
    pub replicas_dropped: u64,
    pub records_dropped: u64,
    pub records_applied: u64,
    pub records_rejected: u64,
}

impl HubMetrics {
    pub fn room_started(&self) {
        self.rooms_started.fetch_add(1, Ordering::Relaxed);
    }

    /// A chat subscriber was cut off because its queue was full.
    pub fn subscriber_dropped(&self) {
        self.subscribers_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// A replica link was cut off because its queue was full.
    pub fn replica_dropped(&self) {
        self.replicas_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// A record never reached the backup hub.
    pub fn record_dropped(&self) {
        self.records_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_applied(&self) {
        self.records_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// An incoming replication frame could not be decoded.
    pub fn record_rejected(&self) {
        self.records_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rooms_started: self.rooms_started.load(Ordering::Relaxed),
            subscribers_dropped: self.subscribers_dropped.load(Ordering::Relaxed),
            replicas_dropped: self.replicas_dropped.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            records_applied: self.records_applied.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
        }
    }
}
