//! A struct of atomic counters, owned by the engine rather than published
//! to a global registry. The teacher's `ckb-metrics` wires a process-wide
//! `metrics` facade with a pull exporter; this crate keeps the same
//! "counters are cheap, reads are a snapshot" shape but scopes it to a
//! single `Engine` instance, since nothing here runs across processes.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters tracked across the three SE tiers. Each field corresponds to
/// one of the events §8's scenarios assert on.
#[derive(Default)]
pub struct Metrics {
    pub streams_configured: AtomicU64,
    pub streams_ended: AtomicU64,
    pub elements_allocated: AtomicU64,
    pub elements_issued: AtomicU64,
    pub elements_released: AtomicU64,
    pub slices_emitted: AtomicU64,
    pub migrations: AtomicU64,
    pub throttle_events: AtomicU64,
    pub faults: AtomicU64,
    pub protocol_violations: AtomicU64,
}

/// A point-in-time, non-atomic copy of [`Metrics`], cheap to assert on in
/// tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub streams_configured: u64,
    pub streams_ended: u64,
    pub elements_allocated: u64,
    pub elements_issued: u64,
    pub elements_released: u64,
    pub slices_emitted: u64,
    pub migrations: u64,
    pub throttle_events: u64,
    pub faults: u64,
    pub protocol_violations: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            streams_configured: self.streams_configured.load(Ordering::Relaxed),
            streams_ended: self.streams_ended.load(Ordering::Relaxed),
            elements_allocated: self.elements_allocated.load(Ordering::Relaxed),
            elements_issued: self.elements_issued.load(Ordering::Relaxed),
            elements_released: self.elements_released.load(Ordering::Relaxed),
            slices_emitted: self.slices_emitted.load(Ordering::Relaxed),
            migrations: self.migrations.load(Ordering::Relaxed),
            throttle_events: self.throttle_events.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            protocol_violations: self.protocol_violations.load(Ordering::Relaxed),
        }
    }
}
