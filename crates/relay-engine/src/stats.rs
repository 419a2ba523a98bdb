use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters of one engine. Written only by the engine thread, readable from
/// anywhere.
#[derive(Debug, Default)]
pub struct EngineStats {
    accepted: AtomicU64,
    established: AtomicU64,
    closed: AtomicU64,
    idle_reaped: AtomicU64,
    connect_failures: AtomicU64,
    inconsistencies: AtomicU64,
    bytes_upstream: AtomicU64,
    bytes_downstream: AtomicU64,
    active: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub established: u64,
    pub closed: u64,
    pub idle_reaped: u64,
    pub connect_failures: u64,
    pub inconsistencies: u64,
    pub bytes_upstream: u64,
    pub bytes_downstream: u64,
    pub active: u64,
}

impl EngineStats {
    pub(crate) fn session_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_established(&self) {
        self.established.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_closed(&self, upstream: u64, downstream: u64) {
        self.closed.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.bytes_upstream.fetch_add(upstream, Ordering::Relaxed);
        self.bytes_downstream.fetch_add(downstream, Ordering::Relaxed);
    }

    pub(crate) fn idle_reaped(&self, count: usize) {
        self.idle_reaped.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn connect_failed(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inconsistency(&self) {
        self.inconsistencies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            established: self.established.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            idle_reaped: self.idle_reaped.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            inconsistencies: self.inconsistencies.load(Ordering::Relaxed),
            bytes_upstream: self.bytes_upstream.load(Ordering::Relaxed),
            bytes_downstream: self.bytes_downstream.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_tracks_open_sessions() {
        let stats = EngineStats::default();
        stats.session_accepted();
        stats.session_accepted();
        stats.session_closed(5, 7);

        let snap = stats.snapshot();
        assert_eq!(snap.accepted, 2);
        assert_eq!(snap.closed, 1);
        assert_eq!(snap.active, 1);
        assert_eq!(snap.bytes_upstream, 5);
        assert_eq!(snap.bytes_downstream, 7);
    }
}
