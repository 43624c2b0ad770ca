//! Process-wide pipeline counters.
//! Read with [`snapshot`]; the `watch` command prints them on shutdown.
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

static FRAMES_RECEIVED: AtomicU64 = AtomicU64::new(0);
static FRAMES_REJECTED: AtomicU64 = AtomicU64::new(0);
static SEGMENTS_DISCARDED: AtomicU64 = AtomicU64::new(0);
static EVENTS_EMITTED: AtomicU64 = AtomicU64::new(0);
static BYTES_RECEIVED: AtomicU64 = AtomicU64::new(0);
static SINK_FAILURES: AtomicU64 = AtomicU64::new(0);

pub fn inc_frames_received() {
    FRAMES_RECEIVED.fetch_add(1, Ordering::Relaxed);
}

/// Frame replaced by the baseline (missing, or no start marker).
pub fn inc_frames_rejected() {
    FRAMES_REJECTED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_segments_discarded() {
    SEGMENTS_DISCARDED.fetch_add(1, Ordering::Relaxed);
}

pub fn add_events_emitted(n: usize) {
    EVENTS_EMITTED.fetch_add(n as u64, Ordering::Relaxed);
}

pub fn add_bytes_received(n: usize) {
    BYTES_RECEIVED.fetch_add(n as u64, Ordering::Relaxed);
}

pub fn inc_sink_failures() {
    SINK_FAILURES.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub frames_received: u64,
    pub frames_rejected: u64,
    pub segments_discarded: u64,
    pub events_emitted: u64,
    pub bytes_received: u64,
    pub sink_failures: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        frames_received: FRAMES_RECEIVED.load(Ordering::Relaxed),
        frames_rejected: FRAMES_REJECTED.load(Ordering::Relaxed),
        segments_discarded: SEGMENTS_DISCARDED.load(Ordering::Relaxed),
        events_emitted: EVENTS_EMITTED.load(Ordering::Relaxed),
        bytes_received: BYTES_RECEIVED.load(Ordering::Relaxed),
        sink_failures: SINK_FAILURES.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Counters are global and other tests bump them concurrently,
    // so only lower bounds can be checked.
    #[test]
    fn counters_accumulate() {
        let before = snapshot();
        inc_frames_received();
        inc_segments_discarded();
        add_events_emitted(3);
        add_bytes_received(20);
        let after = snapshot();
        assert!(after.frames_received >= before.frames_received + 1);
        assert!(after.segments_discarded >= before.segments_discarded + 1);
        assert!(after.events_emitted >= before.events_emitted + 3);
        assert!(after.bytes_received >= before.bytes_received + 20);
    }
}
