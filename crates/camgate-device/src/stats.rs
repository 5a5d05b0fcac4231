//! Lock-free per-camera counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters shared between the capture loop, the recording worker
/// and the stream server.  All updates are relaxed; the counters are
/// diagnostics, not synchronization.
#[derive(Debug, Default)]
pub struct CaptureStats {
    /// Frames read from the capture device.
    pub captured: AtomicU64,
    /// Frames encoded and sent to stream clients.
    pub streamed: AtomicU64,
    /// Frames written to the recording sink.
    pub written: AtomicU64,
    /// Frames dropped because the recording queue was full.
    pub dropped: AtomicU64,
    /// Sink write failures.
    pub write_errors: AtomicU64,
    /// Recording stops where the worker outlived the join timeout.
    pub finalize_overruns: AtomicU64,
}

/// Point-in-time copy of [`CaptureStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub captured: u64,
    pub streamed: u64,
    pub written: u64,
    pub dropped: u64,
    pub write_errors: u64,
    pub finalize_overruns: u64,
}

impl CaptureStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            captured: self.captured.load(Ordering::Relaxed),
            streamed: self.streamed.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            finalize_overruns: self.finalize_overruns.load(Ordering::Relaxed),
        }
    }
}
