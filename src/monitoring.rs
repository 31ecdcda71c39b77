//! In this module, we implement all the monitoring logic for the sensor.
//! The counters are bumped from the capture thread, the pipeline and the transport,
//! and are read back as a summary when the session closes.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Counters {
    frames_captured: AtomicU64,
    capture_stalls: AtomicU64,
    frames_processed: AtomicU64,
    measurements: AtomicU64,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

/// A point-in-time copy of the counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_captured: u64,
    pub capture_stalls: u64,
    pub frames_processed: u64,
    pub measurements: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
}

impl Counters {
    pub fn captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the stall count including this one
    pub fn stalled(&self) -> u64 {
        self.capture_stalls.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn processed(&self) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn measured(&self) {
        self.measurements.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the drop count including this one
    pub fn dropped(&self) -> u64 {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            capture_stalls: self.capture_stalls.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            measurements: self.measurements.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }
}
