//! # Statistics
//!
//! Counter snapshots for the scheduler and shaper, serializable for
//! telemetry export.

use serde::Serialize;

// ─── Scheduler ──────────────────────────────────────────────────────────────

/// Scheduler-side counters, owned by the tick thread.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    /// Ticks fired since startup.
    pub ticks: u64,
    /// Current frame counter (`slot_count / slots_per_frame`).
    pub frames: u64,
    /// Station grants pushed to the radio interface.
    pub stations_pushed: u64,
    /// Configuration updates applied.
    pub updates_applied: u64,
    /// Configuration updates rejected with a negative ack.
    pub updates_rejected: u64,
    /// Last reported mean tick interval, µs. Zero until the first precision
    /// window completes.
    pub observed_interval_us: f64,
}

// ─── Shaper ─────────────────────────────────────────────────────────────────

/// Shaper-side counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShaperStats {
    /// Packets handed to the shaper.
    pub received: u64,
    /// Packets forwarded (immediately or from the deferral queue).
    pub sent: u64,
    /// Packets deferred into the queue.
    pub shaped: u64,
    /// Packets dropped because the queue was full.
    pub dropped: u64,
    /// Packets dropped by the residency policy.
    pub expired: u64,
    /// Retry-timer re-arms while the head packet stayed out of profile.
    pub retries: u64,
}

impl ShaperStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of received packets dropped for any reason.
    pub fn drop_rate(&self) -> f64 {
        if self.received == 0 {
            0.0
        } else {
            (self.dropped + self.expired) as f64 / self.received as f64
        }
    }

    /// Fraction of received packets that took the deferral path.
    pub fn deferral_rate(&self) -> f64 {
        if self.received == 0 {
            0.0
        } else {
            self.shaped as f64 / self.received as f64
        }
    }
}
