//! # Frame Clock
//!
//! Slot timing for the scheduler tick loop. The clock keeps a monotonic slot
//! counter, derives the frame counter and the in-frame slot index, and
//! computes the next re-arm interval with a drift correction so the slot grid
//! does not wander under timer jitter.
//!
//! Pure logic: the caller reads the monotonic clock, invokes [`FrameClock::on_tick`],
//! and arms its own one-shot timer with the returned interval.

use quanta::Instant;
use std::time::Duration;

// ─── Configuration ──────────────────────────────────────────────────────────

/// Frame clock parameters.
#[derive(Debug, Clone)]
pub struct ClockConfig {
    /// Length of one slot.
    pub slot_duration: Duration,
    /// Slots per frame.
    pub slots_per_frame: usize,
    /// Multiplier applied to the measured fire-time error when correcting the
    /// next interval. The inherited constant is 2 (over-corrects, critically
    /// damped in practice); tunable, not load-bearing.
    pub drift_gain: u32,
    /// Number of fire timestamps collected before reporting the observed
    /// average slot interval.
    pub precision_window: usize,
}

impl Default for ClockConfig {
    fn default() -> Self {
        ClockConfig {
            slot_duration: Duration::from_micros(10_000),
            slots_per_frame: 10,
            drift_gain: 2,
            precision_window: 1000,
        }
    }
}

// ─── Tick result ────────────────────────────────────────────────────────────

/// The outcome of one clock tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    /// Total slots elapsed since the clock anchored (starts at 0).
    pub slot_count: u64,
    /// `slot_count / slots_per_frame`.
    pub frame_count: u64,
    /// `slot_count % slots_per_frame`; index into the slot table.
    pub slot_index: usize,
    /// Drift-corrected interval to arm the one-shot timer with.
    pub next_interval: Duration,
    /// Observed mean inter-fire gap in µs, reported once per full precision
    /// window. Diagnostic only; never feeds back into the interval.
    pub observed_interval_us: Option<f64>,
}

// ─── Frame clock ────────────────────────────────────────────────────────────

/// Slot/frame accounting with jitter-corrected re-arm intervals.
pub struct FrameClock {
    config: ClockConfig,
    /// Reference point all tick times are measured against.
    origin: Instant,
    /// The ideal fire time of the current slot, µs from `origin`. `None`
    /// until the first tick anchors the grid.
    anchor_us: Option<u64>,
    slot_count: u64,
    /// Actual fire time of the previous tick, µs from `origin`.
    prev_fire_us: Option<u64>,
    sampler: IntervalSampler,
}

impl FrameClock {
    /// Create an unanchored clock. `origin` must not be later than any tick
    /// time passed to [`on_tick`](Self::on_tick).
    pub fn new(config: ClockConfig, origin: Instant) -> Self {
        let window = config.precision_window;
        FrameClock {
            config,
            origin,
            anchor_us: None,
            slot_count: 0,
            prev_fire_us: None,
            sampler: IntervalSampler::new(window),
        }
    }

    /// Slots per frame this clock was configured with.
    pub fn slots_per_frame(&self) -> usize {
        self.config.slots_per_frame
    }

    /// Advance the clock by one tick fired at `now`.
    ///
    /// The first tick anchors the slot grid to `now` truncated to a
    /// slot-duration boundary. Every later tick advances the anchor by the
    /// sub-second remainder of the slot duration (the timer interval itself
    /// carries the whole seconds) and increments the slot counter.
    pub fn on_tick(&mut self, now: Instant) -> Tick {
        let slot_us = self.config.slot_duration.as_micros() as u64;
        let now_us = now.duration_since(self.origin).as_micros() as u64;

        let anchor = match self.anchor_us {
            None => {
                self.slot_count = 0;
                (now_us / slot_us) * slot_us
            }
            Some(a) => {
                self.slot_count += 1;
                a + slot_us % 1_000_000
            }
        };
        self.anchor_us = Some(anchor);

        let frame_count = self.slot_count / self.config.slots_per_frame as u64;
        let slot_index = (self.slot_count % self.config.slots_per_frame as u64) as usize;

        // No correction on the very first re-arm; after that, subtract the
        // amplified fire-time error from the nominal interval. A late fire
        // shortens the next interval, an early fire stretches it.
        let error_us: i64 = if self.prev_fire_us.is_some() {
            self.config.drift_gain as i64 * (now_us as i64 - anchor as i64)
        } else {
            0
        };
        let next_us = (slot_us as i64 - error_us).max(0);
        self.prev_fire_us = Some(now_us);

        Tick {
            slot_count: self.slot_count,
            frame_count,
            slot_index,
            next_interval: Duration::from_micros(next_us as u64),
            observed_interval_us: self.sampler.record(now_us),
        }
    }
}

/// Delay from process start to the first tick: the second-next whole-second
/// boundary, given the current sub-second offset in µs. Aligning the grid to
/// a second boundary lets multiple nodes share a frame epoch.
pub fn initial_alignment_delay(subsec_micros: u64) -> Duration {
    Duration::from_micros(1_000_000 + (1_000_000 - subsec_micros.min(1_000_000)))
}

// ─── Interval sampler ───────────────────────────────────────────────────────

/// Rolling window of tick fire times used to report the empirically observed
/// slot interval.
pub struct IntervalSampler {
    times_us: Vec<u64>,
    window: usize,
}

impl IntervalSampler {
    pub fn new(window: usize) -> Self {
        IntervalSampler {
            times_us: Vec::with_capacity(window),
            window,
        }
    }

    /// Record a fire time. Once the window fills, returns the mean gap
    /// between consecutive fires and restarts the window.
    pub fn record(&mut self, now_us: u64) -> Option<f64> {
        self.times_us.push(now_us);
        if self.times_us.len() < self.window.max(2) {
            return None;
        }
        let mut sum = 0.0;
        for pair in self.times_us.windows(2) {
            sum += (pair[1] - pair[0]) as f64;
        }
        let mean = sum / (self.times_us.len() - 1) as f64;
        self.times_us.clear();
        Some(mean)
    }
}
