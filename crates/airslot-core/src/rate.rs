//! # Adaptive Rate Control
//!
//! Recomputes the shaper's bucket fill rate from observed departure feedback.
//! Every completed departure reports its queuing delay and size; once per
//! check interval the controller derives the smoothed average delay and the
//! observed service rate, then either relaxes or tightens the fill rate.
//!
//! A second, longer window tracks raw throughput for reporting only; it never
//! feeds back into the rate.

use quanta::Instant;
use std::time::Duration;

// ─── Configuration ──────────────────────────────────────────────────────────

/// Rate controller parameters.
#[derive(Debug, Clone)]
pub struct RateConfig {
    /// Adaptive mode. When off, the fill rate is pinned to `fixed_rate_bps`
    /// at every recomputation.
    pub adaptive: bool,
    /// Pinned rate for non-adaptive operation, bits/s.
    pub fixed_rate_bps: u64,
    /// Starting fill rate, bits/s.
    pub initial_rate_bps: u64,
    /// Adaptive floor, bits/s.
    pub min_rate_bps: u64,
    /// Additive increase applied while delay stays under the target, bits/s.
    pub delta_increase_bps: u64,
    /// Target average queuing delay, µs.
    pub delay_optimal_us: u64,
    /// Percentage weight of the previous average in the delay smoothing
    /// (0 = track the instantaneous value fully).
    pub alpha_pct: u8,
    /// How often the fill rate is recomputed.
    pub check_interval: Duration,
    /// Reporting window for raw throughput.
    pub throughput_interval: Duration,
}

impl Default for RateConfig {
    fn default() -> Self {
        RateConfig {
            adaptive: false,
            fixed_rate_bps: 8_000_000,
            initial_rate_bps: 80_000_000,
            min_rate_bps: 100_000,
            delta_increase_bps: 1_000_000,
            delay_optimal_us: 2_000,
            alpha_pct: 0,
            check_interval: Duration::from_millis(5),
            throughput_interval: Duration::from_secs(1),
        }
    }
}

// ─── Events ─────────────────────────────────────────────────────────────────

/// A recomputed fill rate, produced once per check interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateUpdate {
    /// The new bucket fill rate, bits/s.
    pub fill_rate_bps: u64,
    /// Smoothed average queuing delay, µs.
    pub delay_avg_us: u64,
    /// Observed service rate over the interval, bits/µs.
    pub rate_avg_bits_per_us: f64,
}

/// A throughput report, produced once per throughput window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThroughputSample {
    /// Mean throughput over the window, kbit/s.
    pub kbit_per_s: u64,
}

/// What one departure observation produced.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RateEvent {
    pub update: Option<RateUpdate>,
    pub throughput: Option<ThroughputSample>,
}

// ─── Controller ─────────────────────────────────────────────────────────────

/// Departure-feedback accumulator and fill-rate law.
#[derive(Debug)]
pub struct RateController {
    config: RateConfig,
    fill_rate_bps: u64,

    // Accumulators since the last recomputation.
    transactions: u64,
    delay_sum: Duration,
    bit_sum: u64,
    last_check: Instant,

    delay_avg_us: u64,
    rate_avg_bits_per_us: f64,

    // Independent reporting window.
    throughput_bytes: u64,
    last_throughput: Instant,
}

impl RateController {
    pub fn new(config: RateConfig, now: Instant) -> Self {
        let fill_rate_bps = if config.adaptive {
            config.initial_rate_bps
        } else {
            config.fixed_rate_bps
        };
        RateController {
            config,
            fill_rate_bps,
            transactions: 0,
            delay_sum: Duration::ZERO,
            bit_sum: 0,
            last_check: now,
            delay_avg_us: 0,
            rate_avg_bits_per_us: 0.0,
            throughput_bytes: 0,
            last_throughput: now,
        }
    }

    /// Current fill rate, bits/s.
    pub fn fill_rate_bps(&self) -> u64 {
        self.fill_rate_bps
    }

    /// Smoothed average queuing delay, µs.
    pub fn delay_avg_us(&self) -> u64 {
        self.delay_avg_us
    }

    /// Record one departure: its queuing delay, payload size, and how many
    /// transmissions it covered. Returns any recomputation or report the
    /// observation triggered.
    pub fn on_departure(
        &mut self,
        delay: Duration,
        size_bytes: usize,
        count: u32,
        now: Instant,
    ) -> RateEvent {
        self.transactions += count as u64;
        self.delay_sum += delay;
        self.bit_sum += size_bytes as u64 * 8;
        self.throughput_bytes += size_bytes as u64;

        let mut event = RateEvent::default();

        if now.duration_since(self.last_check) > self.config.check_interval
            && self.transactions > 0
        {
            event.update = Some(self.recompute(now));
        }

        let th_elapsed = now.duration_since(self.last_throughput);
        if th_elapsed > self.config.throughput_interval {
            let elapsed_us = (th_elapsed.as_micros() as u64).max(1);
            event.throughput = Some(ThroughputSample {
                kbit_per_s: self.throughput_bytes * 8 * 1_000 / elapsed_us,
            });
            self.throughput_bytes = 0;
            self.last_throughput = now;
        }

        event
    }

    fn recompute(&mut self, now: Instant) -> RateUpdate {
        let delay_sum_us = (self.delay_sum.as_micros() as u64).max(1);
        let delay_instant_us = delay_sum_us / self.transactions;

        // Percentage-weighted smoothing; alpha 0 tracks the instantaneous
        // value fully.
        let alpha = self.config.alpha_pct as u64;
        self.delay_avg_us =
            alpha * self.delay_avg_us / 100 + (100 - alpha) * delay_instant_us / 100;

        self.rate_avg_bits_per_us = self.bit_sum as f64 / delay_sum_us as f64;

        let prev = self.fill_rate_bps;
        self.fill_rate_bps = if self.config.adaptive {
            if self.delay_avg_us > self.config.delay_optimal_us {
                // Proportional backoff toward the delay target.
                (self.config.delay_optimal_us * prev / self.delay_avg_us)
                    .max(self.config.min_rate_bps)
            } else {
                // Additive probe, bounded by the observed service rate.
                let cap = (self.rate_avg_bits_per_us * 1_000_000.0) as u64;
                (prev + self.config.delta_increase_bps).min(cap)
            }
        } else {
            self.config.fixed_rate_bps
        };

        self.transactions = 0;
        self.delay_sum = Duration::ZERO;
        self.bit_sum = 0;
        self.last_check = now;

        RateUpdate {
            fill_rate_bps: self.fill_rate_bps,
            delay_avg_us: self.delay_avg_us,
            rate_avg_bits_per_us: self.rate_avg_bits_per_us,
        }
    }
}
