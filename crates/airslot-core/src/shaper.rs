//! # Traffic Shaper
//!
//! Token-bucket admission with a bounded FIFO deferral queue over an opaque
//! packet handle. Packets that fit the bucket are released immediately; the
//! rest wait in arrival order and are drained by a short-interval retry
//! timer. Order is strict: once anything is queued, new arrivals queue behind
//! it, and release happens head-first only.
//!
//! The shaper is a pure state machine. `recv` and `drain` return what the
//! caller should do (forward packets, arm or not arm the retry timer); the
//! runtime owns the lock, the timer thread, and the forward primitive.

use quanta::Instant;
use std::collections::VecDeque;
use std::time::Duration;

use crate::bucket::TokenBucket;
use crate::rate::{RateConfig, RateController, RateEvent};
use crate::stats::ShaperStats;

// ─── Configuration ──────────────────────────────────────────────────────────

/// Shaper parameters.
#[derive(Debug, Clone)]
pub struct ShaperConfig {
    /// Token bucket depth, bits.
    pub burst_bits: u64,
    /// Deferral queue bound; arrivals beyond it are counted drops.
    pub max_queue_len: usize,
    /// Retry-timer granularity while the queue is non-empty.
    pub retry_interval: Duration,
    /// Maximum time a packet may wait in the queue. `None` means packets
    /// wait for credit indefinitely (pure backpressure).
    pub max_residency: Option<Duration>,
    /// Fill-rate control parameters.
    pub rate: RateConfig,
}

impl Default for ShaperConfig {
    fn default() -> Self {
        ShaperConfig {
            burst_bits: 80_000,
            max_queue_len: 60,
            retry_interval: Duration::from_micros(100),
            max_residency: None,
            rate: RateConfig::default(),
        }
    }
}

// ─── Requests and outcomes ──────────────────────────────────────────────────

/// Destination hardware queue handle, opaque to the shaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(pub usize);

/// One outbound packet presented for admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest<P> {
    /// Opaque packet handle; returned untouched on release.
    pub packet: P,
    /// Payload length in bytes.
    pub len_bytes: usize,
    /// Destination queue the release should target.
    pub queue: QueueId,
    /// Internally generated traffic (management frames etc.).
    pub internal: bool,
}

impl<P> TxRequest<P> {
    fn size_bits(&self) -> u64 {
        self.len_bytes as u64 * 8
    }
}

/// What the receive path decided for a packet.
#[derive(Debug, PartialEq, Eq)]
pub enum RecvOutcome<P> {
    /// In profile: forward now.
    Forward(TxRequest<P>),
    /// Deferred. `arm_timer` is set when this packet started the backlog and
    /// the retry timer is not yet running.
    Queued { arm_timer: bool },
    /// Queue full: definitive, counted drop.
    Dropped(TxRequest<P>),
}

/// What the retry timer should do after a drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainVerdict {
    /// Head packet still out of profile: fire again after this interval.
    Rearm(Duration),
    /// Queue empty: the timer stops until the next arming `recv`.
    Idle,
}

/// Result of one drain pass: packets to forward, in order, plus the timer
/// verdict.
#[derive(Debug)]
pub struct DrainOutcome<P> {
    pub release: Vec<TxRequest<P>>,
    pub verdict: DrainVerdict,
}

struct Deferred<P> {
    req: TxRequest<P>,
    enqueued_at: Instant,
}

// ─── Shaper ─────────────────────────────────────────────────────────────────

/// Token-bucket shaper with FIFO deferral.
pub struct Shaper<P> {
    config: ShaperConfig,
    bucket: TokenBucket,
    queue: VecDeque<Deferred<P>>,
    rate: RateController,
    stats: ShaperStats,
}

impl<P> Shaper<P> {
    pub fn new(config: ShaperConfig, now: Instant) -> Self {
        let rate = RateController::new(config.rate.clone(), now);
        let bucket = TokenBucket::new(config.burst_bits, rate.fill_rate_bps(), now);
        Shaper {
            config,
            bucket,
            queue: VecDeque::new(),
            rate,
            stats: ShaperStats::new(),
        }
    }

    /// Admit or defer one outbound packet.
    pub fn recv(&mut self, req: TxRequest<P>, now: Instant) -> RecvOutcome<P> {
        self.stats.received += 1;

        if self.queue.is_empty() {
            if self.bucket.try_admit(req.size_bits(), now) {
                self.stats.sent += 1;
                return RecvOutcome::Forward(req);
            }
            self.defer(req, now, true)
        } else {
            // A backlog exists: never let a new arrival overtake it, even if
            // the bucket has refilled in the meantime.
            self.defer(req, now, false)
        }
    }

    fn defer(&mut self, req: TxRequest<P>, now: Instant, arm: bool) -> RecvOutcome<P> {
        if self.queue.len() >= self.config.max_queue_len {
            self.stats.dropped += 1;
            return RecvOutcome::Dropped(req);
        }
        self.queue.push_back(Deferred {
            req,
            enqueued_at: now,
        });
        self.stats.shaped += 1;
        RecvOutcome::Queued { arm_timer: arm }
    }

    /// Retry-timer body: release head packets while they fit the bucket.
    /// Stops at the first rejection and asks to be re-armed; never reorders.
    pub fn drain(&mut self, now: Instant) -> DrainOutcome<P> {
        let mut release = Vec::new();

        loop {
            let Some(head) = self.queue.front() else {
                return DrainOutcome {
                    release,
                    verdict: DrainVerdict::Idle,
                };
            };

            if let Some(max) = self.config.max_residency {
                if now.duration_since(head.enqueued_at) > max {
                    self.queue.pop_front();
                    self.stats.expired += 1;
                    continue;
                }
            }

            if self.bucket.try_admit(head.req.size_bits(), now) {
                let head = self.queue.pop_front().expect("head just observed");
                self.stats.sent += 1;
                release.push(head.req);
            } else {
                self.stats.retries += 1;
                return DrainOutcome {
                    release,
                    verdict: DrainVerdict::Rearm(self.config.retry_interval),
                };
            }
        }
    }

    /// Departure feedback from the lower layer. `total_delay` is the
    /// cumulative delay the caller tracks across the packet's lifetime;
    /// only the queuing delay feeds the controller.
    pub fn on_departure(
        &mut self,
        delay: Duration,
        total_delay: Duration,
        size_bytes: usize,
        count: u32,
        now: Instant,
    ) -> RateEvent {
        let event = self.rate.on_departure(delay, size_bytes, count, now);
        if let Some(update) = event.update {
            // Accrue at the old rate before switching, so the change only
            // applies forward in time.
            self.bucket.refill(now);
            self.bucket.set_fill_rate(update.fill_rate_bps);
            tracing::debug!(
                fill_rate_bps = update.fill_rate_bps,
                delay_avg_us = update.delay_avg_us,
                total_delay_us = total_delay.as_micros() as u64,
                "fill rate recomputed"
            );
        }
        if let Some(sample) = event.throughput {
            tracing::debug!(kbit_per_s = sample.kbit_per_s, "throughput window");
        }
        event
    }

    /// Release every queued packet unconditionally, in order. Used by the
    /// clean-shutdown path so deferred traffic is not lost at teardown.
    pub fn flush(&mut self) -> Vec<TxRequest<P>> {
        let drained: Vec<TxRequest<P>> = self.queue.drain(..).map(|d| d.req).collect();
        self.stats.sent += drained.len() as u64;
        drained
    }

    /// Packets currently deferred.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Retry-timer granularity.
    pub fn retry_interval(&self) -> Duration {
        self.config.retry_interval
    }

    /// Counter snapshot.
    pub fn stats(&self) -> &ShaperStats {
        &self.stats
    }

    /// Bucket state, for telemetry.
    pub fn bucket(&self) -> &TokenBucket {
        &self.bucket
    }
}
