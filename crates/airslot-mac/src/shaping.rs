//! # Shaper Runtime
//!
//! Wraps the core [`Shaper`] state machine with the pieces the host I/O
//! layer needs: a single lock covering bucket + queue, a retry-timer thread
//! that drains the deferral queue at 100 µs granularity while it is
//! non-empty, and the [`PacketForwarder`] seam for the external
//! "forward packet now" primitive.
//!
//! The forwarder is called with the shaper lock held; by contract it is
//! non-blocking fire-and-forget (DMA submission, socket send), which keeps
//! release order identical to queue order without a second handoff queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use quanta::Instant;
use tracing::debug;

use airslot_core::rate::RateEvent;
use airslot_core::shaper::{DrainVerdict, QueueId, RecvOutcome, Shaper, ShaperConfig, TxRequest};
use airslot_core::stats::ShaperStats;

// ─── Forwarder seam ─────────────────────────────────────────────────────────

/// The external "forward packet now" primitive. Implementations must not
/// block: the shaper treats a returned call as handed off.
pub trait PacketForwarder<P>: Send + Sync + 'static {
    fn forward(&self, req: TxRequest<P>);
}

impl<P, F> PacketForwarder<P> for F
where
    F: Fn(TxRequest<P>) + Send + Sync + 'static,
{
    fn forward(&self, req: TxRequest<P>) {
        self(req)
    }
}

/// What happened to a packet handed to [`ShaperRuntime::recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvDisposition {
    /// Forwarded immediately.
    Forwarded,
    /// Waiting in the deferral queue.
    Deferred,
    /// Queue full; the packet is gone and the drop was counted. Definitive,
    /// not retried.
    Dropped,
}

// ─── Runtime ────────────────────────────────────────────────────────────────

struct ShaperShared<P> {
    shaper: Mutex<Shaper<P>>,
    forwarder: Box<dyn PacketForwarder<P>>,
    retry_interval: Duration,
    running: AtomicBool,
}

/// Thread-backed shaper: receive path for the host TX hook, retry timer in a
/// background thread, departure feedback for rate adaptation.
pub struct ShaperRuntime<P: Send + 'static> {
    inner: Arc<ShaperShared<P>>,
    arm_tx: Sender<()>,
    worker: Option<thread::JoinHandle<()>>,
}

impl<P: Send + 'static> ShaperRuntime<P> {
    pub fn start(
        config: ShaperConfig,
        forwarder: Box<dyn PacketForwarder<P>>,
    ) -> anyhow::Result<Self> {
        let shaper = Shaper::new(config, Instant::now());
        let retry_interval = shaper.retry_interval();
        let inner = Arc::new(ShaperShared {
            shaper: Mutex::new(shaper),
            forwarder,
            retry_interval,
            running: AtomicBool::new(true),
        });

        // Capacity 1: an arm signal is a level, not a count.
        let (arm_tx, arm_rx) = bounded(1);

        let worker_inner = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name("airslot-shaper".into())
            .spawn(move || retry_loop(worker_inner, arm_rx))
            .map_err(|e| anyhow::anyhow!("failed to spawn shaper timer thread: {e}"))?;

        Ok(ShaperRuntime {
            inner,
            arm_tx,
            worker: Some(worker),
        })
    }

    /// Host TX hook: admit, defer, or drop one outbound packet.
    pub fn recv(
        &self,
        packet: P,
        len_bytes: usize,
        queue: QueueId,
        internal: bool,
    ) -> RecvDisposition {
        let req = TxRequest {
            packet,
            len_bytes,
            queue,
            internal,
        };
        let mut shaper = self.lock_shaper();
        match shaper.recv(req, Instant::now()) {
            RecvOutcome::Forward(req) => {
                self.inner.forwarder.forward(req);
                RecvDisposition::Forwarded
            }
            RecvOutcome::Queued { arm_timer } => {
                if arm_timer {
                    // Full channel means a signal is already pending.
                    let _ = self.arm_tx.try_send(());
                }
                RecvDisposition::Deferred
            }
            RecvOutcome::Dropped(req) => {
                debug!(len_bytes = req.len_bytes, "deferral queue full, packet dropped");
                RecvDisposition::Dropped
            }
        }
    }

    /// Departure feedback from the lower layer: queuing delay, cumulative
    /// delay, payload size, and transmission count for a completed packet.
    pub fn on_departure(
        &self,
        delay: Duration,
        total_delay: Duration,
        size_bytes: usize,
        count: u32,
    ) -> RateEvent {
        self.lock_shaper()
            .on_departure(delay, total_delay, size_bytes, count, Instant::now())
    }

    /// Counter snapshot.
    pub fn stats(&self) -> ShaperStats {
        self.lock_shaper().stats().clone()
    }

    /// Packets currently deferred.
    pub fn queue_len(&self) -> usize {
        self.lock_shaper().queue_len()
    }

    /// Current bucket fill rate, bits/s.
    pub fn fill_rate_bps(&self) -> u64 {
        self.lock_shaper().bucket().fill_rate_bps()
    }

    /// Stop the retry thread, then release any still-deferred packets to the
    /// forwarder in order so teardown loses nothing. Idempotent.
    pub fn shutdown(&mut self) {
        self.inner.running.store(false, Ordering::Relaxed);
        let _ = self.arm_tx.try_send(());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }

        let mut shaper = self.lock_shaper();
        for req in shaper.flush() {
            self.inner.forwarder.forward(req);
        }
    }

    fn lock_shaper(&self) -> MutexGuard<'_, Shaper<P>> {
        self.inner.shaper.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<P: Send + 'static> Drop for ShaperRuntime<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ─── Timer thread ───────────────────────────────────────────────────────────

fn retry_loop<P: 'static>(inner: Arc<ShaperShared<P>>, arm_rx: Receiver<()>) {
    while inner.running.load(Ordering::Relaxed) {
        // Parked until the receive path arms the timer.
        match arm_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(()) => {}
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let mut interval = inner.retry_interval;
        loop {
            if !inner.running.load(Ordering::Relaxed) {
                return;
            }
            thread::sleep(interval);

            let verdict = {
                let mut shaper = inner.shaper.lock().unwrap_or_else(|e| e.into_inner());
                let outcome = shaper.drain(Instant::now());
                for req in outcome.release {
                    inner.forwarder.forward(req);
                }
                outcome.verdict
            };

            match verdict {
                DrainVerdict::Rearm(next) => interval = next,
                DrainVerdict::Idle => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airslot_core::rate::RateConfig;

    type Forwarded = Arc<Mutex<Vec<u32>>>;

    fn collecting_forwarder() -> (Forwarded, Box<dyn PacketForwarder<u32>>) {
        let seen: Forwarded = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let fwd = move |req: TxRequest<u32>| {
            sink.lock().unwrap().push(req.packet);
        };
        (seen, Box::new(fwd))
    }

    /// 8 kbit burst, 1 Mbit/s: one 1000-byte packet per ~8 ms of refill.
    fn slow_config() -> ShaperConfig {
        ShaperConfig {
            burst_bits: 8_000,
            rate: RateConfig {
                fixed_rate_bps: 1_000_000,
                ..RateConfig::default()
            },
            ..ShaperConfig::default()
        }
    }

    fn wait_for<F: Fn() -> bool>(cond: F, ms: u64) -> bool {
        for _ in 0..ms {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn in_profile_packet_is_forwarded_inline() {
        let (seen, fwd) = collecting_forwarder();
        let mut runtime = ShaperRuntime::start(slow_config(), fwd).unwrap();

        // Let the bucket fill to its burst first.
        thread::sleep(Duration::from_millis(10));
        let disposition = runtime.recv(1, 900, QueueId(0), false);
        assert_eq!(disposition, RecvDisposition::Forwarded);
        assert_eq!(seen.lock().unwrap().as_slice(), &[1]);

        runtime.shutdown();
    }

    #[test]
    fn deferred_packet_is_released_by_the_timer() {
        let (seen, fwd) = collecting_forwarder();
        let mut runtime = ShaperRuntime::start(slow_config(), fwd).unwrap();

        // Bucket starts empty: the packet must wait for refill.
        let disposition = runtime.recv(1, 1_000, QueueId(0), false);
        assert_eq!(disposition, RecvDisposition::Deferred);
        assert!(seen.lock().unwrap().is_empty());

        assert!(
            wait_for(|| seen.lock().unwrap().len() == 1, 200),
            "retry timer should release the packet once credit accrues"
        );
        assert_eq!(runtime.queue_len(), 0);
        assert!(runtime.stats().retries > 0, "head was out of profile at least once");

        runtime.shutdown();
    }

    #[test]
    fn timer_release_keeps_fifo_order() {
        let (seen, fwd) = collecting_forwarder();
        let mut runtime = ShaperRuntime::start(slow_config(), fwd).unwrap();

        for id in 1..=5u32 {
            runtime.recv(id, 1_000, QueueId(0), false);
        }
        assert!(
            wait_for(|| seen.lock().unwrap().len() == 5, 500),
            "all deferred packets should eventually drain"
        );
        assert_eq!(seen.lock().unwrap().as_slice(), &[1, 2, 3, 4, 5]);

        runtime.shutdown();
    }

    #[test]
    fn overflow_is_a_counted_drop() {
        let (seen, fwd) = collecting_forwarder();
        let mut runtime = ShaperRuntime::start(
            ShaperConfig {
                max_queue_len: 2,
                rate: RateConfig {
                    fixed_rate_bps: 8, // effectively frozen
                    ..RateConfig::default()
                },
                burst_bits: 8,
                ..ShaperConfig::default()
            },
            fwd,
        )
        .unwrap();

        assert_eq!(runtime.recv(1, 1_000, QueueId(0), false), RecvDisposition::Deferred);
        assert_eq!(runtime.recv(2, 1_000, QueueId(0), false), RecvDisposition::Deferred);
        assert_eq!(runtime.recv(3, 1_000, QueueId(0), false), RecvDisposition::Dropped);
        assert_eq!(runtime.stats().dropped, 1);
        assert!(seen.lock().unwrap().is_empty());

        runtime.shutdown();
        // Shutdown flushes the two queued packets; the dropped one is gone.
        assert_eq!(seen.lock().unwrap().as_slice(), &[1, 2]);
    }

    #[test]
    fn shutdown_drains_the_queue() {
        let (seen, fwd) = collecting_forwarder();
        let mut runtime = ShaperRuntime::start(
            ShaperConfig {
                rate: RateConfig {
                    fixed_rate_bps: 8,
                    ..RateConfig::default()
                },
                burst_bits: 8,
                ..ShaperConfig::default()
            },
            fwd,
        )
        .unwrap();

        for id in 1..=3u32 {
            runtime.recv(id, 1_000, QueueId(0), false);
        }
        runtime.shutdown();
        assert_eq!(seen.lock().unwrap().as_slice(), &[1, 2, 3]);
        assert_eq!(runtime.stats().sent, 3);
    }

    #[test]
    fn departure_feedback_adapts_the_fill_rate() {
        let (_seen, fwd) = collecting_forwarder();
        let mut runtime = ShaperRuntime::start(
            ShaperConfig {
                rate: RateConfig {
                    adaptive: true,
                    initial_rate_bps: 1_000_000,
                    check_interval: Duration::from_millis(1),
                    ..RateConfig::default()
                },
                ..ShaperConfig::default()
            },
            fwd,
        )
        .unwrap();
        assert_eq!(runtime.fill_rate_bps(), 1_000_000);

        thread::sleep(Duration::from_millis(5));
        // Low delay, healthy service rate: the controller probes upward.
        let event = runtime.on_departure(
            Duration::from_micros(500),
            Duration::from_micros(700),
            1_500,
            1,
        );
        assert!(event.update.is_some());
        assert!(runtime.fill_rate_bps() > 1_000_000);

        runtime.shutdown();
    }
}
