//! # Scheduler Runtime
//!
//! Owns the tick thread. Each tick the worker reads the current slot table,
//! pushes the active slot's station set to the radio sink, and re-arms
//! itself with the drift-corrected interval from the frame clock.
//!
//! The slot table is published through an [`ArcSwap`]: the control channel
//! builds a complete replacement table and swaps the pointer, so the tick
//! path never blocks on an update and never observes a half-built table.
//!
//! Shutdown is a cooperative flag checked at the top of every tick and
//! inside the inter-tick wait; the worker is joined on [`SchedulerRuntime::shutdown`]
//! or drop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use quanta::Instant;
use tracing::{debug, info};

use airslot_core::clock::{initial_alignment_delay, ClockConfig, FrameClock};
use airslot_core::schedule::SlotTable;
use airslot_core::stats::SchedulerStats;
use airslot_core::wire::{encode_slot, ConfigError};

use crate::radio::RadioControl;

// ─── Configuration ──────────────────────────────────────────────────────────

/// Scheduler runtime parameters.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Interface identifier handed to the radio sink with every push.
    pub interface: String,
    /// Frame clock parameters.
    pub clock: ClockConfig,
    /// Delay before the first tick. `None` aligns the frame epoch to the
    /// next whole-second wall-clock boundary so multiple nodes share a grid;
    /// tests pass a short explicit delay instead.
    pub initial_delay: Option<Duration>,
}

// ─── Handle ─────────────────────────────────────────────────────────────────

/// Cloneable handle shared with the control channel (and anything else that
/// needs to observe or update the scheduler).
#[derive(Clone)]
pub struct SchedulerHandle {
    table: Arc<ArcSwap<SlotTable>>,
    running: Arc<AtomicBool>,
    stats: Arc<Mutex<SchedulerStats>>,
    slots_per_frame: usize,
}

impl SchedulerHandle {
    /// Parse an update message and, if it is valid, atomically replace the
    /// whole slot table. A rejected update leaves the installed table
    /// untouched.
    pub fn apply_update(&self, msg: &str) -> Result<(), ConfigError> {
        match SlotTable::parse(msg, self.slots_per_frame) {
            Ok(table) => {
                info!(stations = table.station_count(), "schedule update applied");
                self.table.store(Arc::new(table));
                self.lock_stats().updates_applied += 1;
                Ok(())
            }
            Err(e) => {
                self.lock_stats().updates_rejected += 1;
                Err(e)
            }
        }
    }

    /// Ask the tick thread (and anything polling [`is_running`](Self::is_running))
    /// to stop.
    pub fn request_shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Whether the scheduler is still meant to run.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// The currently installed table.
    pub fn table(&self) -> Arc<SlotTable> {
        self.table.load_full()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> SchedulerStats {
        self.lock_stats().clone()
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, SchedulerStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ─── Runtime ────────────────────────────────────────────────────────────────

/// The tick thread and its shared state.
pub struct SchedulerRuntime {
    handle: SchedulerHandle,
    worker: Option<thread::JoinHandle<()>>,
}

impl SchedulerRuntime {
    /// Install `initial` as the slot table and start ticking.
    pub fn start(
        config: RuntimeConfig,
        initial: SlotTable,
        radio: Box<dyn RadioControl>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            initial.slots_per_frame() == config.clock.slots_per_frame,
            "initial table has {} slots, clock expects {}",
            initial.slots_per_frame(),
            config.clock.slots_per_frame
        );

        let handle = SchedulerHandle {
            table: Arc::new(ArcSwap::from_pointee(initial)),
            running: Arc::new(AtomicBool::new(true)),
            stats: Arc::new(Mutex::new(SchedulerStats::default())),
            slots_per_frame: config.clock.slots_per_frame,
        };

        let worker_handle = handle.clone();
        let worker = thread::Builder::new()
            .name("airslot-tick".into())
            .spawn(move || tick_loop(config, worker_handle, radio))
            .map_err(|e| anyhow::anyhow!("failed to spawn tick thread: {e}"))?;

        Ok(SchedulerRuntime {
            handle,
            worker: Some(worker),
        })
    }

    /// Handle for the control channel.
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Stop the tick thread and join it. Idempotent.
    pub fn shutdown(&mut self) {
        self.handle.request_shutdown();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for SchedulerRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ─── Worker ─────────────────────────────────────────────────────────────────

fn tick_loop(config: RuntimeConfig, handle: SchedulerHandle, radio: Box<dyn RadioControl>) {
    let origin = Instant::now();
    let mut clock = FrameClock::new(config.clock.clone(), origin);

    let first_delay = config.initial_delay.unwrap_or_else(wall_second_alignment);
    debug!(?first_delay, "tick loop armed");
    let mut deadline = origin + first_delay;

    loop {
        if !wait_until(deadline, &handle.running) {
            break;
        }

        let now = Instant::now();
        let tick = clock.on_tick(now);

        let table = handle.table.load();
        let entries = table.slot(tick.slot_index);
        radio.push_slot(&config.interface, encode_slot(entries));

        {
            let mut stats = handle.lock_stats();
            stats.ticks += 1;
            stats.frames = tick.frame_count;
            stats.stations_pushed += entries.len() as u64;
            if let Some(avg) = tick.observed_interval_us {
                stats.observed_interval_us = avg;
                debug!(avg_us = avg, "observed slot interval");
            }
        }

        deadline = now + tick.next_interval;
    }

    info!("tick loop stopped");
}

/// Delay to the second-next whole-second wall-clock boundary. Wall time is
/// used once, here, to pick a shared frame epoch; all subsequent timing is
/// monotonic.
fn wall_second_alignment() -> Duration {
    let subsec = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_micros() as u64;
    initial_alignment_delay(subsec)
}

/// Sleep toward `deadline`, checking the running flag often enough to stay
/// responsive to shutdown, and spinning only for the final stretch so the
/// fire time lands within timer-interrupt noise of the target.
///
/// Returns `false` if shutdown was requested while waiting.
fn wait_until(deadline: Instant, running: &AtomicBool) -> bool {
    loop {
        if !running.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        let remaining = deadline - now;
        if remaining > Duration::from_millis(2) {
            thread::sleep((remaining - Duration::from_millis(1)).min(Duration::from_millis(50)));
        } else if remaining > Duration::from_micros(200) {
            thread::sleep(Duration::from_micros(100));
        } else {
            std::hint::spin_loop();
        }
    }
}
