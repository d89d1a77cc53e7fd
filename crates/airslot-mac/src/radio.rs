//! # Radio Push Seam
//!
//! At the start of every slot the scheduler hands the slot's station/mask
//! blob to a [`RadioControl`] sink. The sink owns the actual control-plane
//! transport (netlink, firmware mailbox, whatever the radio wants); from the
//! scheduler's perspective the push is fire-and-forget and failures are the
//! sink's to log, never retried here.

use bytes::Bytes;
use std::sync::{Arc, Mutex};

/// Receives one slot assignment per tick.
pub trait RadioControl: Send + 'static {
    /// Deliver `blob` (packed station tuples, see `airslot_core::wire`) for
    /// the slot now beginning on `interface`. Must not block the tick thread.
    fn push_slot(&self, interface: &str, blob: Bytes);
}

/// Default sink: logs pushes at trace level. Used when no real radio
/// transport is attached (dry runs, development).
#[derive(Debug, Default)]
pub struct TracingRadio;

impl RadioControl for TracingRadio {
    fn push_slot(&self, interface: &str, blob: Bytes) {
        tracing::trace!(
            interface,
            stations = blob.len() / airslot_core::wire::STATION_TUPLE_LEN,
            "slot schedule push"
        );
    }
}

/// Test sink: records every push for later inspection.
#[derive(Debug, Clone, Default)]
pub struct RecordingRadio {
    pushes: Arc<Mutex<Vec<(String, Bytes)>>>,
}

impl RecordingRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all pushes so far.
    pub fn pushes(&self) -> Vec<(String, Bytes)> {
        self.pushes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of pushes so far.
    pub fn len(&self) -> usize {
        self.pushes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RadioControl for RecordingRadio {
    fn push_slot(&self, interface: &str, blob: Bytes) {
        self.pushes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((interface.to_string(), blob));
    }
}
