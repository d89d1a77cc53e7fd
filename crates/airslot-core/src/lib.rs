//! # airslot-core
//!
//! Core logic for the airslot hybrid TDMA/CSMA medium-access controller.
//!
//! Pure state machines, no I/O. The runtime crate (`airslot-mac`) owns the
//! threads, timers, and sockets that drive these types.
//!
//! ## Crate structure
//!
//! - [`wire`]: configuration wire format, station addresses, radio blob encoding
//! - [`schedule`]: per-slot station/TID assignment table
//! - [`clock`]: frame clock with jitter-corrected re-arm intervals
//! - [`bucket`]: token bucket for rate enforcement
//! - [`shaper`]: packet admission and deferral queue state machine
//! - [`rate`]: adaptive fill-rate control from departure feedback
//! - [`stats`]: scheduler and shaper statistics

pub mod bucket;
pub mod clock;
pub mod rate;
pub mod schedule;
pub mod shaper;
pub mod stats;
pub mod wire;
