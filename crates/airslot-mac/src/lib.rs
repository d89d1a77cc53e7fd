//! # airslot-mac
//!
//! Threaded runtime for the airslot hybrid TDMA/CSMA MAC:
//!
//! - [`runtime`]: slot-tick worker thread publishing per-slot schedules to
//!   the radio control interface
//! - [`control`]: TCP request/reply channel for schedule updates
//! - [`shaping`]: shaper runtime with the 100 µs retry timer
//! - [`radio`]: the radio push seam and stock sinks
//! - [`config`]: daemon settings (defaults, TOML file, CLI overrides)
//!
//! The `airslot-macd` binary wires these together.

pub mod config;
pub mod control;
pub mod radio;
pub mod runtime;
pub mod shaping;
