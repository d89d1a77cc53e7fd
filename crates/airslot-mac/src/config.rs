//! # Daemon Settings
//!
//! Layered configuration for `airslot-macd`: built-in defaults, an optional
//! TOML file, then CLI overrides on top. The file carries the tunables that
//! rarely change per invocation (shaper constants, drift gain); the CLI
//! carries the per-deployment flags (interface, slot duration, frame size,
//! initial schedule).

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use airslot_core::clock::ClockConfig;
use airslot_core::rate::RateConfig;
use airslot_core::shaper::ShaperConfig;

/// Control channel default port.
pub const DEFAULT_CONTROL_PORT: u16 = 1217;

// ─── File schema ────────────────────────────────────────────────────────────

/// Raw TOML schema; every field optional so a partial file works.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SettingsInput {
    pub scheduler: SchedulerInput,
    pub shaper: ShaperInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SchedulerInput {
    pub slot_duration_us: Option<u64>,
    pub slots_per_frame: Option<usize>,
    pub control_port: Option<u16>,
    pub drift_gain: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ShaperInput {
    pub burst_bits: Option<u64>,
    pub max_queue_len: Option<usize>,
    pub retry_interval_us: Option<u64>,
    pub max_residency_us: Option<u64>,
    pub adaptive: Option<bool>,
    pub fixed_rate_bps: Option<u64>,
    pub initial_rate_bps: Option<u64>,
    pub min_rate_bps: Option<u64>,
    pub delta_increase_bps: Option<u64>,
    pub delay_optimal_us: Option<u64>,
    pub alpha_pct: Option<u8>,
    pub check_interval_us: Option<u64>,
    pub throughput_interval_us: Option<u64>,
}

// ─── Resolved settings ──────────────────────────────────────────────────────

/// Fully resolved daemon settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub slot_duration: Duration,
    pub slots_per_frame: usize,
    pub control_port: u16,
    pub drift_gain: u32,
    pub shaper: ShaperConfig,
}

impl Default for Settings {
    fn default() -> Self {
        let clock = ClockConfig::default();
        Settings {
            slot_duration: clock.slot_duration,
            slots_per_frame: clock.slots_per_frame,
            control_port: DEFAULT_CONTROL_PORT,
            drift_gain: clock.drift_gain,
            shaper: ShaperConfig::default(),
        }
    }
}

impl Settings {
    /// Read a TOML settings file and resolve it over the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let input: SettingsInput = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
        Ok(input.resolve())
    }

    /// Clock configuration for the tick loop.
    pub fn clock_config(&self) -> ClockConfig {
        ClockConfig {
            slot_duration: self.slot_duration,
            slots_per_frame: self.slots_per_frame,
            drift_gain: self.drift_gain,
            ..ClockConfig::default()
        }
    }
}

impl SettingsInput {
    /// Apply the file over the built-in defaults.
    pub fn resolve(self) -> Settings {
        let mut out = Settings::default();

        if let Some(us) = self.scheduler.slot_duration_us {
            out.slot_duration = Duration::from_micros(us);
        }
        if let Some(n) = self.scheduler.slots_per_frame {
            out.slots_per_frame = n.max(1);
        }
        if let Some(p) = self.scheduler.control_port {
            out.control_port = p;
        }
        if let Some(g) = self.scheduler.drift_gain {
            out.drift_gain = g;
        }

        let s = &self.shaper;
        let rate_defaults = RateConfig::default();
        out.shaper = ShaperConfig {
            burst_bits: s.burst_bits.unwrap_or(out.shaper.burst_bits),
            max_queue_len: s.max_queue_len.unwrap_or(out.shaper.max_queue_len),
            retry_interval: s
                .retry_interval_us
                .map(Duration::from_micros)
                .unwrap_or(out.shaper.retry_interval),
            max_residency: s.max_residency_us.map(Duration::from_micros),
            rate: RateConfig {
                adaptive: s.adaptive.unwrap_or(rate_defaults.adaptive),
                fixed_rate_bps: s.fixed_rate_bps.unwrap_or(rate_defaults.fixed_rate_bps),
                initial_rate_bps: s.initial_rate_bps.unwrap_or(rate_defaults.initial_rate_bps),
                min_rate_bps: s.min_rate_bps.unwrap_or(rate_defaults.min_rate_bps),
                delta_increase_bps: s
                    .delta_increase_bps
                    .unwrap_or(rate_defaults.delta_increase_bps),
                delay_optimal_us: s.delay_optimal_us.unwrap_or(rate_defaults.delay_optimal_us),
                alpha_pct: s.alpha_pct.unwrap_or(rate_defaults.alpha_pct).min(100),
                check_interval: s
                    .check_interval_us
                    .map(Duration::from_micros)
                    .unwrap_or(rate_defaults.check_interval),
                throughput_interval: s
                    .throughput_interval_us
                    .map(Duration::from_micros)
                    .unwrap_or(rate_defaults.throughput_interval),
            },
        };

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_inherited_constants() {
        let s = Settings::default();
        assert_eq!(s.slot_duration, Duration::from_micros(10_000));
        assert_eq!(s.slots_per_frame, 10);
        assert_eq!(s.control_port, 1217);
        assert_eq!(s.drift_gain, 2);
        assert_eq!(s.shaper.burst_bits, 80_000);
        assert_eq!(s.shaper.max_queue_len, 60);
        assert_eq!(s.shaper.retry_interval, Duration::from_micros(100));
        assert_eq!(s.shaper.max_residency, None);
        assert!(!s.shaper.rate.adaptive);
        assert_eq!(s.shaper.rate.fixed_rate_bps, 8_000_000);
        assert_eq!(s.shaper.rate.min_rate_bps, 100_000);
        assert_eq!(s.shaper.rate.delay_optimal_us, 2_000);
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let input: SettingsInput = toml::from_str(
            r#"
            [scheduler]
            slot_duration_us = 20000

            [shaper]
            adaptive = true
            max_residency_us = 250000
            "#,
        )
        .unwrap();
        let s = input.resolve();
        assert_eq!(s.slot_duration, Duration::from_micros(20_000));
        assert_eq!(s.slots_per_frame, 10); // untouched
        assert!(s.shaper.rate.adaptive);
        assert_eq!(s.shaper.max_residency, Some(Duration::from_millis(250)));
        assert_eq!(s.shaper.burst_bits, 80_000); // untouched
    }

    #[test]
    fn empty_file_resolves_to_defaults() {
        let input: SettingsInput = toml::from_str("").unwrap();
        let s = input.resolve();
        assert_eq!(s.control_port, DEFAULT_CONTROL_PORT);
    }

    #[test]
    fn alpha_is_clamped_to_percentage() {
        let input: SettingsInput = toml::from_str("[shaper]\nalpha_pct = 250").unwrap();
        let s = input.resolve();
        assert_eq!(s.shaper.rate.alpha_pct, 100);
    }

    #[test]
    fn zero_slots_per_frame_is_floored() {
        let input: SettingsInput = toml::from_str("[scheduler]\nslots_per_frame = 0").unwrap();
        assert_eq!(input.resolve().slots_per_frame, 1);
    }
}
