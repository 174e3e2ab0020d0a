//! Runtime configuration for the feeding engine.
//!
//! These are the validated structs consumed by `FeedingEngine`. They are
//! separate from the TOML-deserialized schema in `feeder_config`; see
//! `conversions` for the mapping.

/// Tunables for one feeding attempt. Masses are kilograms, durations
/// milliseconds. Defaults mirror the reference deployment.
#[derive(Debug, Clone)]
pub struct FeedingCfg {
    /// Minimum hopper level required to start any feed.
    pub low_level_threshold_kg: f32,
    /// Fixed ration dispensed by a manual feed.
    pub manual_target_kg: f32,
    /// Dispensed mass at which a manual feed switches from continuous run
    /// to pulsed drive.
    pub manual_pulse_threshold_kg: f32,
    /// Success threshold for manual feeds.
    pub min_dispense_kg: f32,
    /// Hard ceiling on a single attempt.
    pub feeding_timeout_ms: u64,
    /// Mandatory idle gap after any attempt, success or failure.
    pub cooldown_ms: u64,
    /// Pulse on time for manual fine-tuning.
    pub manual_pulse_on_ms: u64,
    /// Pulse off time, shared by manual and scheduled drive.
    pub pulse_off_ms: u64,
    /// Scheduled pulse on time while far from target.
    pub long_pulse_on_ms: u64,
    /// Scheduled pulse on time near target.
    pub short_pulse_on_ms: u64,
    /// Remaining-mass ratio at which scheduled pulses switch long to short.
    pub phase_threshold: f32,
    /// Dwell after motor stop before a settle reading is trusted.
    pub settle_ms: u64,
    /// Fraction of the scheduled target accepted as reached; feed still in
    /// flight when the motor stops covers the remainder.
    pub stop_early_factor: f32,
    /// Max sensor wait per read.
    pub sensor_timeout_ms: u64,
}

impl Default for FeedingCfg {
    fn default() -> Self {
        Self {
            low_level_threshold_kg: 0.2,
            manual_target_kg: 0.15,
            manual_pulse_threshold_kg: 0.075,
            min_dispense_kg: 0.1,
            feeding_timeout_ms: 30_000,
            cooldown_ms: 10_000,
            manual_pulse_on_ms: 50,
            pulse_off_ms: 200,
            long_pulse_on_ms: 150,
            short_pulse_on_ms: 50,
            phase_threshold: 0.3,
            settle_ms: 400,
            stop_early_factor: 0.85,
            sensor_timeout_ms: 1500,
        }
    }
}
