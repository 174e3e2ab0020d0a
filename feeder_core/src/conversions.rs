//! Mappings from the TOML schema (`feeder_config`) into runtime config.

use crate::config::FeedingCfg;

impl From<&feeder_config::Config> for FeedingCfg {
    fn from(cfg: &feeder_config::Config) -> Self {
        let f = &cfg.feeding;
        Self {
            low_level_threshold_kg: f.low_level_threshold_kg,
            manual_target_kg: f.manual_target_kg,
            manual_pulse_threshold_kg: f.manual_pulse_threshold_kg,
            min_dispense_kg: f.min_dispense_kg,
            feeding_timeout_ms: f.feeding_timeout_ms,
            cooldown_ms: f.cooldown_ms,
            manual_pulse_on_ms: f.manual_pulse_on_ms,
            pulse_off_ms: f.pulse_off_ms,
            long_pulse_on_ms: f.long_pulse_on_ms,
            short_pulse_on_ms: f.short_pulse_on_ms,
            phase_threshold: f.phase_threshold,
            settle_ms: f.settle_ms,
            stop_early_factor: f.stop_early_factor,
            sensor_timeout_ms: cfg.hardware.sensor_read_timeout_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_feeding_and_hardware_sections() {
        let toml = r#"
            [feeding]
            manual_target_kg = 0.2
            feeding_timeout_ms = 10000

            [hardware]
            sensor_read_timeout_ms = 500
        "#;
        let parsed = feeder_config::load_toml(toml).expect("parse");
        let cfg = FeedingCfg::from(&parsed);
        assert_eq!(cfg.manual_target_kg, 0.2);
        assert_eq!(cfg.feeding_timeout_ms, 10_000);
        assert_eq!(cfg.sensor_timeout_ms, 500);
        // Unspecified fields keep the deployment defaults.
        assert_eq!(cfg.cooldown_ms, 10_000);
        assert_eq!(cfg.stop_early_factor, 0.85);
    }
}
