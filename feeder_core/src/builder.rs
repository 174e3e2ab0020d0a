//! Assembly and validation for the feeding engine.

use std::sync::Arc;

use feeder_traits::clock::{Clock, MonotonicClock};
use feeder_traits::{RelayLine, WeightSensor};

use crate::config::FeedingCfg;
use crate::engine::FeedingEngine;
use crate::error::{BuildError, Result};
use crate::status::FeedingOutcome;

/// Boxed engine variant for callers that wire hardware at runtime.
pub type Feeder = FeedingEngine<Box<dyn WeightSensor>, Box<dyn RelayLine>>;

/// Builder for a boxed [`Feeder`]. All config is validated on `build()`.
#[derive(Default)]
pub struct FeedingEngineBuilder {
    sensor: Option<Box<dyn WeightSensor>>,
    relay: Option<Box<dyn RelayLine>>,
    cfg: Option<FeedingCfg>,
    clock: Option<Box<dyn Clock + Send + Sync>>,
    completion_hook: Option<Box<dyn FnMut(FeedingOutcome)>>,
}

impl FeedingEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weight_sensor(mut self, sensor: impl WeightSensor + 'static) -> Self {
        self.sensor = Some(Box::new(sensor));
        self
    }

    pub fn with_relay(mut self, relay: impl RelayLine + 'static) -> Self {
        self.relay = Some(Box::new(relay));
        self
    }

    pub fn with_config(mut self, cfg: FeedingCfg) -> Self {
        self.cfg = Some(cfg);
        self
    }

    /// Provide a custom clock; defaults to `MonotonicClock`.
    pub fn with_clock(mut self, clock: Box<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_completion_hook<F>(mut self, hook: F) -> Self
    where
        F: FnMut(FeedingOutcome) + 'static,
    {
        self.completion_hook = Some(Box::new(hook));
        self
    }

    /// Validate and build. Missing pieces and out-of-range config values
    /// return typed `BuildError` reports.
    pub fn build(self) -> Result<Feeder> {
        let sensor = self
            .sensor
            .ok_or_else(|| eyre::Report::new(BuildError::MissingWeightSensor))?;
        let relay = self
            .relay
            .ok_or_else(|| eyre::Report::new(BuildError::MissingRelay))?;
        let cfg = self.cfg.unwrap_or_default();
        build_engine(sensor, relay, cfg, self.clock, self.completion_hook)
    }
}

/// Build a statically-dispatched engine from concrete sensor and relay.
pub fn build_engine<W, R>(
    sensor: W,
    relay: R,
    cfg: FeedingCfg,
    clock: Option<Box<dyn Clock + Send + Sync>>,
    completion_hook: Option<Box<dyn FnMut(FeedingOutcome)>>,
) -> Result<FeedingEngine<W, R>>
where
    W: WeightSensor + 'static,
    R: RelayLine + 'static,
{
    validate_cfg(&cfg)?;
    let clock: Arc<dyn Clock + Send + Sync> = match clock {
        Some(b) => Arc::from(b),
        None => Arc::new(MonotonicClock::new()),
    };
    Ok(FeedingEngine::new(sensor, relay, cfg, clock, completion_hook))
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

fn validate_cfg(cfg: &FeedingCfg) -> Result<()> {
    // Written as negated comparisons so NaN fails validation too.
    if !(cfg.low_level_threshold_kg >= 0.0) {
        return Err(invalid("low_level_threshold_kg must be >= 0"));
    }
    if !(cfg.manual_target_kg > 0.0) {
        return Err(invalid("manual_target_kg must be > 0"));
    }
    if !(cfg.manual_pulse_threshold_kg > 0.0 && cfg.manual_pulse_threshold_kg < cfg.manual_target_kg)
    {
        return Err(invalid(
            "manual_pulse_threshold_kg must be in (0, manual_target_kg)",
        ));
    }
    if !(cfg.min_dispense_kg > 0.0 && cfg.min_dispense_kg <= cfg.manual_target_kg) {
        return Err(invalid("min_dispense_kg must be in (0, manual_target_kg]"));
    }
    if cfg.feeding_timeout_ms == 0 {
        return Err(invalid("feeding_timeout_ms must be >= 1"));
    }
    if cfg.feeding_timeout_ms > 10 * 60 * 1000 {
        return Err(invalid("feeding_timeout_ms is unreasonably large (>10min)"));
    }
    if cfg.cooldown_ms > 24 * 60 * 60 * 1000 {
        return Err(invalid("cooldown_ms is unreasonably large (>24h)"));
    }
    if cfg.manual_pulse_on_ms == 0
        || cfg.pulse_off_ms == 0
        || cfg.long_pulse_on_ms == 0
        || cfg.short_pulse_on_ms == 0
    {
        return Err(invalid("pulse durations must be >= 1"));
    }
    if cfg.settle_ms == 0 {
        return Err(invalid("settle_ms must be >= 1"));
    }
    if !(cfg.phase_threshold > 0.0 && cfg.phase_threshold < 1.0) {
        return Err(invalid("phase_threshold must be in (0, 1)"));
    }
    if !(cfg.stop_early_factor > 0.0 && cfg.stop_early_factor <= 1.0) {
        return Err(invalid("stop_early_factor must be in (0, 1]"));
    }
    if cfg.sensor_timeout_ms == 0 {
        return Err(invalid("sensor_timeout_ms must be >= 1"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{SharedRelay, SharedWeight};

    fn cfg() -> FeedingCfg {
        FeedingCfg::default()
    }

    #[test]
    fn builds_with_defaults() {
        let engine = FeedingEngineBuilder::new()
            .with_weight_sensor(SharedWeight::new(1.0))
            .with_relay(SharedRelay::default())
            .build();
        assert!(engine.is_ok());
    }

    #[test]
    fn missing_sensor_is_a_typed_error() {
        let err = FeedingEngineBuilder::new()
            .with_relay(SharedRelay::default())
            .build()
            .expect_err("must fail");
        assert!(format!("{err}").contains("missing weight sensor"));
    }

    #[test]
    fn missing_relay_is_a_typed_error() {
        let err = FeedingEngineBuilder::new()
            .with_weight_sensor(SharedWeight::new(1.0))
            .build()
            .expect_err("must fail");
        assert!(format!("{err}").contains("missing relay"));
    }

    #[test]
    fn rejects_pulse_threshold_at_or_above_target() {
        let bad = FeedingCfg {
            manual_pulse_threshold_kg: 0.15,
            ..cfg()
        };
        let err = build_engine(
            SharedWeight::new(1.0),
            SharedRelay::default(),
            bad,
            None,
            None,
        )
        .expect_err("must fail");
        assert!(format!("{err}").contains("manual_pulse_threshold_kg"));
    }

    #[test]
    fn rejects_out_of_range_ratios() {
        for (phase, stop_early) in [(0.0, 0.85), (1.0, 0.85), (0.3, 0.0), (0.3, 1.5)] {
            let bad = FeedingCfg {
                phase_threshold: phase,
                stop_early_factor: stop_early,
                ..cfg()
            };
            assert!(
                build_engine(
                    SharedWeight::new(1.0),
                    SharedRelay::default(),
                    bad,
                    None,
                    None,
                )
                .is_err(),
                "phase={phase} stop_early={stop_early} must be rejected"
            );
        }
    }

    #[test]
    fn rejects_zero_durations() {
        let bad = FeedingCfg {
            settle_ms: 0,
            ..cfg()
        };
        assert!(
            build_engine(
                SharedWeight::new(1.0),
                SharedRelay::default(),
                bad,
                None,
                None,
            )
            .is_err()
        );
    }
}
