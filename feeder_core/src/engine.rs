//! The feeding control engine.
//!
//! Sequences one feeding attempt from trigger to completion: continuous or
//! pulsed motor drive, settle-and-reweigh cycles, stop-early compensation,
//! timeout and cooldown enforcement. Strictly non-blocking: an external
//! driver loop calls `update()` every few milliseconds and every state
//! transition completes within a single call.
//!
//! Mass arithmetic is integer fixed-point in grams (1 g = 0.001 kg) using
//! `i32`. Sensor readings and config thresholds are quantized once; the
//! control path compares integers only. Public queries convert back to kg.

use std::sync::Arc;
use std::time::{Duration, Instant};

use feeder_traits::clock::Clock;
use feeder_traits::{RelayLine, SENSOR_ERROR_KG, WeightSensor};

use crate::config::FeedingCfg;
use crate::motor::MotorFsm;
use crate::status::{FeedingOutcome, FeedingResult, FeedingState, FeedingTrigger};
use crate::util::{g_to_kg, quantize_kg_to_g};

/// Closed-loop feeding controller. Owns one motor FSM outright; the weight
/// capability is held only for reading and may be polled several times per
/// tick (full-precision at attempt boundaries, fast during the attempt).
pub struct FeedingEngine<W: WeightSensor, R: RelayLine> {
    sensor: W,
    motor: MotorFsm<R>,
    cfg: FeedingCfg,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,

    state: FeedingState,
    trigger: FeedingTrigger,
    last_result: FeedingResult,

    // Attempt record, fixed at start_feeding and discarded when cooldown
    // completes. All masses in grams.
    target_g: i32,
    success_g: i32,
    pulse_threshold_g: i32,
    weight_before_g: i32,
    weight_after_g: i32,
    last_weight_g: i32,
    feeding_started_ms: u64,
    cooldown_started_ms: u64,
    settle_started_ms: u64,

    // Quantized config thresholds
    low_level_g: i32,
    manual_target_g: i32,
    manual_pulse_threshold_g: i32,
    min_dispense_g: i32,

    completion_hook: Option<Box<dyn FnMut(FeedingOutcome)>>,
}

impl<W: WeightSensor, R: RelayLine> core::fmt::Debug for FeedingEngine<W, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FeedingEngine")
            .field("state", &self.state)
            .field("trigger", &self.trigger)
            .field("target_kg", &g_to_kg(self.target_g))
            .field("last_weight_kg", &g_to_kg(self.last_weight_g))
            .finish()
    }
}

impl<W: WeightSensor, R: RelayLine> FeedingEngine<W, R> {
    pub(crate) fn new(
        sensor: W,
        relay: R,
        cfg: FeedingCfg,
        clock: Arc<dyn Clock + Send + Sync>,
        completion_hook: Option<Box<dyn FnMut(FeedingOutcome)>>,
    ) -> Self {
        let epoch = clock.now();
        let motor = MotorFsm::new(relay, Arc::clone(&clock));
        let low_level_g = quantize_kg_to_g(cfg.low_level_threshold_kg);
        let manual_target_g = quantize_kg_to_g(cfg.manual_target_kg);
        let manual_pulse_threshold_g = quantize_kg_to_g(cfg.manual_pulse_threshold_kg);
        let min_dispense_g = quantize_kg_to_g(cfg.min_dispense_kg);
        Self {
            sensor,
            motor,
            cfg,
            clock,
            epoch,
            state: FeedingState::Idle,
            trigger: FeedingTrigger::None,
            last_result: FeedingResult::None,
            target_g: 0,
            success_g: 0,
            pulse_threshold_g: 0,
            weight_before_g: 0,
            weight_after_g: 0,
            last_weight_g: 0,
            feeding_started_ms: 0,
            cooldown_started_ms: 0,
            settle_started_ms: 0,
            low_level_g,
            manual_target_g,
            manual_pulse_threshold_g,
            min_dispense_g,
            completion_hook,
        }
    }

    /// Register the completion notification, invoked exactly once per
    /// attempt when cooldown expires, before trigger and result are reset.
    pub fn set_completion_hook<F>(&mut self, hook: F)
    where
        F: FnMut(FeedingOutcome) + 'static,
    {
        self.completion_hook = Some(Box::new(hook));
    }

    /// Begin a feeding attempt. Only accepted from `Idle` with a `Manual`
    /// or `Schedule` trigger; the target mass is the configured manual
    /// ration for manual feeds and `target_kg` for scheduled ones.
    ///
    /// Returns false without any state transition when the attempt is
    /// rejected; `last_result()` then carries the reason (`Error` for an
    /// invalid trigger or failed reading, `LowLevel` for insufficient
    /// food). The external layer is responsible for surfacing rejections.
    pub fn start_feeding(&mut self, trigger: FeedingTrigger, target_kg: f32) -> bool {
        if self.state != FeedingState::Idle {
            tracing::warn!(state = ?self.state, "start_feeding rejected: attempt already active");
            return false;
        }

        let (target_g, pulse_threshold_g, success_g) = match trigger {
            FeedingTrigger::Manual => (
                self.manual_target_g,
                self.manual_pulse_threshold_g,
                self.min_dispense_g,
            ),
            FeedingTrigger::Schedule => {
                let target_g = quantize_kg_to_g(target_kg);
                // Accept the stop-early fraction of the ration; in-flight
                // feed lands during settling.
                let success_g = (target_g as f32 * self.cfg.stop_early_factor).round() as i32;
                (target_g, 0, success_g)
            }
            FeedingTrigger::None => {
                tracing::warn!("start_feeding rejected: invalid trigger");
                self.last_result = FeedingResult::Error;
                return false;
            }
        };

        let Some(before_g) = self.read_boundary_g() else {
            self.last_result = FeedingResult::Error;
            return false;
        };
        if before_g < self.low_level_g {
            tracing::warn!(
                weight_kg = g_to_kg(before_g),
                "start_feeding rejected: food level low"
            );
            self.last_result = FeedingResult::LowLevel;
            return false;
        }
        if trigger == FeedingTrigger::Schedule && before_g < target_g {
            tracing::warn!(
                weight_kg = g_to_kg(before_g),
                target_kg = g_to_kg(target_g),
                "start_feeding rejected: not enough food for scheduled ration"
            );
            self.last_result = FeedingResult::LowLevel;
            return false;
        }

        self.trigger = trigger;
        self.target_g = target_g;
        self.pulse_threshold_g = pulse_threshold_g;
        self.success_g = success_g;
        self.weight_before_g = before_g;
        self.weight_after_g = before_g;
        self.last_result = FeedingResult::None;
        self.feeding_started_ms = self.now_ms();
        self.state = FeedingState::Starting;
        tracing::info!(
            ?trigger,
            target_kg = g_to_kg(target_g),
            weight_kg = g_to_kg(before_g),
            "feeding started"
        );
        true
    }

    /// Stop the motor unconditionally and move to Finishing with the given
    /// result. Externally requested aborts land here; cancellation takes
    /// effect on the tick it is issued.
    pub fn stop_feeding(&mut self, result: FeedingResult) {
        self.motor.stop();
        self.last_result = result;
        self.state = FeedingState::Finishing;
        tracing::debug!(?result, "feeding stopping");
    }

    /// Advance the state machine one tick, then tick the motor FSM.
    pub fn update(&mut self) {
        match self.state {
            FeedingState::Idle => {}
            FeedingState::Starting => self.handle_starting(),
            FeedingState::Dispensing => self.handle_dispensing(),
            FeedingState::Pulsing => self.handle_pulsing(),
            FeedingState::Settling => self.handle_settling(),
            FeedingState::Finishing => self.handle_finishing(),
            FeedingState::Cooldown => self.handle_cooldown(),
        }
        // Pulse bookkeeping runs every tick regardless of feeding state.
        self.motor.update();
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// An attempt is in its active phase.
    pub fn is_feeding(&self) -> bool {
        matches!(
            self.state,
            FeedingState::Starting
                | FeedingState::Dispensing
                | FeedingState::Pulsing
                | FeedingState::Settling
        )
    }

    pub fn state(&self) -> FeedingState {
        self.state
    }

    pub fn trigger(&self) -> FeedingTrigger {
        self.trigger
    }

    pub fn last_result(&self) -> FeedingResult {
        self.last_result
    }

    /// Mass removed from the hopper: the live difference while an attempt
    /// is active, frozen to the captured before/after difference once the
    /// engine is idle or cooling down.
    pub fn dispensed_kg(&self) -> f32 {
        match self.state {
            FeedingState::Idle | FeedingState::Cooldown => {
                g_to_kg(self.weight_before_g - self.weight_after_g)
            }
            _ => g_to_kg(self.weight_before_g - self.last_weight_g),
        }
    }

    /// Hopper mass captured before the current/last attempt activated the
    /// motor.
    pub fn weight_before_kg(&self) -> f32 {
        g_to_kg(self.weight_before_g)
    }

    /// Most recent accepted sensor reading.
    pub fn last_weight_kg(&self) -> f32 {
        g_to_kg(self.last_weight_g)
    }

    /// Read-only view of the owned motor FSM.
    pub fn motor(&self) -> &MotorFsm<R> {
        &self.motor
    }

    // ── State handlers ───────────────────────────────────────────────────

    fn handle_starting(&mut self) {
        match self.trigger {
            FeedingTrigger::Manual => {
                self.motor.start();
                self.state = FeedingState::Dispensing;
            }
            FeedingTrigger::Schedule => {
                let Some(w_g) = self.read_live_g() else {
                    self.stop_feeding(FeedingResult::Error);
                    return;
                };
                let on_ms = self.select_pulse_on_ms(self.weight_before_g - w_g);
                self.motor.start_pulsing(on_ms, self.cfg.pulse_off_ms);
                self.state = FeedingState::Pulsing;
                tracing::debug!(on_ms, "pulse cycle armed");
            }
            FeedingTrigger::None => self.stop_feeding(FeedingResult::Error),
        }
    }

    /// Manual feeds only: continuous run until the pulse threshold, the
    /// success threshold, or the timeout is reached.
    fn handle_dispensing(&mut self) {
        if self.timeout_reached() {
            self.stop_feeding(FeedingResult::Timeout);
            return;
        }
        let Some(w_g) = self.read_live_g() else {
            self.stop_feeding(FeedingResult::Error);
            return;
        };
        let dispensed_g = self.weight_before_g - w_g;
        if dispensed_g >= self.success_g {
            self.stop_feeding(FeedingResult::Success);
            return;
        }
        if dispensed_g >= self.pulse_threshold_g {
            self.motor
                .start_pulsing(self.cfg.manual_pulse_on_ms, self.cfg.pulse_off_ms);
            self.state = FeedingState::Pulsing;
            tracing::debug!(
                dispensed_kg = g_to_kg(dispensed_g),
                "switching to pulsed drive"
            );
        }
    }

    fn handle_pulsing(&mut self) {
        if self.timeout_reached() {
            self.stop_feeding(FeedingResult::Timeout);
            return;
        }
        match self.trigger {
            FeedingTrigger::Manual => {
                // Success can land in either pulse phase.
                let Some(w_g) = self.read_live_g() else {
                    self.stop_feeding(FeedingResult::Error);
                    return;
                };
                if self.weight_before_g - w_g >= self.success_g {
                    self.stop_feeding(FeedingResult::Success);
                }
            }
            FeedingTrigger::Schedule => {
                // Burst delivered once the FSM reports the off phase: not
                // running but still pulsing. Stop and let the scale settle.
                if self.motor.is_pulsing() && !self.motor.is_running() {
                    self.motor.stop();
                    self.settle_started_ms = self.now_ms();
                    self.state = FeedingState::Settling;
                }
            }
            FeedingTrigger::None => self.stop_feeding(FeedingResult::Error),
        }
    }

    /// Scheduled feeds only: wait out the settle dwell with the motor off,
    /// then re-weigh and either finish or arm the next pulse cycle.
    fn handle_settling(&mut self) {
        if self.timeout_reached() {
            self.stop_feeding(FeedingResult::Timeout);
            return;
        }
        let now = self.now_ms();
        if now.saturating_sub(self.settle_started_ms) < self.cfg.settle_ms {
            return;
        }
        let Some(w_g) = self.read_live_g() else {
            self.stop_feeding(FeedingResult::Error);
            return;
        };
        let dispensed_g = self.weight_before_g - w_g;
        if dispensed_g >= self.success_g {
            self.stop_feeding(FeedingResult::Success);
            return;
        }
        let on_ms = self.select_pulse_on_ms(dispensed_g);
        self.motor.start_pulsing(on_ms, self.cfg.pulse_off_ms);
        self.state = FeedingState::Pulsing;
        tracing::debug!(
            on_ms,
            dispensed_kg = g_to_kg(dispensed_g),
            "pulse cycle re-armed"
        );
    }

    fn handle_finishing(&mut self) {
        self.motor.stop();
        // Final weight only after the motor is confirmed stopped; never a
        // live in-motion reading.
        self.weight_after_g = match self.read_boundary_g() {
            Some(g) => g,
            None => {
                tracing::warn!("post-attempt weight read failed; using last live reading");
                self.last_weight_g
            }
        };
        self.cooldown_started_ms = self.now_ms();
        self.state = FeedingState::Cooldown;
        tracing::info!(
            result = ?self.last_result,
            dispensed_kg = self.dispensed_kg(),
            "attempt finished, cooling down"
        );
    }

    fn handle_cooldown(&mut self) {
        let now = self.now_ms();
        if now.saturating_sub(self.cooldown_started_ms) < self.cfg.cooldown_ms {
            return;
        }
        // Notify before resetting so the hook observes trigger and result.
        let outcome = FeedingOutcome {
            trigger: self.trigger,
            result: self.last_result,
            dispensed_kg: self.dispensed_kg(),
            target_kg: g_to_kg(self.target_g),
        };
        if let Some(hook) = self.completion_hook.as_mut() {
            hook(outcome);
        }
        self.state = FeedingState::Idle;
        self.trigger = FeedingTrigger::None;
        self.last_result = FeedingResult::None;
        tracing::debug!("cooldown complete, engine idle");
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    /// Coarse far from target, fine near it: long pulse while the remaining
    /// fraction of the ration exceeds the phase threshold.
    fn select_pulse_on_ms(&self, dispensed_g: i32) -> u64 {
        if self.target_g <= 0 {
            return self.cfg.short_pulse_on_ms;
        }
        let remaining_g = self.target_g - dispensed_g;
        let remaining_ratio = remaining_g as f32 / self.target_g as f32;
        if remaining_ratio > self.cfg.phase_threshold {
            self.cfg.long_pulse_on_ms
        } else {
            self.cfg.short_pulse_on_ms
        }
    }

    fn timeout_reached(&self) -> bool {
        self.now_ms().saturating_sub(self.feeding_started_ms) >= self.cfg.feeding_timeout_ms
    }

    /// Full-precision reading in grams; `None` on a failed or sentinel
    /// reading.
    fn read_boundary_g(&mut self) -> Option<i32> {
        let timeout = Duration::from_millis(self.cfg.sensor_timeout_ms);
        let reading = self.sensor.read_weight(timeout);
        self.accept_reading(reading)
    }

    /// Lower-sample reading in grams for mid-attempt feedback.
    fn read_live_g(&mut self) -> Option<i32> {
        let timeout = Duration::from_millis(self.cfg.sensor_timeout_ms);
        let reading = self.sensor.read_weight_fast(timeout);
        self.accept_reading(reading)
    }

    fn accept_reading(
        &mut self,
        reading: Result<f32, Box<dyn std::error::Error + Send + Sync>>,
    ) -> Option<i32> {
        match reading {
            // Values at or below the sentinel are failed reads, never a
            // literal negative mass.
            Ok(kg) if kg.is_finite() && kg > SENSOR_ERROR_KG => {
                let g = quantize_kg_to_g(kg);
                self.last_weight_g = g;
                Some(g)
            }
            Ok(kg) => {
                tracing::warn!(kg, "weight source returned error sentinel");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "weight read failed");
                None
            }
        }
    }

    #[inline]
    fn now_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }
}
