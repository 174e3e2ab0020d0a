//! Non-blocking motor actuation FSM.
//!
//! Owns the relay output and generates continuous or pulsed drive without
//! ever sleeping. `update()` is called every scheduler tick by the feeding
//! engine; between ticks the FSM holds no pending work. All timing uses
//! elapsed milliseconds from one monotonic clock, compared with saturating
//! subtraction so phase arithmetic stays correct across counter wrap.

use std::sync::Arc;
use std::time::Instant;

use feeder_traits::RelayLine;
use feeder_traits::clock::Clock;

/// Motor drive states. The relay is energized iff the state is `Running`,
/// or `Pulsing` with the phase flag on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotorState {
    #[default]
    Idle,
    Running,
    Pulsing,
    Stopped,
}

/// On/off durations for pulsed drive, re-armed on every `start_pulsing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseTiming {
    pub on_ms: u64,
    pub off_ms: u64,
}

pub struct MotorFsm<R: RelayLine> {
    relay: R,
    state: MotorState,
    timing: PulseTiming,
    phase_on: bool,
    phase_started_ms: u64,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
}

impl<R: RelayLine> MotorFsm<R> {
    pub fn new(mut relay: R, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        // Known-safe output level before any command.
        relay.deenergize();
        let epoch = clock.now();
        Self {
            relay,
            state: MotorState::Idle,
            timing: PulseTiming { on_ms: 0, off_ms: 0 },
            phase_on: false,
            phase_started_ms: 0,
            clock,
            epoch,
        }
    }

    /// Energize continuously. No-op unless idle or stopped.
    pub fn start(&mut self) {
        if matches!(self.state, MotorState::Idle | MotorState::Stopped) {
            self.relay.energize();
            self.state = MotorState::Running;
        }
    }

    /// De-energize unconditionally.
    pub fn stop(&mut self) {
        self.relay.deenergize();
        self.state = MotorState::Stopped;
    }

    /// Begin pulsed drive with the given timings. Callable from any state;
    /// always restarts the cycle at the on phase.
    pub fn start_pulsing(&mut self, on_ms: u64, off_ms: u64) {
        self.timing = PulseTiming { on_ms, off_ms };
        self.relay.energize();
        self.phase_on = true;
        self.phase_started_ms = self.now_ms();
        self.state = MotorState::Pulsing;
    }

    /// Replace the timings without disturbing the current phase; takes
    /// effect at the next phase boundary.
    pub fn set_pulse_timings(&mut self, on_ms: u64, off_ms: u64) {
        self.timing = PulseTiming { on_ms, off_ms };
    }

    /// Advance the pulse generator. No-op outside `Pulsing`; idempotent
    /// between phase boundaries, so it may be called arbitrarily often.
    pub fn update(&mut self) {
        if self.state != MotorState::Pulsing {
            return;
        }
        let now = self.now_ms();
        let elapsed = now.saturating_sub(self.phase_started_ms);
        if self.phase_on {
            if elapsed >= self.timing.on_ms {
                self.relay.deenergize();
                self.phase_on = false;
                self.phase_started_ms = now;
            }
        } else if elapsed >= self.timing.off_ms {
            self.relay.energize();
            self.phase_on = true;
            self.phase_started_ms = now;
        }
    }

    /// True while the relay is commanded on: running continuously, or in
    /// the on phase of a pulse cycle.
    pub fn is_running(&self) -> bool {
        self.state == MotorState::Running || (self.state == MotorState::Pulsing && self.phase_on)
    }

    /// True in `Pulsing` regardless of phase.
    pub fn is_pulsing(&self) -> bool {
        self.state == MotorState::Pulsing
    }

    pub fn state(&self) -> MotorState {
        self.state
    }

    /// The armed pulse timings.
    pub fn pulse_timing(&self) -> PulseTiming {
        self.timing
    }

    #[inline]
    fn now_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }
}
