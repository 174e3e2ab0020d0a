//! Feeding engine state machine tests, driven tick by tick on a manual
//! clock with shared sensor/relay doubles.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use feeder_core::mocks::{ManualClock, SentinelWeight, SharedRelay, SharedWeight};
use feeder_core::{
    FeedingCfg, FeedingEngine, FeedingOutcome, FeedingResult, FeedingState, FeedingTrigger,
    build_engine,
};
use rstest::rstest;

const TICK_MS: u64 = 10;

struct Rig {
    engine: FeedingEngine<SharedWeight, SharedRelay>,
    weight: SharedWeight,
    relay: SharedRelay,
    clock: ManualClock,
    completions: Rc<Cell<u32>>,
    last_outcome: Rc<RefCell<Option<FeedingOutcome>>>,
}

fn rig_with(cfg: FeedingCfg, initial_kg: f32) -> Rig {
    let clock = ManualClock::new();
    let weight = SharedWeight::new(initial_kg);
    let relay = SharedRelay::default();
    let completions = Rc::new(Cell::new(0));
    let last_outcome = Rc::new(RefCell::new(None));
    let count = Rc::clone(&completions);
    let outcome_slot = Rc::clone(&last_outcome);
    let engine = build_engine(
        weight.clone(),
        relay.clone(),
        cfg,
        Some(Box::new(clock.clone())),
        Some(Box::new(move |o| {
            count.set(count.get() + 1);
            *outcome_slot.borrow_mut() = Some(o);
        })),
    )
    .expect("build engine");
    Rig {
        engine,
        weight,
        relay,
        clock,
        completions,
        last_outcome,
    }
}

fn rig(initial_kg: f32) -> Rig {
    rig_with(FeedingCfg::default(), initial_kg)
}

impl Rig {
    /// One scheduler tick: advance time, then update.
    fn tick(&mut self) {
        self.clock.advance(Duration::from_millis(TICK_MS));
        self.engine.update();
    }

    /// Tick, draining the hopper first whenever the relay is energized.
    fn tick_draining(&mut self, kg_per_tick: f32) {
        if self.relay.is_energized() {
            self.weight.drain(kg_per_tick);
        }
        self.tick();
    }
}

// ── start_feeding contract ───────────────────────────────────────────────

#[test]
fn start_rejected_when_not_idle_changes_nothing() {
    let mut r = rig(1.0);
    assert!(r.engine.start_feeding(FeedingTrigger::Manual, 0.0));
    assert_eq!(r.engine.state(), FeedingState::Starting);

    assert!(!r.engine.start_feeding(FeedingTrigger::Schedule, 0.3));
    assert_eq!(r.engine.state(), FeedingState::Starting);
    assert_eq!(r.engine.trigger(), FeedingTrigger::Manual);
    assert_eq!(r.engine.last_result(), FeedingResult::None);
}

#[rstest]
#[case::low_level(0.1, FeedingTrigger::Manual, 0.0, FeedingResult::LowLevel)]
#[case::schedule_shortfall(0.25, FeedingTrigger::Schedule, 0.3, FeedingResult::LowLevel)]
#[case::invalid_trigger(1.0, FeedingTrigger::None, 0.0, FeedingResult::Error)]
fn rejected_attempts_leave_engine_idle(
    #[case] initial_kg: f32,
    #[case] trigger: FeedingTrigger,
    #[case] target_kg: f32,
    #[case] expected: FeedingResult,
) {
    let mut r = rig(initial_kg);
    assert!(!r.engine.start_feeding(trigger, target_kg));
    assert_eq!(r.engine.last_result(), expected);
    assert_eq!(r.engine.state(), FeedingState::Idle);
    assert_eq!(r.engine.trigger(), FeedingTrigger::None);

    // The motor must never have been activated.
    assert!(!r.relay.is_energized());
    for _ in 0..5 {
        r.tick();
    }
    assert!(!r.relay.is_energized());
    assert_eq!(r.completions.get(), 0, "no attempt, no completion");
}

#[test]
fn sentinel_reading_at_start_keeps_idle() {
    let relay = SharedRelay::default();
    let mut engine = build_engine(
        SentinelWeight,
        relay.clone(),
        FeedingCfg::default(),
        None,
        None,
    )
    .expect("build engine");
    assert!(!engine.start_feeding(FeedingTrigger::Manual, 0.0));
    assert_eq!(engine.last_result(), FeedingResult::Error);
    assert_eq!(engine.state(), FeedingState::Idle);
    assert!(!relay.is_energized());
}

#[test]
fn failed_reading_at_start_keeps_idle() {
    let mut r = rig(1.0);
    r.weight.set_failing(true);
    assert!(!r.engine.start_feeding(FeedingTrigger::Schedule, 0.2));
    assert_eq!(r.engine.last_result(), FeedingResult::Error);
    assert_eq!(r.engine.state(), FeedingState::Idle);
}

// ── manual feeding ───────────────────────────────────────────────────────

#[test]
fn manual_feed_end_to_end() {
    let mut r = rig(1.0);
    assert!(r.engine.start_feeding(FeedingTrigger::Manual, 0.0));

    // Hopper loses 0.02 kg per tick while the motor is on.
    let mut ticks = 0;
    while r.engine.is_feeding() {
        r.tick_draining(0.02);
        ticks += 1;
        assert!(ticks < 1000, "manual feed did not converge");
    }

    assert_eq!(r.engine.state(), FeedingState::Finishing);
    assert_eq!(r.engine.last_result(), FeedingResult::Success);
    let dispensed = r.engine.dispensed_kg();
    assert!(
        (0.1..=0.12).contains(&dispensed),
        "dispensed {dispensed} out of expected band"
    );

    // Finishing resolves on the next tick; cooldown then blocks restarts.
    r.tick();
    assert_eq!(r.engine.state(), FeedingState::Cooldown);
    assert!(!r.relay.is_energized());
    assert!(!r.engine.start_feeding(FeedingTrigger::Manual, 0.0));
    assert_eq!(r.completions.get(), 0, "completion only fires at cooldown expiry");

    // Hold for the full cooldown; 999 ticks = 9.99 s < 10 s.
    for _ in 0..999 {
        r.tick();
        assert!(!r.relay.is_energized());
    }
    assert_eq!(r.engine.state(), FeedingState::Cooldown);
    r.tick();
    assert_eq!(r.engine.state(), FeedingState::Idle);
    assert_eq!(r.engine.trigger(), FeedingTrigger::None);
    assert_eq!(r.engine.last_result(), FeedingResult::None);
    assert_eq!(r.completions.get(), 1);

    let outcome = r.last_outcome.borrow().expect("outcome captured");
    assert_eq!(outcome.trigger, FeedingTrigger::Manual);
    assert_eq!(outcome.result, FeedingResult::Success);
    assert!((outcome.dispensed_kg - dispensed).abs() < 1e-6);

    // Frozen dispensed amount survives into idle.
    assert!((r.engine.dispensed_kg() - dispensed).abs() < 1e-6);

    // More idle ticks never re-fire the completion hook.
    for _ in 0..50 {
        r.tick();
    }
    assert_eq!(r.completions.get(), 1);
}

#[test]
fn manual_switches_to_pulsing_at_threshold() {
    let mut r = rig(1.0);
    assert!(r.engine.start_feeding(FeedingTrigger::Manual, 0.0));

    let mut ticks = 0;
    while r.engine.state() != FeedingState::Pulsing {
        r.tick_draining(0.02);
        ticks += 1;
        assert!(ticks < 100, "never reached pulsing");
    }
    // 0.075 kg threshold crossed strictly below the 0.1 kg success mark.
    let dispensed = r.engine.dispensed_kg();
    assert!(dispensed >= 0.075 && dispensed < 0.1, "dispensed {dispensed}");
    assert!(r.engine.motor().is_pulsing());
}

#[test]
fn manual_success_lands_in_the_off_phase_too() {
    let mut r = rig(1.0);
    assert!(r.engine.start_feeding(FeedingTrigger::Manual, 0.0));
    let mut ticks = 0;
    while r.engine.state() != FeedingState::Pulsing {
        r.tick_draining(0.02);
        ticks += 1;
        assert!(ticks < 100);
    }

    // Let the 50 ms on phase expire without dispensing anything.
    while r.relay.is_energized() {
        r.tick();
        ticks += 1;
        assert!(ticks < 100);
    }
    assert!(r.engine.motor().is_pulsing());
    assert!(!r.engine.motor().is_running());

    // Feed already in flight lands on the scale during the off phase.
    r.weight.set(0.88);
    r.tick();
    assert_eq!(r.engine.last_result(), FeedingResult::Success);
    assert_eq!(r.engine.state(), FeedingState::Finishing);
    assert!(!r.relay.is_energized());
}

// ── scheduled pulse-and-weigh ────────────────────────────────────────────

/// Drives a scheduled attempt where each completed motor burst drops a
/// fixed mass onto the bowl. Returns the pulse on-times armed per cycle.
fn run_schedule(r: &mut Rig, target_kg: f32, kg_per_burst: f32) -> Vec<u64> {
    assert!(r.engine.start_feeding(FeedingTrigger::Schedule, target_kg));
    let before = r.weight.get();
    let mut on_times = Vec::new();
    let mut dispensed = 0.0f32;
    let mut prev_state = r.engine.state();
    let mut prev_on = r.relay.is_energized();
    let mut ticks = 0;
    while r.engine.is_feeding() {
        r.tick();
        ticks += 1;
        assert!(ticks < 10_000, "schedule feed did not converge");

        let state = r.engine.state();
        if state == FeedingState::Pulsing && prev_state != FeedingState::Pulsing {
            on_times.push(r.engine.motor().pulse_timing().on_ms);
        }
        prev_state = state;

        let on = r.relay.is_energized();
        if prev_on && !on {
            dispensed += kg_per_burst;
            r.weight.set(before - dispensed);
        }
        prev_on = on;
    }
    on_times
}

#[test]
fn schedule_selects_long_then_short_pulses() {
    let mut r = rig(1.0);
    // Remaining ratio over 0.3 kg: long while > 0.3, short at and below.
    let on_times = run_schedule(&mut r, 0.3, 0.03);
    assert_eq!(
        on_times,
        vec![150, 150, 150, 150, 150, 150, 150, 50, 50],
        "adaptive pulse widths across settle cycles"
    );
    assert_eq!(r.engine.last_result(), FeedingResult::Success);
}

#[test]
fn schedule_stops_early_with_no_extra_cycles() {
    let mut r = rig(1.0);
    // Success threshold 0.2 * 0.85 = 0.17 kg; at 0.03 kg per burst the
    // sixth burst (0.18 kg) is the first to reach it.
    let on_times = run_schedule(&mut r, 0.2, 0.03);
    assert_eq!(on_times.len(), 6, "no more pulse cycles than required");
    assert_eq!(on_times, vec![150, 150, 150, 150, 150, 50]);
    assert_eq!(r.engine.last_result(), FeedingResult::Success);

    // Settle into cooldown and check the frozen dispensed mass.
    r.tick();
    assert_eq!(r.engine.state(), FeedingState::Cooldown);
    assert!((r.engine.dispensed_kg() - 0.18).abs() < 1e-3);
}

#[test]
fn schedule_settles_with_motor_off_between_cycles() {
    let mut r = rig(1.0);
    assert!(r.engine.start_feeding(FeedingTrigger::Schedule, 0.3));
    let mut ticks = 0;
    while r.engine.state() != FeedingState::Settling {
        r.tick();
        ticks += 1;
        assert!(ticks < 200, "never reached settling");
    }
    // The dwell holds with the motor stopped until the settle time elapses.
    for _ in 0..(400 / TICK_MS - 2) {
        r.tick();
        assert_eq!(r.engine.state(), FeedingState::Settling);
        assert!(!r.relay.is_energized());
    }
}

// ── timeout precedence ───────────────────────────────────────────────────

#[test]
fn timeout_supersedes_in_dispensing() {
    let mut r = rig(1.0);
    assert!(r.engine.start_feeding(FeedingTrigger::Manual, 0.0));
    r.tick(); // Starting -> Dispensing
    assert_eq!(r.engine.state(), FeedingState::Dispensing);

    r.clock.advance(Duration::from_millis(30_000));
    r.engine.update();
    assert_eq!(r.engine.state(), FeedingState::Finishing);
    assert_eq!(r.engine.last_result(), FeedingResult::Timeout);
    assert!(!r.relay.is_energized());
}

#[test]
fn timeout_supersedes_in_pulsing() {
    let mut r = rig(1.0);
    assert!(r.engine.start_feeding(FeedingTrigger::Manual, 0.0));
    let mut ticks = 0;
    while r.engine.state() != FeedingState::Pulsing {
        r.tick_draining(0.02);
        ticks += 1;
        assert!(ticks < 100);
    }

    r.clock.advance(Duration::from_millis(30_000));
    r.engine.update();
    assert_eq!(r.engine.state(), FeedingState::Finishing);
    assert_eq!(r.engine.last_result(), FeedingResult::Timeout);
    assert!(!r.relay.is_energized());
}

#[test]
fn timeout_supersedes_success_in_settling() {
    let mut r = rig(1.0);
    assert!(r.engine.start_feeding(FeedingTrigger::Schedule, 0.3));
    let mut ticks = 0;
    while r.engine.state() != FeedingState::Settling {
        r.tick();
        ticks += 1;
        assert!(ticks < 200);
    }

    // Even with the target already reached on the scale, an expired budget
    // must win the tick.
    r.weight.set(0.6);
    r.clock.advance(Duration::from_millis(30_000));
    r.engine.update();
    assert_eq!(r.engine.last_result(), FeedingResult::Timeout);
}

// ── aborts and failures ──────────────────────────────────────────────────

#[test]
fn stop_feeding_takes_effect_on_the_same_tick() {
    let mut r = rig(1.0);
    assert!(r.engine.start_feeding(FeedingTrigger::Manual, 0.0));
    r.tick();
    assert!(r.relay.is_energized());

    r.engine.stop_feeding(FeedingResult::Error);
    assert!(!r.relay.is_energized(), "motor stops synchronously");
    assert_eq!(r.engine.state(), FeedingState::Finishing);
    assert_eq!(r.engine.last_result(), FeedingResult::Error);

    // The aborted attempt still runs its cooldown and notifies once.
    for _ in 0..1100 {
        r.tick();
    }
    assert_eq!(r.engine.state(), FeedingState::Idle);
    assert_eq!(r.completions.get(), 1);
    let outcome = r.last_outcome.borrow().expect("outcome captured");
    assert_eq!(outcome.result, FeedingResult::Error);
}

#[test]
fn sensor_failure_mid_attempt_aborts_with_error() {
    let mut r = rig(1.0);
    assert!(r.engine.start_feeding(FeedingTrigger::Manual, 0.0));
    r.tick();
    assert_eq!(r.engine.state(), FeedingState::Dispensing);

    r.weight.set_failing(true);
    r.tick();
    assert_eq!(r.engine.state(), FeedingState::Finishing);
    assert_eq!(r.engine.last_result(), FeedingResult::Error);
    assert!(!r.relay.is_energized());

    // Finishing tolerates the failed boundary read and still cools down.
    r.tick();
    assert_eq!(r.engine.state(), FeedingState::Cooldown);
}

// ── queries ──────────────────────────────────────────────────────────────

#[test]
fn dispensed_amount_is_live_then_frozen() {
    let mut r = rig(1.0);
    assert!(r.engine.start_feeding(FeedingTrigger::Manual, 0.0));
    r.tick();
    assert_eq!(r.engine.state(), FeedingState::Dispensing);

    r.weight.set(0.95);
    r.tick();
    assert!((r.engine.dispensed_kg() - 0.05).abs() < 1e-6, "live reading");

    r.engine.stop_feeding(FeedingResult::Error);
    r.tick(); // Finishing captures the after-weight
    assert_eq!(r.engine.state(), FeedingState::Cooldown);
    let frozen = r.engine.dispensed_kg();
    assert!((frozen - 0.05).abs() < 1e-6);

    // Later sensor movement no longer changes the frozen amount.
    r.weight.set(0.5);
    r.tick();
    assert!((r.engine.dispensed_kg() - frozen).abs() < 1e-6);
}

#[test]
fn weight_before_is_captured_at_start() {
    let mut r = rig(0.8);
    assert!(r.engine.start_feeding(FeedingTrigger::Schedule, 0.2));
    assert!((r.engine.weight_before_kg() - 0.8).abs() < 1e-6);
}
