//! Minimal simulated feed on a manual clock: a scheduled 0.2 kg ration
//! dispensed by pulse-and-weigh, printed as it completes.

use std::time::Duration;

use feeder_core::mocks::{ManualClock, SharedRelay, SharedWeight};
use feeder_core::{FeedingCfg, FeedingState, FeedingTrigger, build_engine};

fn main() -> eyre::Result<()> {
    let clock = ManualClock::new();
    let weight = SharedWeight::new(1.0);
    let relay = SharedRelay::default();
    let mut engine = build_engine(
        weight.clone(),
        relay.clone(),
        FeedingCfg::default(),
        Some(Box::new(clock.clone())),
        Some(Box::new(|o| println!("complete: {o:?}"))),
    )?;

    assert!(engine.start_feeding(FeedingTrigger::Schedule, 0.2));
    while engine.state() != FeedingState::Idle {
        // 0.5 g per millisecond of motor-on time.
        if relay.is_energized() {
            weight.drain(0.0005);
        }
        clock.advance(Duration::from_millis(1));
        engine.update();
    }
    println!("final dispensed: {:.3} kg", engine.dispensed_kg());
    Ok(())
}
