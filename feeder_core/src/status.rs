//! Feeding state machine vocabulary: states, triggers, and results.

/// Phase of the feeding state machine. Cooldown always returns to Idle; all
/// other states are transient within one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedingState {
    #[default]
    Idle,
    Starting,
    Dispensing,
    Pulsing,
    Settling,
    Finishing,
    Cooldown,
}

/// What started the current attempt. Fixed for the attempt's duration and
/// reset to `None` only when cooldown completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedingTrigger {
    #[default]
    None,
    /// Feed-now command; fixed configured ration.
    Manual,
    /// Scheduler-supplied ration with a caller-chosen mass.
    Schedule,
}

/// Outcome of the most recent attempt. Set once per attempt when it leaves
/// its active phase; cleared back to `None` when cooldown completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedingResult {
    #[default]
    None,
    Success,
    /// Insufficient food to safely or faithfully start.
    LowLevel,
    /// Attempt exceeded its time budget.
    Timeout,
    /// Sensor failure, invalid trigger, or an externally forced abort.
    Error,
}

/// Snapshot handed to the completion hook the instant cooldown expires,
/// before trigger and result are reset.
#[derive(Debug, Clone, Copy)]
pub struct FeedingOutcome {
    pub trigger: FeedingTrigger,
    pub result: FeedingResult,
    pub dispensed_kg: f32,
    pub target_kg: f32,
}
