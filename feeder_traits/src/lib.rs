pub mod clock;

pub use clock::{Clock, MonotonicClock};

/// Reserved reading returned by weight sources on hardware failure.
/// Any value at or below this is a failed read, never a literal mass.
pub const SENSOR_ERROR_KG: f32 = -999.0;

/// Load-cell weight source, reporting hopper mass in kilograms.
pub trait WeightSensor {
    /// Averaged reading. Slow; intended for attempt-boundary captures.
    fn read_weight(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<f32, Box<dyn std::error::Error + Send + Sync>>;

    /// Lower-sample reading for mid-attempt feedback. Defaults to the
    /// full-precision read for sources without a fast path.
    fn read_weight_fast(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<f32, Box<dyn std::error::Error + Send + Sync>> {
        self.read_weight(timeout)
    }
}

/// Single digital output driving the feed motor relay.
///
/// Infallible by contract: the actuation FSM has no sensing dependency and
/// no error path, so implementations absorb their own I/O quirks.
pub trait RelayLine {
    /// Close the relay, powering the motor.
    fn energize(&mut self);
    /// Open the relay.
    fn deenergize(&mut self);
}

impl<T: WeightSensor + ?Sized> WeightSensor for Box<T> {
    fn read_weight(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<f32, Box<dyn std::error::Error + Send + Sync>> {
        (**self).read_weight(timeout)
    }

    fn read_weight_fast(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<f32, Box<dyn std::error::Error + Send + Sync>> {
        (**self).read_weight_fast(timeout)
    }
}

impl<T: RelayLine + ?Sized> RelayLine for Box<T> {
    fn energize(&mut self) {
        (**self).energize();
    }

    fn deenergize(&mut self) {
        (**self).deenergize();
    }
}
