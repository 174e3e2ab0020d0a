//! Test and helper doubles for feeder_core.
//!
//! The engine is single-threaded by design, so the sensor and relay doubles
//! share state through `Rc<Cell<_>>`; the clock uses `Arc<Mutex<_>>` because
//! the engine stores it behind `Arc<dyn Clock + Send + Sync>`.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use feeder_traits::clock::Clock;
use feeder_traits::{RelayLine, SENSOR_ERROR_KG, WeightSensor};

/// Deterministic clock whose time is advanced manually.
///
/// now() = origin + offset; sleep(d) advances internal time by d without
/// actually sleeping.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, d: Duration) {
        if let Ok(mut off) = self.offset.lock() {
            *off = off.saturating_add(d);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let off = self.offset.lock().map(|g| *g).unwrap_or(Duration::ZERO);
        self.origin + off
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

/// Weight source backed by a shared cell. Clones observe the same value,
/// so a test can move the "hopper" while the engine polls it.
#[derive(Clone)]
pub struct SharedWeight {
    kg: Rc<Cell<f32>>,
    failing: Rc<Cell<bool>>,
}

impl SharedWeight {
    pub fn new(kg: f32) -> Self {
        Self {
            kg: Rc::new(Cell::new(kg)),
            failing: Rc::new(Cell::new(false)),
        }
    }

    pub fn set(&self, kg: f32) {
        self.kg.set(kg);
    }

    pub fn get(&self) -> f32 {
        self.kg.get()
    }

    pub fn drain(&self, kg: f32) {
        self.kg.set(self.kg.get() - kg);
    }

    /// Make subsequent reads fail with an I/O error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }
}

impl WeightSensor for SharedWeight {
    fn read_weight(
        &mut self,
        _timeout: Duration,
    ) -> Result<f32, Box<dyn std::error::Error + Send + Sync>> {
        if self.failing.get() {
            return Err(Box::new(std::io::Error::other("load cell not responding")));
        }
        Ok(self.kg.get())
    }
}

/// Weight source that always reports the error sentinel instead of failing.
pub struct SentinelWeight;

impl WeightSensor for SentinelWeight {
    fn read_weight(
        &mut self,
        _timeout: Duration,
    ) -> Result<f32, Box<dyn std::error::Error + Send + Sync>> {
        Ok(SENSOR_ERROR_KG)
    }
}

/// Relay spy sharing its line state with the test.
#[derive(Clone, Default)]
pub struct SharedRelay {
    on: Rc<Cell<bool>>,
}

impl SharedRelay {
    pub fn is_energized(&self) -> bool {
        self.on.get()
    }
}

impl RelayLine for SharedRelay {
    fn energize(&mut self) {
        self.on.set(true);
    }

    fn deenergize(&mut self) {
        self.on.set(false);
    }
}
