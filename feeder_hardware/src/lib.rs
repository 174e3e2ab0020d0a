#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
//! Hardware bindings and simulation for the feed dispenser.
//!
//! Real hardware (feature `hardware`, Linux/rppal): an HX711 load-cell
//! frontend with sample averaging, and a GPIO relay output with a
//! configurable active level. Without the feature this crate still provides
//! `SimHopper`, an in-process hopper that drains while its relay is
//! energized, for development and integration tests.

pub mod error;
#[cfg(feature = "hardware")]
pub mod hx711;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use feeder_traits::{RelayLine, WeightSensor};

/// Linear raw-counts → kilograms model for the load cell.
#[derive(Debug, Clone, Copy)]
pub struct ScaleCal {
    pub kg_per_count: f32,
    pub zero_counts: i32,
    pub offset_kg: f32,
}

impl ScaleCal {
    pub fn apply(&self, raw: i64) -> f32 {
        self.kg_per_count * ((raw - self.zero_counts as i64) as f32) + self.offset_kg
    }
}

// ── Simulation ───────────────────────────────────────────────────────────

#[derive(Debug)]
struct HopperState {
    weight_kg: f32,
    flow_kg_per_s: f32,
    energized_since: Option<Instant>,
}

impl HopperState {
    /// Fold the drain accumulated since energize into the stored weight.
    fn settle(&mut self, now: Instant) {
        if let Some(since) = self.energized_since.take() {
            let dt = now.saturating_duration_since(since).as_secs_f32();
            self.weight_kg = (self.weight_kg - self.flow_kg_per_s * dt).max(0.0);
        }
    }

    fn current(&self, now: Instant) -> f32 {
        match self.energized_since {
            Some(since) => {
                let dt = now.saturating_duration_since(since).as_secs_f32();
                (self.weight_kg - self.flow_kg_per_s * dt).max(0.0)
            }
            None => self.weight_kg,
        }
    }
}

/// In-process hopper simulation. The relay and sensor halves share one
/// state: mass drains at a fixed rate while the relay is energized.
#[derive(Debug, Clone)]
pub struct SimHopper {
    state: Rc<RefCell<HopperState>>,
}

impl SimHopper {
    pub fn new(initial_kg: f32, flow_kg_per_s: f32) -> Self {
        Self {
            state: Rc::new(RefCell::new(HopperState {
                weight_kg: initial_kg,
                flow_kg_per_s,
                energized_since: None,
            })),
        }
    }

    pub fn relay(&self) -> SimRelay {
        SimRelay {
            state: Rc::clone(&self.state),
        }
    }

    pub fn sensor(&self) -> SimWeightSensor {
        SimWeightSensor {
            state: Rc::clone(&self.state),
        }
    }

    /// Current simulated mass.
    pub fn weight_kg(&self) -> f32 {
        self.state.borrow().current(Instant::now())
    }
}

/// Relay half of [`SimHopper`].
#[derive(Debug, Clone)]
pub struct SimRelay {
    state: Rc<RefCell<HopperState>>,
}

impl RelayLine for SimRelay {
    fn energize(&mut self) {
        let mut s = self.state.borrow_mut();
        if s.energized_since.is_none() {
            s.energized_since = Some(Instant::now());
        }
    }

    fn deenergize(&mut self) {
        self.state.borrow_mut().settle(Instant::now());
    }
}

/// Sensor half of [`SimHopper`].
#[derive(Debug, Clone)]
pub struct SimWeightSensor {
    state: Rc<RefCell<HopperState>>,
}

impl WeightSensor for SimWeightSensor {
    fn read_weight(
        &mut self,
        _timeout: Duration,
    ) -> Result<f32, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.state.borrow().current(Instant::now()))
    }
}

// ── Real hardware (Linux, feature "hardware") ────────────────────────────

/// GPIO relay output. Many SSR boards switch on a low level, hence the
/// configurable active polarity.
#[cfg(feature = "hardware")]
pub struct GpioRelay {
    pin: rppal::gpio::OutputPin,
    active_low: bool,
}

#[cfg(feature = "hardware")]
impl GpioRelay {
    pub fn new(pin_nr: u8, active_low: bool) -> error::Result<Self> {
        let gpio = rppal::gpio::Gpio::new().map_err(|e| error::HwError::Gpio(e.to_string()))?;
        let mut pin = gpio
            .get(pin_nr)
            .map_err(|e| error::HwError::Gpio(e.to_string()))?
            .into_output();
        // Relay open until commanded.
        if active_low {
            pin.set_high();
        } else {
            pin.set_low();
        }
        Ok(Self { pin, active_low })
    }
}

#[cfg(feature = "hardware")]
impl RelayLine for GpioRelay {
    fn energize(&mut self) {
        if self.active_low {
            self.pin.set_low();
        } else {
            self.pin.set_high();
        }
    }

    fn deenergize(&mut self) {
        if self.active_low {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
    }
}

/// Averaged HX711-backed weight source. A full-precision read averages more
/// samples than the fast variant; the last good reading is served when the
/// chip is transiently not ready.
#[cfg(feature = "hardware")]
pub struct HardwareWeightSensor {
    hx: hx711::Hx711,
    cal: ScaleCal,
    full_samples: u32,
    fast_samples: u32,
    last_valid_kg: Option<f32>,
}

#[cfg(feature = "hardware")]
impl HardwareWeightSensor {
    pub fn new(
        dt_pin_nr: u8,
        sck_pin_nr: u8,
        cal: ScaleCal,
        full_samples: u32,
        fast_samples: u32,
    ) -> error::Result<Self> {
        let gpio = rppal::gpio::Gpio::new().map_err(|e| error::HwError::Gpio(e.to_string()))?;
        let dt = gpio
            .get(dt_pin_nr)
            .map_err(|e| error::HwError::Gpio(e.to_string()))?
            .into_input_pullup();
        let sck = gpio
            .get(sck_pin_nr)
            .map_err(|e| error::HwError::Gpio(e.to_string()))?
            .into_output();
        let hx = hx711::Hx711::new(dt, sck, hx711::GAIN_128)?;
        Ok(Self {
            hx,
            cal,
            full_samples: full_samples.max(1),
            fast_samples: fast_samples.max(1),
            last_valid_kg: None,
        })
    }

    fn read_averaged(&mut self, samples: u32, timeout: Duration) -> error::Result<f32> {
        let deadline = Instant::now() + timeout;
        let mut sum: i64 = 0;
        for n in 0..samples {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(error::HwError::Timeout);
            }
            match self.hx.read_raw(left) {
                Ok(raw) => sum += i64::from(raw),
                Err(e) => {
                    tracing::warn!(error = %e, samples_done = n, "hx711 sample failed");
                    return Err(e);
                }
            }
        }
        let avg = sum / i64::from(samples);
        let kg = self.cal.apply(avg);
        self.last_valid_kg = Some(kg);
        Ok(kg)
    }

    fn read_or_cached(
        &mut self,
        samples: u32,
        timeout: Duration,
    ) -> Result<f32, Box<dyn std::error::Error + Send + Sync>> {
        match self.read_averaged(samples, timeout) {
            Ok(kg) => Ok(kg),
            // Transient not-ready: serve the cached reading rather than
            // failing an in-flight attempt.
            Err(error::HwError::DataReadyTimeout) if self.last_valid_kg.is_some() => {
                tracing::warn!("hx711 not ready; serving last valid reading");
                Ok(self.last_valid_kg.unwrap_or_default())
            }
            Err(e) => Err(Box::new(e)),
        }
    }
}

#[cfg(feature = "hardware")]
impl WeightSensor for HardwareWeightSensor {
    fn read_weight(
        &mut self,
        timeout: Duration,
    ) -> Result<f32, Box<dyn std::error::Error + Send + Sync>> {
        let samples = self.full_samples;
        self.read_or_cached(samples, timeout)
    }

    fn read_weight_fast(
        &mut self,
        timeout: Duration,
    ) -> Result<f32, Box<dyn std::error::Error + Send + Sync>> {
        let samples = self.fast_samples;
        self.read_or_cached(samples, timeout)
    }
}
