//! Bit-banged HX711 load-cell frontend.

use std::time::{Duration, Instant};
use tracing::trace;

use crate::error::{HwError, Result};

/// Gain/channel selection, expressed as the extra clock pulses the chip
/// expects after each 24-bit frame.
pub const GAIN_128: u8 = 25;
pub const GAIN_32: u8 = 26;
pub const GAIN_64: u8 = 27;

pub struct Hx711 {
    dt: rppal::gpio::InputPin,
    sck: rppal::gpio::OutputPin,
    gain_pulses: u8,
}

impl Hx711 {
    pub fn new(
        dt_pin: rppal::gpio::InputPin,
        mut sck_pin: rppal::gpio::OutputPin,
        gain_pulses: u8,
    ) -> Result<Self> {
        if !(25..=27).contains(&gain_pulses) {
            return Err(HwError::Gpio(format!(
                "invalid hx711 gain pulse count: {gain_pulses}"
            )));
        }
        sck_pin.set_low(); // clock idle low
        Ok(Self {
            dt: dt_pin,
            sck: sck_pin,
            gain_pulses,
        })
    }

    /// One signed 24-bit conversion. Waits for data-ready (DT low) up to
    /// `timeout`, then clocks the frame out.
    pub fn read_raw(&mut self, timeout: Duration) -> Result<i32> {
        let deadline = Instant::now() + timeout;
        while self.dt.is_high() {
            if Instant::now() >= deadline {
                return Err(HwError::DataReadyTimeout);
            }
            std::thread::sleep(Duration::from_micros(200));
        }

        let mut value: i32 = 0;
        for _ in 0..24 {
            self.sck.set_high();
            spin_delay();
            value = (value << 1) | i32::from(self.dt.is_high());
            self.sck.set_low();
            spin_delay();
        }

        // Extra pulses select gain/channel for the next conversion.
        for _ in 0..self.gain_pulses - 24 {
            self.sck.set_high();
            spin_delay();
            self.sck.set_low();
            spin_delay();
        }

        // Sign extend 24-bit two's complement
        if (value & 0x80_0000) != 0 {
            value |= !0xFF_FFFF;
        }
        trace!(raw = value, "hx711 raw read");
        Ok(value)
    }
}

#[inline(always)]
fn spin_delay() {
    // HX711 needs >=0.2us high/low time; a spin hint is enough on the Pi.
    std::hint::spin_loop();
}
