#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and calibration parsing for the feed dispenser.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - The calibration CSV loader enforces headers and fits a linear
//!   raw-counts → kilograms model for the load cell.

use serde::Deserialize;

/// Calibration CSV schema.
///
/// Expected headers:
/// raw,kg
///
/// Example:
/// raw,kg
/// 842913,0.0
/// 1024913,1.0
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct CalibrationRow {
    pub raw: i64,
    pub kg: f32,
}

/// GPIO assignments. Absent for simulation-only deployments.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct Pins {
    pub relay: u8,
    pub hx711_dt: u8,
    pub hx711_sck: u8,
}

/// Feeding control tunables; mirrors `feeder_core::FeedingCfg` field for
/// field (the sensor read timeout lives under `[hardware]`).
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Feeding {
    pub low_level_threshold_kg: f32,
    pub manual_target_kg: f32,
    pub manual_pulse_threshold_kg: f32,
    pub min_dispense_kg: f32,
    pub feeding_timeout_ms: u64,
    pub cooldown_ms: u64,
    pub manual_pulse_on_ms: u64,
    pub pulse_off_ms: u64,
    pub long_pulse_on_ms: u64,
    pub short_pulse_on_ms: u64,
    pub phase_threshold: f32,
    pub settle_ms: u64,
    pub stop_early_factor: f32,
}

impl Default for Feeding {
    fn default() -> Self {
        Self {
            low_level_threshold_kg: 0.2,
            manual_target_kg: 0.15,
            manual_pulse_threshold_kg: 0.075,
            min_dispense_kg: 0.1,
            feeding_timeout_ms: 30_000,
            cooldown_ms: 10_000,
            manual_pulse_on_ms: 50,
            pulse_off_ms: 200,
            long_pulse_on_ms: 150,
            short_pulse_on_ms: 50,
            phase_threshold: 0.3,
            settle_ms: 400,
            stop_early_factor: 0.85,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Hardware {
    /// Max time to wait for an averaged HX711 read before failing.
    pub sensor_read_timeout_ms: u64,
    /// Relay energizes on a low output level (common SSR boards).
    pub relay_active_low: bool,
    /// Samples averaged for a full-precision read.
    pub full_read_samples: u32,
    /// Samples averaged for a fast read during active feeding.
    pub fast_read_samples: u32,
}

impl Default for Hardware {
    fn default() -> Self {
        Self {
            sensor_read_timeout_ms: 1500,
            relay_active_low: true,
            full_read_samples: 10,
            fast_read_samples: 3,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Optional for simulation runs; required to assemble real hardware.
    pub pins: Option<Pins>,
    pub feeding: Feeding,
    pub logging: Logging,
    pub hardware: Hardware,
    /// Optional persisted calibration; preferred at runtime over CSV when
    /// present.
    pub calibration: Option<PersistedCalibration>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct PersistedCalibration {
    /// kilograms per raw count
    pub kg_per_count: f32,
    /// tare zero in raw counts
    pub zero_counts: i32,
    /// additive offset in kilograms (rarely needed; default 0.0)
    #[serde(default)]
    pub offset_kg: f32,
}

impl From<PersistedCalibration> for Calibration {
    fn from(p: PersistedCalibration) -> Self {
        Calibration {
            zero_counts: p.zero_counts,
            kg_per_count: p.kg_per_count,
        }
    }
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Linear load-cell model: kg = kg_per_count * (raw - zero_counts).
#[derive(Debug)]
pub struct Calibration {
    pub zero_counts: i32,
    pub kg_per_count: f32,
}

impl Calibration {
    /// Build a Calibration from CSV rows using ordinary least squares.
    /// Fits kg = a*raw + b, then converts to kg = a*(raw - zero_counts)
    /// where zero_counts = round(-b/a) is the tare baseline.
    pub fn from_rows(rows: &[CalibrationRow]) -> eyre::Result<Self> {
        if rows.len() < 2 {
            eyre::bail!("calibration requires at least two rows, got {}", rows.len());
        }

        // Raw values must be strictly monotonic; duplicates or direction
        // changes indicate a mis-recorded table.
        let mut dir: i8 = 0;
        for i in 1..rows.len() {
            let d = rows[i].raw - rows[i - 1].raw;
            if d == 0 {
                eyre::bail!(
                    "calibration rows have duplicate raw values at index {} and {}",
                    i - 1,
                    i
                );
            }
            let step_dir = if d > 0 { 1 } else { -1 };
            if dir == 0 {
                dir = step_dir;
            } else if dir != step_dir {
                eyre::bail!(
                    "calibration raw values must be monotonic (strictly increasing or strictly decreasing)"
                );
            }
        }

        // OLS in f64 for numerical stability.
        let n = rows.len() as f64;
        let sum_x: f64 = rows.iter().map(|r| r.raw as f64).sum();
        let sum_y: f64 = rows.iter().map(|r| r.kg as f64).sum();
        let mean_x = sum_x / n;
        let mean_y = sum_y / n;
        let mut sxx = 0.0f64;
        let mut sxy = 0.0f64;
        for r in rows {
            let x = r.raw as f64 - mean_x;
            let y = r.kg as f64 - mean_y;
            sxx += x * x;
            sxy += x * y;
        }
        if !sxx.is_finite() || sxx == 0.0 {
            eyre::bail!("calibration cannot determine slope (degenerate raw variance)");
        }
        let a = sxy / sxx;
        if !a.is_finite() || a == 0.0 {
            eyre::bail!("calibration produced an invalid slope");
        }
        let b = mean_y - a * mean_x;

        let zero_counts = -b / a;
        if !zero_counts.is_finite() {
            eyre::bail!("calibration produced an invalid tare baseline");
        }

        Ok(Calibration {
            zero_counts: zero_counts.round() as i32,
            kg_per_count: a as f32,
        })
    }
}

impl TryFrom<&[CalibrationRow]> for Calibration {
    type Error = eyre::Report;
    fn try_from(rows: &[CalibrationRow]) -> Result<Self, Self::Error> {
        Self::from_rows(rows)
    }
}

pub fn load_calibration_csv(path: &std::path::Path) -> eyre::Result<Calibration> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open calibration CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["raw", "kg"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "calibration CSV must have headers 'raw,kg', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<CalibrationRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }

    Calibration::from_rows(&rows)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        let f = &self.feeding;
        if f.low_level_threshold_kg < 0.0 {
            eyre::bail!("feeding.low_level_threshold_kg must be >= 0");
        }
        if f.manual_target_kg <= 0.0 {
            eyre::bail!("feeding.manual_target_kg must be > 0");
        }
        if f.manual_pulse_threshold_kg <= 0.0 || f.manual_pulse_threshold_kg >= f.manual_target_kg {
            eyre::bail!("feeding.manual_pulse_threshold_kg must be in (0, manual_target_kg)");
        }
        if f.min_dispense_kg <= 0.0 || f.min_dispense_kg > f.manual_target_kg {
            eyre::bail!("feeding.min_dispense_kg must be in (0, manual_target_kg]");
        }
        if f.feeding_timeout_ms == 0 {
            eyre::bail!("feeding.feeding_timeout_ms must be >= 1");
        }
        if f.feeding_timeout_ms > 10 * 60 * 1000 {
            eyre::bail!("feeding.feeding_timeout_ms is unreasonably large (>10min)");
        }
        if f.cooldown_ms > 24 * 60 * 60 * 1000 {
            eyre::bail!("feeding.cooldown_ms is unreasonably large (>24h)");
        }
        if f.manual_pulse_on_ms == 0
            || f.pulse_off_ms == 0
            || f.long_pulse_on_ms == 0
            || f.short_pulse_on_ms == 0
        {
            eyre::bail!("feeding pulse durations must be >= 1");
        }
        if f.settle_ms == 0 {
            eyre::bail!("feeding.settle_ms must be >= 1");
        }
        if f.phase_threshold <= 0.0 || f.phase_threshold >= 1.0 {
            eyre::bail!("feeding.phase_threshold must be in (0, 1)");
        }
        if f.stop_early_factor <= 0.0 || f.stop_early_factor > 1.0 {
            eyre::bail!("feeding.stop_early_factor must be in (0, 1]");
        }

        // Hardware
        if self.hardware.sensor_read_timeout_ms == 0 {
            eyre::bail!("hardware.sensor_read_timeout_ms must be >= 1");
        }
        if self.hardware.full_read_samples == 0 || self.hardware.fast_read_samples == 0 {
            eyre::bail!("hardware sample counts must be >= 1");
        }

        // Logging
        if let Some(rotation) = self.logging.rotation.as_deref()
            && !matches!(rotation, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        // Calibration
        if let Some(cal) = &self.calibration {
            if !cal.kg_per_count.is_finite() || cal.kg_per_count == 0.0 {
                eyre::bail!("calibration.kg_per_count must be finite and non-zero");
            }
            if !cal.offset_kg.is_finite() {
                eyre::bail!("calibration.offset_kg must be finite");
            }
        }

        Ok(())
    }
}
