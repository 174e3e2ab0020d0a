//! Fixed-point mass helpers for feeder_core.

/// Grams per kilogram; the engine's fixed-point scale.
pub const GRAMS_PER_KG: f32 = 1000.0;

/// Quantize a kilogram value to integer grams, rounding to nearest and
/// clamping to the i32 range. Non-finite values (NaN/±Inf) map to 0.
#[inline]
pub fn quantize_kg_to_g(kg: f32) -> i32 {
    if !kg.is_finite() {
        return 0;
    }
    let scaled = (kg * GRAMS_PER_KG).round();
    if scaled >= i32::MAX as f32 {
        i32::MAX
    } else if scaled <= i32::MIN as f32 {
        i32::MIN
    } else {
        scaled as i32
    }
}

/// Integer grams back to kilograms for reporting.
#[inline]
pub fn g_to_kg(g: i32) -> f32 {
    g as f32 / GRAMS_PER_KG
}
