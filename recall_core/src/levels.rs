//! Numeric sanitation for levels, progress values and intensities.
//!
//! Inputs arriving from collaborators are never trusted: NaN collapses to the
//! lower bound and everything else is clamped into range.

/// Clamp into `[0, 1]`, mapping NaN to 0.
pub fn unit(value: f64) -> f64 {
    bounded(value, 0.0, 1.0)
}

/// Clamp into `[min, max]`, mapping NaN to `min`.
pub fn bounded(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

/// Non-negative finite value, NaN and negatives collapse to 0.
pub fn non_negative(value: f64) -> f64 {
    if value.is_nan() || value < 0.0 {
        0.0
    } else if value.is_infinite() {
        f64::MAX
    } else {
        value
    }
}

/// Level quantized to thousandths, as used for corruption seeds.
pub fn millis(level: f64) -> u32 {
    (unit(level) * 1000.0).floor() as u32
}
