//! Numeric Sanitization
//!
//! Guards applied to values produced inside the scheduler. Construction
//! boundaries reject out-of-range input instead (see `card`).

use crate::types::{MAX_DIFFICULTY, MIN_DIFFICULTY, MIN_STABILITY};

/// Neither NaN nor infinite
pub fn is_finite(value: f64) -> bool {
    !(value.is_nan() || value.is_infinite())
}

/// Clamp a computed stability to the floor. NaN collapses to the floor, +inf to `f64::MAX`.
pub fn clamp_stability(value: f64) -> f64 {
    if !is_finite(value) {
        return if value == f64::INFINITY {
            f64::MAX
        } else {
            MIN_STABILITY
        };
    }
    value.max(MIN_STABILITY)
}

/// Clamp a computed difficulty into `[MIN_DIFFICULTY, MAX_DIFFICULTY]`.
pub fn clamp_difficulty(value: f64) -> f64 {
    if value.is_nan() {
        return MIN_DIFFICULTY;
    }
    value.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
}

/// Keep retention strictly inside (0, 1) so the interval formula stays finite.
pub fn clamp_retention(value: f64) -> f64 {
    if value.is_nan() {
        return 0.9;
    }
    value.clamp(0.0001, 0.9999)
}
