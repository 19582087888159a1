//! Level and time-constant conversions shared by every dynamics stage.
//!
//! All helpers are total over the `f32` domain: infinities map to the
//! matching infinities or to the "no movement" coefficient, and nothing
//! panics.

/// Convert decibels to a linear magnitude.
///
/// `-inf` maps to exactly `0.0` and `+inf` to `+inf`.
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    if db == f32::NEG_INFINITY {
        0.0
    } else if db == f32::INFINITY {
        f32::INFINITY
    } else {
        10.0f32.powf(db / 20.0)
    }
}

/// Convert a linear magnitude to decibels.
///
/// Negative magnitudes are reflected through `abs()`. Silence maps to `-inf`.
#[inline]
pub fn linear_to_db(mag: f32) -> f32 {
    let mag = mag.abs();
    if mag == 0.0 {
        f32::NEG_INFINITY
    } else if mag == f32::INFINITY {
        f32::INFINITY
    } else {
        20.0 * mag.log10()
    }
}

/// One-pole coefficient for `y += coeff * (x - y)`.
///
/// A non-positive time constant steps instantly (`1.0`). A non-positive
/// sample rate or an infinite time constant never moves (`0.0`).
#[inline]
pub fn time_constant_to_coefficient(time_constant_sec: f32, sample_rate: f32) -> f32 {
    if time_constant_sec <= 0.0 {
        1.0
    } else if sample_rate <= 0.0 || time_constant_sec == f32::INFINITY {
        0.0
    } else {
        1.0 - (-1.0 / (time_constant_sec * sample_rate)).exp()
    }
}

/// Inverse of [`time_constant_to_coefficient`], in seconds.
pub fn coefficient_to_time_constant(coeff: f32, sample_rate: f32) -> f32 {
    if sample_rate <= 0.0 {
        return if coeff <= 0.0 { f32::INFINITY } else { 0.0 };
    }

    if coeff <= 0.0 {
        f32::INFINITY
    } else if coeff >= 1.0 {
        0.0
    } else {
        -1.0 / ((1.0 - coeff).ln() * sample_rate)
    }
}

/// Truncating milliseconds to samples conversion.
/// Negative and NaN inputs saturate to zero.
#[inline]
pub fn ms_to_samples(ms: f32, sample_rate: f32) -> usize {
    (ms * sample_rate / 1000.0) as usize
}
