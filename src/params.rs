//! Parameter snapshot read by the engine once per block.
//!
//! Field names serialise in camelCase (`inputGainDb`, `thresholdDb`, ...).
//! Missing fields take their defaults, so a partial JSON object is a valid
//! snapshot.

use serde::{Deserialize, Serialize};

use crate::dsp::CompressionMode;

// -----------------------------------------------------------------------------
// Ranges
// -----------------------------------------------------------------------------

pub const GAIN_RANGE_DB: (f32, f32) = (-30.0, 30.0);
pub const THRESHOLD_RANGE_DB: (f32, f32) = (-96.0, 0.0);
pub const RATIO_RANGE: (f32, f32) = (1.0, 100.0);
pub const KNEE_RANGE_DB: (f32, f32) = (0.0, 48.0);
/// Attack, release and hold.
pub const TIME_RANGE_MS: (f32, f32) = (0.0, 1000.0);
pub const LOOKAHEAD_RANGE_MS: (f32, f32) = (0.0, 30.0);

/// Ratio as configured by the user: a number, or `"limiting"`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "RatioRepr", into = "RatioRepr")]
pub enum RatioSetting {
    Ratio(f32),
    Limiting,
}

impl Default for RatioSetting {
    fn default() -> Self {
        RatioSetting::Ratio(1.0)
    }
}

impl From<RatioSetting> for CompressionMode {
    fn from(setting: RatioSetting) -> Self {
        match setting {
            RatioSetting::Ratio(r) if r == f32::INFINITY => CompressionMode::Limiting,
            RatioSetting::Ratio(r) => CompressionMode::Ratio(r),
            RatioSetting::Limiting => CompressionMode::Limiting,
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
enum RatioRepr {
    Number(f32),
    Keyword(RatioKeyword),
}

#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RatioKeyword {
    Limiting,
}

impl From<RatioRepr> for RatioSetting {
    fn from(repr: RatioRepr) -> Self {
        match repr {
            RatioRepr::Number(r) => RatioSetting::Ratio(r),
            RatioRepr::Keyword(RatioKeyword::Limiting) => RatioSetting::Limiting,
        }
    }
}

impl From<RatioSetting> for RatioRepr {
    fn from(setting: RatioSetting) -> Self {
        match setting {
            RatioSetting::Ratio(r) if r.is_finite() => RatioRepr::Number(r),
            _ => RatioRepr::Keyword(RatioKeyword::Limiting),
        }
    }
}

/// Every control the engine reads for one block.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParameterSnapshot {
    pub linked: bool,
    pub bypass: bool,
    pub input_gain_db: f32,
    pub threshold_db: f32,
    pub ratio: RatioSetting,
    pub knee_width_db: f32,
    /// Also the curve's makeup gain.
    pub output_gain_db: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
    pub hold_ms: f32,
    pub lookahead_ms: f32,
}

impl Default for ParameterSnapshot {
    fn default() -> Self {
        Self {
            linked: true,
            bypass: false,
            input_gain_db: 0.0,
            threshold_db: 0.0,
            ratio: RatioSetting::default(),
            knee_width_db: 0.0,
            output_gain_db: 0.0,
            attack_ms: 0.0,
            release_ms: 100.0,
            hold_ms: 0.0,
            lookahead_ms: 0.0,
        }
    }
}

#[inline]
fn clamp_or(value: f32, range: (f32, f32), fallback: f32) -> f32 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(range.0, range.1)
    }
}

impl ParameterSnapshot {
    /// Clamp every field into its documented range. NaN falls back to the default.
    pub fn sanitized(&self) -> Self {
        let d = Self::default();
        let ratio = match self.ratio {
            RatioSetting::Ratio(r) if r == f32::INFINITY => RatioSetting::Limiting,
            RatioSetting::Ratio(r) => RatioSetting::Ratio(clamp_or(r, RATIO_RANGE, 1.0)),
            RatioSetting::Limiting => RatioSetting::Limiting,
        };
        Self {
            linked: self.linked,
            bypass: self.bypass,
            input_gain_db: clamp_or(self.input_gain_db, GAIN_RANGE_DB, d.input_gain_db),
            threshold_db: clamp_or(self.threshold_db, THRESHOLD_RANGE_DB, d.threshold_db),
            ratio,
            knee_width_db: clamp_or(self.knee_width_db, KNEE_RANGE_DB, d.knee_width_db),
            output_gain_db: clamp_or(self.output_gain_db, GAIN_RANGE_DB, d.output_gain_db),
            attack_ms: clamp_or(self.attack_ms, TIME_RANGE_MS, d.attack_ms),
            release_ms: clamp_or(self.release_ms, TIME_RANGE_MS, d.release_ms),
            hold_ms: clamp_or(self.hold_ms, TIME_RANGE_MS, d.hold_ms),
            lookahead_ms: clamp_or(self.lookahead_ms, LOOKAHEAD_RANGE_MS, d.lookahead_ms),
        }
    }

    pub fn compression_mode(&self) -> CompressionMode {
        self.ratio.into()
    }
}
