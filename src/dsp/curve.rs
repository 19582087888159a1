//! Soft-knee Compression Curve
//!
//! # Regions
//! Evaluated in priority order for every input level (dB):
//! 1. **Silence** (`-inf`): passes through, no gain change.
//! 2. **Below knee**: unity.
//! 3. **In knee**: quadratic blend between unity and the full ratio.
//! 4. **Above knee**: constant ratio, or hard clamp at threshold when limiting.
//!
//! With a zero knee width region 3 is empty and the curve is a plain hard
//! knee. Output level stays continuous across both knee edges for any width.
//!
//! Reference: Giannoulis, Massberg & Reiss, "Digital Dynamic Range
//! Compressor Design - A Tutorial and Analysis" (JAES 2012).

use crate::dsp::utils::{db_to_linear, linear_to_db};

/// How levels above the knee are treated.
///
/// Brick-wall limiting is its own mode so that no code path ever divides
/// by an infinite ratio.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CompressionMode {
    /// `ratio:1` compression, `ratio >= 1`.
    Ratio(f32),
    /// Output is clamped at the threshold.
    Limiting,
}

impl CompressionMode {
    /// Ratio as a number, `+inf` for limiting.
    pub fn ratio(&self) -> f32 {
        match *self {
            CompressionMode::Ratio(r) => r,
            CompressionMode::Limiting => f32::INFINITY,
        }
    }
}

impl Default for CompressionMode {
    fn default() -> Self {
        CompressionMode::Ratio(1.0)
    }
}

/// Static gain-reduction law: threshold, knee, ratio and makeup gain.
///
/// Setters silently keep the previous value when given something invalid.
#[derive(Clone, Copy, Debug)]
pub struct CompressionCurve {
    threshold_db: f32,
    knee_width_db: f32,
    mode: CompressionMode,
    makeup_gain: f32,
}

impl Default for CompressionCurve {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionCurve {
    pub fn new() -> Self {
        Self {
            threshold_db: 0.0,
            knee_width_db: 0.0,
            mode: CompressionMode::default(),
            makeup_gain: 1.0,
        }
    }

    // -------------------------------------------------------------------------
    // Parameters
    // -------------------------------------------------------------------------

    pub fn set_threshold_db(&mut self, threshold_db: f32) {
        self.threshold_db = threshold_db;
    }

    pub fn threshold_db(&self) -> f32 {
        self.threshold_db
    }

    /// Negative (and NaN) widths are ignored.
    pub fn set_knee_width_db(&mut self, knee_width_db: f32) {
        if knee_width_db >= 0.0 {
            self.knee_width_db = knee_width_db;
        }
    }

    pub fn knee_width_db(&self) -> f32 {
        self.knee_width_db
    }

    /// `+inf` selects limiting, `>= 1` a finite ratio; anything else is ignored.
    pub fn set_ratio(&mut self, ratio: f32) {
        if ratio == f32::INFINITY {
            self.mode = CompressionMode::Limiting;
        } else if ratio >= 1.0 {
            self.mode = CompressionMode::Ratio(ratio);
        }
    }

    pub fn set_limiting(&mut self) {
        self.mode = CompressionMode::Limiting;
    }

    pub fn ratio(&self) -> f32 {
        self.mode.ratio()
    }

    pub fn mode(&self) -> CompressionMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: CompressionMode) {
        match mode {
            CompressionMode::Ratio(r) => self.set_ratio(r),
            CompressionMode::Limiting => self.set_limiting(),
        }
    }

    pub fn set_makeup_gain_db(&mut self, makeup_gain_db: f32) {
        self.makeup_gain = db_to_linear(makeup_gain_db);
    }

    pub fn makeup_gain_db(&self) -> f32 {
        linear_to_db(self.makeup_gain)
    }

    pub fn makeup_gain_linear(&self) -> f32 {
        self.makeup_gain
    }

    // -------------------------------------------------------------------------
    // Evaluation
    // -------------------------------------------------------------------------

    /// Gain change in dB (always `<= 0` for finite inputs) for an input level.
    ///
    /// `+inf` is not guarded: a finite ratio gives NaN (`inf - inf`) and
    /// limiting gives `-inf`. Levels come from finite samples in practice.
    pub fn gain_reduction_db(&self, input_db: f32) -> f32 {
        if input_db == f32::NEG_INFINITY {
            return 0.0;
        }

        let over = input_db - self.threshold_db;
        let knee = self.knee_width_db;

        let output_db = if 2.0 * over <= -knee {
            input_db
        } else if 2.0 * over.abs() < knee {
            let t = over + knee * 0.5;
            let bend = t * t / (2.0 * knee);
            match self.mode {
                CompressionMode::Limiting => input_db - bend,
                CompressionMode::Ratio(ratio) => input_db + (1.0 / ratio - 1.0) * bend,
            }
        } else {
            match self.mode {
                CompressionMode::Limiting => self.threshold_db,
                CompressionMode::Ratio(ratio) => self.threshold_db + over / ratio,
            }
        };

        output_db - input_db
    }

    /// Static transfer function, used for curve display.
    pub fn output_level_db(&self, input_db: f32) -> f32 {
        input_db + self.gain_reduction_db(input_db)
    }

    /// Gain reduction for a linear level estimate.
    #[inline]
    pub fn gain_reduction_for_level(&self, level: f32) -> f32 {
        self.gain_reduction_db(linear_to_db(level))
    }

    /// Compress a block against precomputed linear level estimates.
    ///
    /// `output[i] = input[i] * gain(levels[i]) * makeup`. When `gain_trace` is
    /// given it receives the per-sample gain reduction in dB.
    pub fn apply(
        &self,
        input: &[f32],
        levels: &[f32],
        output: &mut [f32],
        mut gain_trace: Option<&mut [f32]>,
    ) {
        for (i, ((&x, &level), y)) in input
            .iter()
            .zip(levels.iter())
            .zip(output.iter_mut())
            .enumerate()
        {
            let gain_db = self.gain_reduction_for_level(level);
            *y = x * db_to_linear(gain_db) * self.makeup_gain;

            if let Some(trace) = gain_trace.as_deref_mut() {
                if let Some(slot) = trace.get_mut(i) {
                    *slot = gain_db;
                }
            }
        }
    }
}
