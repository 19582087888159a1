//! Attack / Hold / Release Level Estimator
//!
//! Peak-style envelope follower that drives the compression curve.
//!
//! # Design Notes
//! - Coefficients live in the shared [`LevelEstimator`]; per-channel memory
//!   lives in [`EnvelopeState`] records owned by the caller, one per channel.
//! - **No Allocations**: block functions write into caller-provided slices.
//! - Linked mode folds every channel into one level sequence with `max`,
//!   so the final result does not depend on channel order.
//!
//! # Per-sample state machine
//! Checked in priority order:
//! 1. **Attack**: rectified input above the estimate moves toward it with the
//!    attack coefficient and restarts the hold counter.
//! 2. **Hold**: while the counter is below the hold length the estimate is frozen.
//! 3. **Release**: otherwise the estimate moves toward the input with the
//!    release coefficient.

use crate::dsp::utils::time_constant_to_coefficient;

const DEFAULT_SAMPLE_RATE: f32 = 44100.0;
const DEFAULT_ATTACK_SEC: f32 = 0.0;
const DEFAULT_RELEASE_SEC: f32 = 0.1;
const DEFAULT_HOLD_SEC: f32 = 0.0;

/// Envelope memory for a single channel.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EnvelopeState {
    /// Linear magnitude estimate, never negative.
    pub level: f32,
    /// Samples spent in hold since the last attack step.
    pub hold_count: usize,
}

impl EnvelopeState {
    pub fn reset(&mut self) {
        self.level = 0.0;
        self.hold_count = 0;
    }
}

/// Time constants and derived coefficients shared by all channels.
#[derive(Clone, Debug)]
pub struct LevelEstimator {
    sample_rate: f32,
    attack_sec: f32,
    release_sec: f32,
    hold_sec: f32,

    attack_coeff: f32,
    release_coeff: f32,
    hold_samples: usize,
}

impl Default for LevelEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE)
    }
}

impl LevelEstimator {
    pub fn new(sample_rate: f32) -> Self {
        let mut estimator = Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            attack_sec: DEFAULT_ATTACK_SEC,
            release_sec: DEFAULT_RELEASE_SEC,
            hold_sec: DEFAULT_HOLD_SEC,
            attack_coeff: 1.0,
            release_coeff: 1.0,
            hold_samples: 0,
        };
        estimator.set_sample_rate(sample_rate);
        estimator.update_coefficients();
        estimator
    }

    // -------------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------------

    /// Non-positive (and NaN) rates are ignored.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        if !(sample_rate > 0.0) {
            return;
        }
        if sample_rate != self.sample_rate {
            self.sample_rate = sample_rate;
            self.update_coefficients();
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn set_attack_time_ms(&mut self, attack_ms: f32) {
        if !(attack_ms >= 0.0) {
            return;
        }
        self.attack_sec = attack_ms / 1000.0;
        self.attack_coeff = time_constant_to_coefficient(self.attack_sec, self.sample_rate);
    }

    pub fn attack_time_ms(&self) -> f32 {
        self.attack_sec * 1000.0
    }

    pub fn attack_coefficient(&self) -> f32 {
        self.attack_coeff
    }

    pub fn set_release_time_ms(&mut self, release_ms: f32) {
        if !(release_ms >= 0.0) {
            return;
        }
        self.release_sec = release_ms / 1000.0;
        self.release_coeff = time_constant_to_coefficient(self.release_sec, self.sample_rate);
    }

    pub fn release_time_ms(&self) -> f32 {
        self.release_sec * 1000.0
    }

    pub fn release_coefficient(&self) -> f32 {
        self.release_coeff
    }

    pub fn set_hold_time_ms(&mut self, hold_ms: f32) {
        if !(hold_ms >= 0.0) {
            return;
        }
        self.hold_sec = hold_ms / 1000.0;
        self.hold_samples = Self::hold_length(self.hold_sec, self.sample_rate);
    }

    pub fn hold_time_ms(&self) -> f32 {
        self.hold_sec * 1000.0
    }

    pub fn hold_samples(&self) -> usize {
        self.hold_samples
    }

    fn update_coefficients(&mut self) {
        self.attack_coeff = time_constant_to_coefficient(self.attack_sec, self.sample_rate);
        self.release_coeff = time_constant_to_coefficient(self.release_sec, self.sample_rate);
        self.hold_samples = Self::hold_length(self.hold_sec, self.sample_rate);
    }

    #[inline]
    fn hold_length(hold_sec: f32, sample_rate: f32) -> usize {
        (hold_sec * sample_rate).round() as usize
    }

    // -------------------------------------------------------------------------
    // Processing
    // -------------------------------------------------------------------------

    /// Advance one channel by one sample and return the new estimate.
    #[inline]
    pub fn process_sample(&self, input: f32, state: &mut EnvelopeState) -> f32 {
        let x = input.abs();

        if x > state.level {
            state.level += (x - state.level) * self.attack_coeff;
            state.hold_count = 0;
        } else if state.hold_count < self.hold_samples {
            state.hold_count += 1;
        } else {
            state.level += (x - state.level) * self.release_coeff;
        }

        state.level
    }

    /// Independent mode: overwrite `levels` with this channel's estimates.
    pub fn estimate(&self, input: &[f32], levels: &mut [f32], state: &mut EnvelopeState) {
        for (&x, out) in input.iter().zip(levels.iter_mut()) {
            *out = self.process_sample(x, state);
        }
    }

    /// Linked mode. The first channel passes `combine = false` and writes
    /// directly; later channels keep the larger of the stored and own level.
    pub fn estimate_linked(
        &self,
        input: &[f32],
        levels: &mut [f32],
        state: &mut EnvelopeState,
        combine: bool,
    ) {
        for (&x, out) in input.iter().zip(levels.iter_mut()) {
            let level = self.process_sample(x, state);
            if !combine || level > *out {
                *out = level;
            }
        }
    }
}
