//! Compression engine: the per-block pipeline.
//!
//! # Lifecycle
//! - [`CompressorEngine::prepare`] runs on the control thread whenever the
//!   sample rate, channel count or maximum block size changes. It is the only
//!   place that allocates.
//! - [`CompressorEngine::process`] runs on the audio thread, once per block.
//!   It never allocates, locks or blocks for blocks within the prepared size.
//!
//! # Block phases
//! Executed in this order for every non-bypassed block:
//! 1. **Input gain**: channel-major, one smoother step per (channel, sample).
//!    A ramp therefore finishes faster with more channels.
//! 2. **Estimation**: every channel's follower writes into one shared level
//!    buffer (max-combined when linked).
//! 3. **Compression**: curve gain from the shared levels, applied to the
//!    lookahead-delayed sample together with the output-gain smoother.
//! 4. **Metering**: peaks and the active curve are published.
//!
//! # Unlinked detection
//! In unlinked mode phase 2 leaves the shared buffer holding the LAST
//! channel's levels. Channel 0 is compressed against those, and every later
//! channel re-runs its follower before phase 3, so its envelope advances
//! twice per block. Both are intentional.

use assert_no_alloc::permit_alloc;
use nih_plug::prelude::{Smoother, SmoothingStyle};

use crate::comp_log;
use crate::dsp::{
    db_to_linear, linear_to_db, ms_to_samples, CompressionCurve, DelayLine, EnvelopeState,
    LevelEstimator,
};
use crate::meters::{self, CurveSnapshot, MeterReader, MeterReadings, MeterWriter};
use crate::params::ParameterSnapshot;

/// Delay capacity per channel: 30 ms at 192 kHz.
pub const MAX_LOOKAHEAD_SAMPLES: usize = 5760;

const DEFAULT_SAMPLE_RATE: f32 = 44100.0;
const DEFAULT_BLOCK_SIZE: usize = 512;

/// Input and output gain ramp length.
pub const GAIN_RAMP_MS: f32 = 20.0;

fn gain_smoother() -> Smoother<f32> {
    let smoother = Smoother::new(SmoothingStyle::Linear(GAIN_RAMP_MS));
    smoother.reset(1.0);
    smoother
}

#[inline]
fn lookahead_samples(lookahead_ms: f32, sample_rate: f32) -> usize {
    ms_to_samples(lookahead_ms, sample_rate).min(MAX_LOOKAHEAD_SAMPLES)
}

/// Per-channel memory, indexed by channel.
#[derive(Clone, Debug)]
struct ChannelState {
    envelope: EnvelopeState,
    delay: DelayLine,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            envelope: EnvelopeState::default(),
            delay: DelayLine::new(MAX_LOOKAHEAD_SAMPLES),
        }
    }

    fn reset(&mut self) {
        self.envelope.reset();
        self.delay.reset();
    }
}

pub struct CompressorEngine {
    sample_rate: f32,
    channels: Vec<ChannelState>,

    estimator: LevelEstimator,
    curve: CompressionCurve,
    level_buffer: Vec<f32>,

    input_gain: Smoother<f32>,
    output_gain: Smoother<f32>,
    /// Linear targets last handed to the smoothers. A ramp only restarts when
    /// these change.
    input_gain_target: f32,
    output_gain_target: f32,

    lookahead_samples: usize,
    bypassed: bool,

    meters: MeterWriter,
}

impl Default for CompressorEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressorEngine {
    /// Unprepared engine: no channels, so every block passes through untouched
    /// until [`prepare`](Self::prepare) is called.
    pub fn new() -> Self {
        let (writer, _reader) = meters::channel();
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: Vec::new(),
            estimator: LevelEstimator::new(DEFAULT_SAMPLE_RATE),
            curve: CompressionCurve::new(),
            level_buffer: vec![0.0; DEFAULT_BLOCK_SIZE],
            input_gain: gain_smoother(),
            output_gain: gain_smoother(),
            input_gain_target: 1.0,
            output_gain_target: 1.0,
            lookahead_samples: 0,
            bypassed: false,
            meters: writer,
        }
    }

    // -------------------------------------------------------------------------
    // Control path
    // -------------------------------------------------------------------------

    /// Reconfigure for a new stream format. Resets all channel state.
    ///
    /// A non-positive sample rate keeps the previous rate.
    pub fn prepare(&mut self, sample_rate: f32, num_channels: usize, max_block_size: usize) {
        self.estimator.set_sample_rate(sample_rate);
        self.sample_rate = self.estimator.sample_rate();

        self.channels.clear();
        self.channels.resize_with(num_channels, ChannelState::new);

        self.level_buffer.clear();
        self.level_buffer.resize(max_block_size.max(1), 0.0);

        self.input_gain.reset(self.input_gain_target);
        self.output_gain.reset(self.output_gain_target);

        log::info!(
            "compressor prepared: {} Hz, {} channel(s), max block {}",
            self.sample_rate,
            num_channels,
            max_block_size
        );
    }

    /// Clear envelopes and delay lines without reallocating.
    pub fn reset(&mut self) {
        for ch in self.channels.iter_mut() {
            ch.reset();
        }
        self.input_gain.reset(self.input_gain_target);
        self.output_gain.reset(self.output_gain_target);
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn curve(&self) -> &CompressionCurve {
        &self.curve
    }

    pub fn estimator(&self) -> &LevelEstimator {
        &self.estimator
    }

    /// Pipeline latency to report to the host. Zero while bypassed, even
    /// with lookahead configured.
    pub fn latency_samples(&self) -> usize {
        if self.bypassed {
            0
        } else {
            self.lookahead_samples
        }
    }

    /// Latency `params` would produce at the prepared sample rate.
    pub fn latency_for(&self, params: &ParameterSnapshot) -> usize {
        if params.bypass {
            0
        } else {
            lookahead_samples(params.lookahead_ms, self.sample_rate)
        }
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    pub fn meter_reader(&self) -> MeterReader {
        self.meters.reader()
    }

    // -------------------------------------------------------------------------
    // Audio path
    // -------------------------------------------------------------------------

    fn apply_parameters(&mut self, params: &ParameterSnapshot) {
        self.estimator.set_attack_time_ms(params.attack_ms);
        self.estimator.set_release_time_ms(params.release_ms);
        self.estimator.set_hold_time_ms(params.hold_ms);

        self.curve.set_threshold_db(params.threshold_db);
        self.curve.set_mode(params.compression_mode());
        self.curve.set_knee_width_db(params.knee_width_db);
        self.curve.set_makeup_gain_db(params.output_gain_db);

        self.lookahead_samples = lookahead_samples(params.lookahead_ms, self.sample_rate);
        for ch in self.channels.iter_mut() {
            ch.delay.set_delay(self.lookahead_samples);
        }

        let input_target = db_to_linear(params.input_gain_db);
        if input_target != self.input_gain_target {
            self.input_gain_target = input_target;
            self.input_gain.set_target(self.sample_rate, input_target);
        }
        let output_target = db_to_linear(params.output_gain_db);
        if output_target != self.output_gain_target {
            self.output_gain_target = output_target;
            self.output_gain.set_target(self.sample_rate, output_target);
        }
    }

    /// Process one block in place. All channel slices should have the same
    /// length; extra samples in longer slices are left untouched.
    pub fn process(&mut self, channels: &mut [&mut [f32]], params: &ParameterSnapshot) {
        if params.bypass {
            self.bypassed = true;
            self.meters.publish_gain_reduction(0.0);
            return;
        }
        self.bypassed = false;

        self.apply_parameters(params);

        let num_channels = channels.len();
        if num_channels > self.channels.len() {
            comp_log!(
                "block has {} channels, prepared for {}; passing through",
                num_channels,
                self.channels.len()
            );
            return;
        }

        let num_samples = channels.iter().map(|c| c.len()).min().unwrap_or(0);
        if num_samples == 0 {
            return;
        }
        if num_samples > self.level_buffer.len() {
            comp_log!("growing level buffer to {} samples", num_samples);
            permit_alloc(|| self.level_buffer.resize(num_samples, 0.0));
        }

        let linked = params.linked;

        // Phase 1: input gain
        let mut peak_in = 0.0f32;
        for ch in channels.iter_mut() {
            for x in ch[..num_samples].iter_mut() {
                *x *= self.input_gain.next();
                peak_in = peak_in.max(x.abs());
            }
        }

        // Phase 2: level estimation into the shared buffer
        let levels = &mut self.level_buffer[..num_samples];
        for (idx, ch) in channels.iter().enumerate() {
            let state = &mut self.channels[idx].envelope;
            if linked {
                self.estimator.estimate_linked(&ch[..num_samples], levels, state, idx > 0);
            } else {
                self.estimator.estimate(&ch[..num_samples], levels, state);
            }
        }

        // Phase 3: gain computation, lookahead and output gain
        let mut peak_gr = 0.0f32;
        let mut peak_out = 0.0f32;
        for (idx, ch) in channels.iter_mut().enumerate() {
            let state = &mut self.channels[idx];
            let samples = &mut ch[..num_samples];

            if !linked && idx > 0 {
                self.estimator.estimate(samples, levels, &mut state.envelope);
            }

            for (x, &level) in samples.iter_mut().zip(levels.iter()) {
                let gain_db = self.curve.gain_reduction_for_level(level);
                if gain_db < peak_gr {
                    peak_gr = gain_db;
                }

                let delayed = state.delay.process_sample(*x);
                let y = delayed * db_to_linear(gain_db) * self.output_gain.next();
                *x = y;
                peak_out = peak_out.max(y.abs());
            }
        }

        // Phase 4: metering
        self.meters.publish(MeterReadings {
            input_level_db: linear_to_db(peak_in),
            gain_reduction_db: peak_gr,
            output_level_db: linear_to_db(peak_out),
        });
        self.meters.publish_curve(CurveSnapshot::from(&self.curve));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::RatioSetting;

    fn compress(threshold_db: f32, ratio: f32, knee_db: f32) -> ParameterSnapshot {
        ParameterSnapshot {
            threshold_db,
            ratio: RatioSetting::Ratio(ratio),
            knee_width_db: knee_db,
            ..Default::default()
        }
    }

    fn run(engine: &mut CompressorEngine, bufs: &mut [Vec<f32>], params: &ParameterSnapshot) {
        let mut slices: Vec<&mut [f32]> = bufs.iter_mut().map(|b| b.as_mut_slice()).collect();
        engine.process(&mut slices, params);
    }

    #[test]
    fn test_steady_tone_end_to_end() {
        let mut engine = CompressorEngine::new();
        engine.prepare(48000.0, 1, 256);
        let params = compress(-20.0, 4.0, 0.0);

        let x = db_to_linear(-10.0);
        let mut bufs = vec![vec![x; 256]];
        run(&mut engine, &mut bufs, &params);

        for &y in &bufs[0] {
            assert!((linear_to_db(y) + 17.5).abs() < 1e-3, "{y}");
        }
        let m = engine.meter_reader().readings();
        assert!((m.input_level_db + 10.0).abs() < 1e-3);
        assert!((m.gain_reduction_db + 7.5).abs() < 1e-3);
        assert!((m.output_level_db + 17.5).abs() < 1e-3);
    }

    #[test]
    fn test_linked_channels_get_identical_gain() {
        let mut engine = CompressorEngine::new();
        engine.prepare(48000.0, 2, 128);
        let params = compress(-30.0, 4.0, 0.0);

        let mut bufs = vec![vec![0.1f32; 128], vec![0.9f32; 128]];
        run(&mut engine, &mut bufs, &params);

        let expected = db_to_linear(engine.curve().gain_reduction_for_level(0.9));
        assert!(expected < 1.0);
        for i in 0..128 {
            let g0 = bufs[0][i] / 0.1;
            let g1 = bufs[1][i] / 0.9;
            assert!((g0 - g1).abs() < 1e-5, "sample {i}");
            assert!((g1 - expected).abs() < 1e-5, "sample {i}");
        }
    }

    #[test]
    fn test_unlinked_first_channel_uses_last_channel_levels() {
        let mut engine = CompressorEngine::new();
        engine.prepare(48000.0, 2, 64);
        let params = ParameterSnapshot {
            linked: false,
            ..compress(-20.0, 4.0, 0.0)
        };

        let mut bufs = vec![vec![0.1f32; 64], vec![0.9f32; 64]];
        run(&mut engine, &mut bufs, &params);

        // 0.1 is -20 dB, at threshold: on its own it would pass unchanged.
        let loud_gain = db_to_linear(engine.curve().gain_reduction_for_level(0.9));
        assert!(loud_gain < 0.6);
        for &y in &bufs[0] {
            assert!((y - 0.1 * loud_gain).abs() < 1e-6);
        }
        for &y in &bufs[1] {
            assert!((y - 0.9 * loud_gain).abs() < 1e-5);
        }
    }

    #[test]
    fn test_unlinked_later_channels_advance_twice() {
        let fs = 1000.0;
        let mut engine = CompressorEngine::new();
        engine.prepare(fs, 2, 8);
        let params = ParameterSnapshot {
            linked: false,
            release_ms: 10.0,
            ..Default::default()
        };

        let mut bufs = vec![vec![1.0f32; 8], vec![1.0f32; 8]];
        run(&mut engine, &mut bufs, &params);
        assert_eq!(engine.channels[0].envelope.level, 1.0);
        assert_eq!(engine.channels[1].envelope.level, 1.0);

        let mut bufs = vec![vec![0.0f32; 4], vec![0.0f32; 4]];
        run(&mut engine, &mut bufs, &params);

        let keep = 1.0 - engine.estimator().release_coefficient();
        let ch0 = engine.channels[0].envelope.level;
        let ch1 = engine.channels[1].envelope.level;
        assert!((ch0 - keep.powi(4)).abs() < 1e-6);
        assert!((ch1 - keep.powi(8)).abs() < 1e-6);
    }

    #[test]
    fn test_input_ramp_advances_per_channel_sample() {
        let mut engine = CompressorEngine::new();
        // 20 ms at 1 kHz: a 20 step ramp
        engine.prepare(1000.0, 2, 10);
        let params = ParameterSnapshot {
            input_gain_db: 6.0,
            ..Default::default()
        };
        let target = db_to_linear(6.0);

        let mut bufs = vec![vec![1.0f32; 10], vec![1.0f32; 10]];
        run(&mut engine, &mut bufs, &params);

        // Channel 0 saw steps 1..=10, channel 1 steps 11..=20.
        let step = (target - 1.0) / 20.0;
        assert!((bufs[0][0] - (1.0 + step)).abs() < 1e-5);
        assert!((bufs[0][9] - (1.0 + 10.0 * step)).abs() < 1e-5);
        assert!((bufs[1][0] - (1.0 + 11.0 * step)).abs() < 1e-5);
        assert_eq!(bufs[1][9], target);
    }

    #[test]
    fn test_unchanged_gain_target_keeps_ramp_running() {
        let mut engine = CompressorEngine::new();
        engine.prepare(1000.0, 1, 10);
        let params = ParameterSnapshot {
            output_gain_db: -6.0,
            ..Default::default()
        };
        let target = db_to_linear(-6.0);
        let step = (target - 1.0) / 20.0;

        let mut bufs = vec![vec![1.0f32; 10]];
        run(&mut engine, &mut bufs, &params);
        assert!((bufs[0][9] - (1.0 + 10.0 * step)).abs() < 1e-5);

        // Same target again: the ramp continues instead of restarting.
        let mut bufs = vec![vec![1.0f32; 10]];
        run(&mut engine, &mut bufs, &params);
        assert!((bufs[0][0] - (1.0 + 11.0 * step)).abs() < 1e-5);
        assert_eq!(bufs[0][9], target);

        let mut bufs = vec![vec![1.0f32; 10]];
        run(&mut engine, &mut bufs, &params);
        assert!(bufs[0].iter().all(|&y| y == target));
    }

    #[test]
    fn test_prepare_lands_gain_on_target() {
        let mut engine = CompressorEngine::new();
        engine.prepare(1000.0, 1, 10);
        let params = ParameterSnapshot {
            input_gain_db: 6.0,
            ..Default::default()
        };
        let mut bufs = vec![vec![1.0f32; 10]];
        run(&mut engine, &mut bufs, &params);

        // Mid-ramp re-prepare jumps straight to the target.
        engine.prepare(2000.0, 1, 10);
        let mut bufs = vec![vec![1.0f32; 10]];
        run(&mut engine, &mut bufs, &params);
        assert!(bufs[0].iter().all(|&y| y == db_to_linear(6.0)));
    }

    #[test]
    fn test_prepare_resets_channel_state() {
        let mut engine = CompressorEngine::new();
        engine.prepare(48000.0, 2, 64);
        let params = ParameterSnapshot {
            lookahead_ms: 1.0,
            ..compress(-20.0, 4.0, 0.0)
        };
        let mut bufs = vec![vec![0.9f32; 64], vec![0.9f32; 64]];
        run(&mut engine, &mut bufs, &params);
        assert!(engine.channels.iter().all(|c| c.envelope.level > 0.0));
        assert_eq!(engine.latency_samples(), 48);

        engine.prepare(44100.0, 1, 32);
        assert_eq!(engine.num_channels(), 1);
        assert_eq!(engine.sample_rate(), 44100.0);
        assert_eq!(engine.estimator().sample_rate(), 44100.0);
        assert_eq!(engine.channels[0].envelope, EnvelopeState::default());

        // 44 samples of lookahead at the new rate; the old history is gone.
        let mut bufs = vec![vec![0.9f32; 32]];
        run(&mut engine, &mut bufs, &params);
        assert_eq!(engine.latency_samples(), 44);
        assert!(bufs[0].iter().all(|&y| y == 0.0));

        // The second channel no longer exists, so a stereo block passes through.
        let mut bufs = vec![vec![0.9f32; 32], vec![0.9f32; 32]];
        run(&mut engine, &mut bufs, &params);
        assert!(bufs.iter().flatten().all(|&y| y == 0.9));
    }

    #[test]
    fn test_prepare_keeps_rate_on_invalid_sample_rate() {
        let mut engine = CompressorEngine::new();
        engine.prepare(48000.0, 1, 16);
        engine.prepare(0.0, 2, 16);
        assert_eq!(engine.sample_rate(), 48000.0);
        assert_eq!(engine.num_channels(), 2);

        engine.prepare(-44100.0, 1, 16);
        assert_eq!(engine.sample_rate(), 48000.0);
        assert_eq!(engine.estimator().sample_rate(), 48000.0);
        let params = ParameterSnapshot {
            lookahead_ms: 1.0,
            ..Default::default()
        };
        assert_eq!(engine.latency_for(&params), 48);
    }

    #[test]
    fn test_bypass_passes_audio_and_drops_latency() {
        let mut engine = CompressorEngine::new();
        engine.prepare(48000.0, 2, 64);
        let mut params = ParameterSnapshot {
            lookahead_ms: 5.0,
            ..compress(-40.0, 8.0, 0.0)
        };

        let mut bufs = vec![vec![0.5f32; 64], vec![-0.5f32; 64]];
        run(&mut engine, &mut bufs, &params);
        assert_eq!(engine.latency_samples(), 240);
        assert_eq!(engine.latency_for(&params), 240);
        assert!(engine.meter_reader().gain_reduction_db() < 0.0);

        params.bypass = true;
        let input: Vec<Vec<f32>> = (0..2)
            .map(|c| (0..64).map(|i| ((i + c) as f32 * 0.3).sin()).collect())
            .collect();
        let mut bufs = input.clone();
        run(&mut engine, &mut bufs, &params);

        assert_eq!(bufs, input);
        assert_eq!(engine.meter_reader().gain_reduction_db(), 0.0);
        assert_eq!(engine.latency_samples(), 0);
        assert_eq!(engine.latency_for(&params), 0);
        assert!(engine.is_bypassed());
    }

    #[test]
    fn test_lookahead_delays_audio_path() {
        let mut engine = CompressorEngine::new();
        engine.prepare(1000.0, 1, 16);
        let params = ParameterSnapshot {
            lookahead_ms: 5.0,
            ..Default::default()
        };

        let mut impulse = vec![0.0f32; 16];
        impulse[0] = 0.5;
        let mut bufs = vec![impulse];
        run(&mut engine, &mut bufs, &params);

        assert_eq!(engine.latency_samples(), 5);
        for (i, &y) in bufs[0].iter().enumerate() {
            let expected = if i == 5 { 0.5 } else { 0.0 };
            assert_eq!(y, expected, "sample {i}");
        }
    }

    #[test]
    fn test_lookahead_is_clamped_to_capacity() {
        let mut engine = CompressorEngine::new();
        engine.prepare(384000.0, 1, 16);
        let params = ParameterSnapshot {
            lookahead_ms: 30.0,
            ..Default::default()
        };
        let mut bufs = vec![vec![0.0f32; 16]];
        run(&mut engine, &mut bufs, &params);
        assert_eq!(engine.latency_samples(), MAX_LOOKAHEAD_SAMPLES);
    }

    #[test]
    fn test_unprepared_channels_pass_through() {
        let mut engine = CompressorEngine::new();
        engine.prepare(48000.0, 1, 32);
        let params = compress(-40.0, 10.0, 0.0);

        let mut bufs = vec![vec![0.8f32; 32], vec![0.8f32; 32]];
        run(&mut engine, &mut bufs, &params);
        assert!(bufs.iter().flatten().all(|&y| y == 0.8));
        assert_eq!(engine.meter_reader().readings(), MeterReadings::default());
    }

    #[test]
    fn test_oversize_block_grows_level_buffer() {
        let mut engine = CompressorEngine::new();
        engine.prepare(48000.0, 1, 16);
        let params = compress(-20.0, 4.0, 0.0);
        let x = db_to_linear(-10.0);
        let mut bufs = vec![vec![x; 100]];
        run(&mut engine, &mut bufs, &params);
        assert!(bufs[0].iter().all(|&y| (linear_to_db(y) + 17.5).abs() < 1e-3));
    }

    #[test]
    fn test_silence_meters() {
        let mut engine = CompressorEngine::new();
        engine.prepare(48000.0, 2, 32);
        let mut bufs = vec![vec![0.0f32; 32], vec![0.0f32; 32]];
        run(&mut engine, &mut bufs, &compress(-20.0, 4.0, 6.0));
        let m = engine.meter_reader().readings();
        assert_eq!(m.input_level_db, f32::NEG_INFINITY);
        assert_eq!(m.output_level_db, f32::NEG_INFINITY);
        assert_eq!(m.gain_reduction_db, 0.0);
    }

    #[test]
    fn test_reset_clears_state_and_publishes_curve() {
        let mut engine = CompressorEngine::new();
        engine.prepare(48000.0, 1, 16);
        let params = ParameterSnapshot {
            lookahead_ms: 0.1,
            ..compress(-12.0, 3.0, 4.0)
        };
        let mut bufs = vec![vec![0.7f32; 16]];
        run(&mut engine, &mut bufs, &params);
        assert!(engine.channels[0].envelope.level > 0.0);

        let curve = engine.meter_reader().curve();
        assert_eq!(curve.threshold_db, -12.0);
        assert_eq!(curve.mode.ratio(), 3.0);
        assert_eq!(curve.knee_width_db, 4.0);

        engine.reset();
        assert_eq!(engine.channels[0].envelope, EnvelopeState::default());
        // Delay history is gone: first output is the zero fill.
        let mut bufs = vec![vec![0.7f32; 16]];
        run(&mut engine, &mut bufs, &params);
        assert_eq!(bufs[0][0], 0.0);
    }
}
