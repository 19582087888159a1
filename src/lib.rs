pub mod debug;
pub mod dsp;
pub mod engine;
pub mod meters;
pub mod params;
pub mod presets;

use crate::debug::DrainSchedule;
use crate::engine::CompressorEngine;
use crate::params::{ParameterSnapshot, RatioSetting};
use nih_plug::prelude::*;
use std::sync::Arc;

// -----------------------------------------------------------------------------
// PARAMETERS
// -----------------------------------------------------------------------------

#[derive(Params)]
pub struct CompressorParams {
    #[id = "linked"]
    pub linked: BoolParam,

    #[id = "bypass"]
    pub bypass: BoolParam,

    #[id = "inputGain"]
    pub input_gain: FloatParam,

    #[id = "threshold"]
    pub threshold: FloatParam,

    #[id = "ratio"]
    pub ratio: FloatParam,

    /// Brick-wall mode; overrides `ratio` while on.
    #[id = "limiting"]
    pub limiting: BoolParam,

    #[id = "kneeWidth"]
    pub knee_width: FloatParam,

    #[id = "outputGain"]
    pub output_gain: FloatParam,

    #[id = "attackTime"]
    pub attack_time: FloatParam,

    #[id = "releaseTime"]
    pub release_time: FloatParam,

    #[id = "holdTime"]
    pub hold_time: FloatParam,

    #[id = "lookaheadTime"]
    pub lookahead_time: FloatParam,
}

fn format_db(v: f32) -> String {
    format!("{:.1} dB", v)
}

fn format_ms(v: f32) -> String {
    format!("{:.1} ms", v)
}

fn format_ratio(v: f32) -> String {
    format!("{:.1}:1", v)
}

/// Attack, release and hold share one skewed range.
fn time_param(name: &str, default_ms: f32) -> FloatParam {
    let (min, max) = params::TIME_RANGE_MS;
    FloatParam::new(
        name,
        default_ms,
        FloatRange::Skewed {
            min,
            max,
            factor: 0.4,
        },
    )
    .with_step_size(0.1)
    .with_value_to_string(Arc::new(format_ms))
}

fn gain_param(name: &str) -> FloatParam {
    let (min, max) = params::GAIN_RANGE_DB;
    FloatParam::new(name, 0.0, FloatRange::Linear { min, max })
        .with_smoother(SmoothingStyle::Linear(engine::GAIN_RAMP_MS))
        .with_step_size(0.1)
        .with_value_to_string(Arc::new(format_db))
}

impl Default for CompressorParams {
    fn default() -> Self {
        let d = ParameterSnapshot::default();
        let (threshold_min, threshold_max) = params::THRESHOLD_RANGE_DB;
        let (ratio_min, ratio_max) = params::RATIO_RANGE;
        let (knee_min, knee_max) = params::KNEE_RANGE_DB;

        Self {
            linked: BoolParam::new("Linked", d.linked),
            bypass: BoolParam::new("Bypass", d.bypass).make_bypass(),
            input_gain: gain_param("Input Gain"),

            threshold: FloatParam::new(
                "Threshold",
                d.threshold_db,
                FloatRange::Linear {
                    min: threshold_min,
                    max: threshold_max,
                },
            )
            .with_step_size(0.1)
            .with_value_to_string(Arc::new(format_db)),

            ratio: FloatParam::new(
                "Ratio",
                1.0,
                FloatRange::Skewed {
                    min: ratio_min,
                    max: ratio_max,
                    factor: 0.3,
                },
            )
            .with_step_size(0.1)
            .with_value_to_string(Arc::new(format_ratio)),

            limiting: BoolParam::new("Limiting", false),

            knee_width: FloatParam::new(
                "Knee Width",
                d.knee_width_db,
                FloatRange::Linear {
                    min: knee_min,
                    max: knee_max,
                },
            )
            .with_step_size(0.1)
            .with_value_to_string(Arc::new(format_db)),

            output_gain: gain_param("Output Gain"),
            attack_time: time_param("Attack", d.attack_ms),
            release_time: time_param("Release", d.release_ms),
            hold_time: time_param("Hold", d.hold_ms),
            lookahead_time: FloatParam::new(
                "Lookahead",
                d.lookahead_ms,
                FloatRange::Linear {
                    min: params::LOOKAHEAD_RANGE_MS.0,
                    max: params::LOOKAHEAD_RANGE_MS.1,
                },
            )
            .with_step_size(0.1)
            .with_value_to_string(Arc::new(format_ms)),
        }
    }
}

impl CompressorParams {
    /// Read every control once for the coming block.
    pub fn snapshot(&self) -> ParameterSnapshot {
        let ratio = if self.limiting.value() {
            RatioSetting::Limiting
        } else {
            RatioSetting::Ratio(self.ratio.value())
        };
        ParameterSnapshot {
            linked: self.linked.value(),
            bypass: self.bypass.value(),
            input_gain_db: self.input_gain.value(),
            threshold_db: self.threshold.value(),
            ratio,
            knee_width_db: self.knee_width.value(),
            output_gain_db: self.output_gain.value(),
            attack_ms: self.attack_time.value(),
            release_ms: self.release_time.value(),
            hold_ms: self.hold_time.value(),
            lookahead_ms: self.lookahead_time.value(),
        }
    }
}

// -----------------------------------------------------------------------------
// PLUGIN STRUCT
// -----------------------------------------------------------------------------

/// Work the audio thread hands to the host's background thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressorTask {
    /// Forward queued `comp_log!` lines to the `log` facade.
    DrainLog,
}

pub struct CompressorPlugin {
    params: Arc<CompressorParams>,
    engine: CompressorEngine,
    /// Last value handed to the host.
    reported_latency: u32,
    drain_schedule: DrainSchedule,
}

impl Default for CompressorPlugin {
    fn default() -> Self {
        Self {
            params: Arc::new(CompressorParams::default()),
            engine: CompressorEngine::new(),
            reported_latency: 0,
            drain_schedule: DrainSchedule::default(),
        }
    }
}

impl CompressorPlugin {
    pub fn meter_reader(&self) -> meters::MeterReader {
        self.engine.meter_reader()
    }

    fn process_internal(
        &mut self,
        buffer: &mut Buffer,
        context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        let snapshot = self.params.snapshot();
        self.engine.process(buffer.as_slice(), &snapshot);

        let latency = self.engine.latency_samples() as u32;
        if latency != self.reported_latency {
            crate::comp_log!("latency changed: {} -> {}", self.reported_latency, latency);
            self.reported_latency = latency;
            context.set_latency_samples(latency);
        }

        if cfg!(feature = "debug") && self.drain_schedule.tick() {
            context.execute_background(CompressorTask::DrainLog);
        }

        ProcessStatus::Normal
    }
}

impl Plugin for CompressorPlugin {
    const NAME: &'static str = "Broadband Compressor";
    const VENDOR: &'static str = "XRVST Plugins";
    const URL: &'static str = "";
    const EMAIL: &'static str = "";
    const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    const AUDIO_IO_LAYOUTS: &'static [AudioIOLayout] = &[
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(2),
            main_output_channels: NonZeroU32::new(2),
            ..AudioIOLayout::const_default()
        },
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(1),
            main_output_channels: NonZeroU32::new(1),
            ..AudioIOLayout::const_default()
        },
    ];

    const MIDI_INPUT: MidiConfig = MidiConfig::None;
    const SAMPLE_ACCURATE_AUTOMATION: bool = false;

    type SysExMessage = ();
    type BackgroundTask = CompressorTask;

    fn params(&self) -> Arc<dyn Params> {
        self.params.clone()
    }

    fn initialize(
        &mut self,
        audio_io_layout: &AudioIOLayout,
        buffer_config: &BufferConfig,
        context: &mut impl InitContext<Self>,
    ) -> bool {
        crate::debug::init();

        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let num_channels = audio_io_layout
                .main_output_channels
                .map(NonZeroU32::get)
                .unwrap_or(0) as usize;

            self.engine.prepare(
                buffer_config.sample_rate,
                num_channels,
                buffer_config.max_buffer_size as usize,
            );

            self.reported_latency = self.engine.latency_for(&self.params.snapshot()) as u32;
            context.set_latency_samples(self.reported_latency);

            crate::debug::drain();
            true
        }))
        .unwrap_or(false)
    }

    fn task_executor(&mut self) -> TaskExecutor<Self> {
        Box::new(|task| match task {
            CompressorTask::DrainLog => {
                crate::debug::drain();
            }
        })
    }

    fn process(
        &mut self,
        buffer: &mut Buffer,
        _aux: &mut AuxiliaryBuffers,
        context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.process_internal(buffer, context)
        }))
        .unwrap_or(ProcessStatus::Normal)
    }

    fn reset(&mut self) {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.engine.reset();
        }))
        .unwrap_or(());
    }

    fn deactivate(&mut self) {
        crate::debug::drain();
    }
}

impl ClapPlugin for CompressorPlugin {
    const CLAP_ID: &'static str = "com.xrvst.broadband-compressor";
    const CLAP_DESCRIPTION: Option<&'static str> =
        Some("Broadband compressor with soft knee, hold and lookahead");
    const CLAP_MANUAL_URL: Option<&'static str> = None;
    const CLAP_SUPPORT_URL: Option<&'static str> = None;
    const CLAP_FEATURES: &'static [ClapFeature] = &[
        ClapFeature::AudioEffect,
        ClapFeature::Compressor,
        ClapFeature::Limiter,
        ClapFeature::Mono,
        ClapFeature::Stereo,
    ];
}

impl Vst3Plugin for CompressorPlugin {
    const VST3_CLASS_ID: [u8; 16] = *b"XrvstBroadbndCmp";
    const VST3_SUBCATEGORIES: &'static [Vst3SubCategory] =
        &[Vst3SubCategory::Fx, Vst3SubCategory::Dynamics];
}

nih_export_clap!(CompressorPlugin);
nih_export_vst3!(CompressorPlugin);
