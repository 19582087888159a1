use anyhow::{bail, Context, Result};
use broadband_compressor::engine::CompressorEngine;
use broadband_compressor::params::ParameterSnapshot;
use broadband_compressor::presets::{FactoryPreset, PresetManager};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::{Path, PathBuf};

const BLOCK_SIZE: usize = 512;

const USAGE: &str = "usage: render_wav <input.wav> <output.wav> [preset-name | params.json]";

/// Preset name, JSON file, or defaults.
fn load_params(arg: Option<String>) -> Result<ParameterSnapshot> {
    let arg = match arg {
        Some(a) => a,
        None => return Ok(ParameterSnapshot::default()),
    };

    if let Some(preset) = FactoryPreset::from_name(&arg) {
        log::info!("using factory preset '{}'", preset.name());
        return Ok(PresetManager::new().snapshot(preset));
    }

    let path = Path::new(&arg);
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("'{}' is neither a preset nor a readable file", arg))?;
    let params: ParameterSnapshot = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse parameters from '{}'", path.display()))?;
    let sanitized = params.sanitized();
    if sanitized != params {
        log::warn!("parameters in '{}' were clamped into range", path.display());
    }
    Ok(sanitized)
}

/// De-interleaved channels scaled to [-1, 1].
fn read_channels(path: &Path) -> Result<(WavSpec, Vec<Vec<f32>>)> {
    let reader = WavReader::open(path)
        .with_context(|| format!("failed to open input WAV '{}'", path.display()))?;
    let spec = reader.spec();
    let num_channels = spec.channels as usize;
    if num_channels == 0 {
        bail!("'{}' has no channels", path.display());
    }

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader
            .into_samples::<i16>()
            .map(|s| s.map(|v| v as f32 / i16::MAX as f32))
            .collect::<Result<_, _>>()?,
        (SampleFormat::Float, 32) => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
        (format, bits) => bail!("unsupported WAV format: {:?} {} bit", format, bits),
    };

    let frames = interleaved.len() / num_channels;
    let mut channels = vec![Vec::with_capacity(frames); num_channels];
    for frame in interleaved.chunks_exact(num_channels) {
        for (ch, &s) in channels.iter_mut().zip(frame) {
            ch.push(s);
        }
    }
    Ok((spec, channels))
}

fn write_channels(path: &Path, sample_rate: u32, channels: &[Vec<f32>]) -> Result<()> {
    let spec = WavSpec {
        channels: channels.len() as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("failed to create output WAV '{}'", path.display()))?;
    let frames = channels.first().map_or(0, Vec::len);
    for i in 0..frames {
        for ch in channels {
            writer.write_sample(ch[i])?;
        }
    }
    writer.finalize()?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let input = args.next().map(PathBuf::from).context(USAGE)?;
    let output = args.next().map(PathBuf::from).context(USAGE)?;
    let params = load_params(args.next())?;

    let (spec, mut channels) = read_channels(&input)?;
    let frames = channels[0].len();

    let mut engine = CompressorEngine::new();
    engine.prepare(spec.sample_rate as f32, channels.len(), BLOCK_SIZE);
    let reader = engine.meter_reader();

    let mut min_gr = 0.0f32;
    let mut peak_out = f32::NEG_INFINITY;
    let mut start = 0;
    while start < frames {
        let end = (start + BLOCK_SIZE).min(frames);
        let mut block: Vec<&mut [f32]> = channels
            .iter_mut()
            .map(|ch| &mut ch[start..end])
            .collect();
        engine.process(&mut block, &params);

        let m = reader.readings();
        min_gr = min_gr.min(m.gain_reduction_db);
        peak_out = peak_out.max(m.output_level_db);
        start = end;
    }

    write_channels(&output, spec.sample_rate, &channels)?;

    println!("Rendered '{}' -> '{}':", input.display(), output.display());
    println!("  channels         : {}", channels.len());
    println!("  frames processed : {}", frames);
    println!("  latency          : {} samples", engine.latency_samples());
    println!("  max reduction    : {:.2} dB", min_gr);
    println!("  peak output      : {:.2} dBFS", peak_out);
    Ok(())
}
