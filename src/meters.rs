//! Thread-safe metering for the compressor.
//!
//! The audio thread is the only writer: it owns the [`MeterWriter`] and
//! publishes once per block. Any number of [`MeterReader`] clones can poll
//! from other threads without locks. Values are stored as `f32` bits in
//! `AtomicU32` with relaxed ordering, so each field may be independently
//! stale and there is no ordering between fields.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::dsp::{CompressionCurve, CompressionMode};

/// Peak readings for the most recent processed block.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeterReadings {
    /// Peak input level after input gain, dBFS. `-inf` for silence.
    pub input_level_db: f32,
    /// Most negative gain change applied in the block, `<= 0`.
    pub gain_reduction_db: f32,
    /// Peak output level, dBFS. `-inf` for silence.
    pub output_level_db: f32,
}

impl Default for MeterReadings {
    fn default() -> Self {
        Self {
            input_level_db: f32::NEG_INFINITY,
            gain_reduction_db: 0.0,
            output_level_db: f32::NEG_INFINITY,
        }
    }
}

/// The curve parameters that were active for the last block.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CurveSnapshot {
    pub threshold_db: f32,
    pub knee_width_db: f32,
    pub mode: CompressionMode,
    pub makeup_gain_db: f32,
}

impl Default for CurveSnapshot {
    fn default() -> Self {
        Self::from(&CompressionCurve::default())
    }
}

impl From<&CompressionCurve> for CurveSnapshot {
    fn from(curve: &CompressionCurve) -> Self {
        Self {
            threshold_db: curve.threshold_db(),
            knee_width_db: curve.knee_width_db(),
            mode: curve.mode(),
            makeup_gain_db: curve.makeup_gain_db(),
        }
    }
}

impl CurveSnapshot {
    pub fn to_curve(&self) -> CompressionCurve {
        let mut curve = CompressionCurve::new();
        curve.set_threshold_db(self.threshold_db);
        curve.set_knee_width_db(self.knee_width_db);
        curve.set_mode(self.mode);
        curve.set_makeup_gain_db(self.makeup_gain_db);
        curve
    }

    /// Static transfer function for drawing the curve.
    pub fn output_level_db(&self, input_db: f32) -> f32 {
        self.to_curve().output_level_db(input_db)
    }
}

struct AtomicF32Bits(AtomicU32);

impl AtomicF32Bits {
    fn new(val: f32) -> Self {
        Self(AtomicU32::new(val.to_bits()))
    }

    #[inline]
    fn set(&self, val: f32) {
        self.0.store(val.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

struct MeterCells {
    input_level_db: AtomicF32Bits,
    gain_reduction_db: AtomicF32Bits,
    output_level_db: AtomicF32Bits,

    threshold_db: AtomicF32Bits,
    knee_width_db: AtomicF32Bits,
    ratio: AtomicF32Bits,
    limiting: AtomicBool,
    makeup_gain_db: AtomicF32Bits,
}

impl Default for MeterCells {
    fn default() -> Self {
        let readings = MeterReadings::default();
        let curve = CurveSnapshot::default();
        Self {
            input_level_db: AtomicF32Bits::new(readings.input_level_db),
            gain_reduction_db: AtomicF32Bits::new(readings.gain_reduction_db),
            output_level_db: AtomicF32Bits::new(readings.output_level_db),
            threshold_db: AtomicF32Bits::new(curve.threshold_db),
            knee_width_db: AtomicF32Bits::new(curve.knee_width_db),
            ratio: AtomicF32Bits::new(curve.mode.ratio()),
            limiting: AtomicBool::new(false),
            makeup_gain_db: AtomicF32Bits::new(curve.makeup_gain_db),
        }
    }
}

/// Create a connected writer/reader pair.
pub fn channel() -> (MeterWriter, MeterReader) {
    let cells = Arc::new(MeterCells::default());
    (
        MeterWriter {
            cells: cells.clone(),
        },
        MeterReader { cells },
    )
}

/// Publishing half. Deliberately not `Clone`.
pub struct MeterWriter {
    cells: Arc<MeterCells>,
}

impl MeterWriter {
    pub fn publish(&self, readings: MeterReadings) {
        self.cells.input_level_db.set(readings.input_level_db);
        self.cells.gain_reduction_db.set(readings.gain_reduction_db);
        self.cells.output_level_db.set(readings.output_level_db);
    }

    /// Only the gain reduction field, used while bypassed.
    pub fn publish_gain_reduction(&self, gain_reduction_db: f32) {
        self.cells.gain_reduction_db.set(gain_reduction_db);
    }

    pub fn publish_curve(&self, curve: CurveSnapshot) {
        let cells = &self.cells;
        cells.threshold_db.set(curve.threshold_db);
        cells.knee_width_db.set(curve.knee_width_db);
        match curve.mode {
            CompressionMode::Ratio(r) => {
                cells.ratio.set(r);
                cells.limiting.store(false, Ordering::Relaxed);
            }
            CompressionMode::Limiting => cells.limiting.store(true, Ordering::Relaxed),
        }
        cells.makeup_gain_db.set(curve.makeup_gain_db);
    }

    /// Reader attached to the same cells.
    pub fn reader(&self) -> MeterReader {
        MeterReader {
            cells: self.cells.clone(),
        }
    }
}

/// Polling half for meters and curve displays.
#[derive(Clone)]
pub struct MeterReader {
    cells: Arc<MeterCells>,
}

impl MeterReader {
    pub fn readings(&self) -> MeterReadings {
        MeterReadings {
            input_level_db: self.input_level_db(),
            gain_reduction_db: self.gain_reduction_db(),
            output_level_db: self.output_level_db(),
        }
    }

    pub fn input_level_db(&self) -> f32 {
        self.cells.input_level_db.get()
    }

    pub fn gain_reduction_db(&self) -> f32 {
        self.cells.gain_reduction_db.get()
    }

    pub fn output_level_db(&self) -> f32 {
        self.cells.output_level_db.get()
    }

    pub fn curve(&self) -> CurveSnapshot {
        let cells = &self.cells;
        let mode = if cells.limiting.load(Ordering::Relaxed) {
            CompressionMode::Limiting
        } else {
            CompressionMode::Ratio(cells.ratio.get())
        };
        CurveSnapshot {
            threshold_db: cells.threshold_db.get(),
            knee_width_db: cells.knee_width_db.get(),
            mode,
            makeup_gain_db: cells.makeup_gain_db.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_initial_readings() {
        let (_writer, reader) = channel();
        let r = reader.readings();
        assert_eq!(r.input_level_db, f32::NEG_INFINITY);
        assert_eq!(r.output_level_db, f32::NEG_INFINITY);
        assert_eq!(r.gain_reduction_db, 0.0);
        assert_eq!(reader.curve().mode, CompressionMode::Ratio(1.0));
    }

    #[test]
    fn test_publish_is_visible_to_every_reader() {
        let (writer, reader) = channel();
        let other = reader.clone();
        let readings = MeterReadings {
            input_level_db: -3.0,
            gain_reduction_db: -6.5,
            output_level_db: -9.5,
        };
        writer.publish(readings);
        assert_eq!(reader.readings(), readings);
        assert_eq!(other.readings(), readings);
        assert_eq!(writer.reader().gain_reduction_db(), -6.5);

        writer.publish_gain_reduction(0.0);
        assert_eq!(reader.gain_reduction_db(), 0.0);
        assert_eq!(reader.input_level_db(), -3.0);
    }

    #[test]
    fn test_curve_snapshot_round_trip_and_transfer() {
        let (writer, reader) = channel();
        let mut curve = CompressionCurve::new();
        curve.set_threshold_db(-20.0);
        curve.set_ratio(4.0);
        curve.set_knee_width_db(6.0);
        curve.set_makeup_gain_db(3.0);
        writer.publish_curve(CurveSnapshot::from(&curve));

        let snap = reader.curve();
        assert_eq!(snap.mode, CompressionMode::Ratio(4.0));
        assert_eq!(snap.threshold_db, -20.0);
        assert!((snap.output_level_db(-10.0) + 17.5).abs() < 1e-4);

        curve.set_limiting();
        writer.publish_curve(CurveSnapshot::from(&curve));
        let snap = reader.curve();
        assert_eq!(snap.mode, CompressionMode::Limiting);
        assert!((snap.output_level_db(0.0) + 20.0).abs() < 1e-5);
    }

    #[test]
    fn test_reader_on_other_thread() {
        let (writer, reader) = channel();
        let handle = thread::spawn(move || {
            let mut last = 0.0;
            for _ in 0..1000 {
                let gr = reader.gain_reduction_db();
                assert!(gr <= 0.0 && gr >= -100.0);
                last = gr;
            }
            last
        });
        for i in 0..1000 {
            writer.publish_gain_reduction(-(i % 100) as f32);
        }
        let last = handle.join().unwrap();
        assert!(last <= 0.0);
    }
}
