//! Lookahead Delay Line
//!
//! Fixed-capacity circular buffer that delays the audio path relative to the
//! level detector. Capacity is `max_delay + 1` so a delay of `max_delay`
//! samples never reads the slot being written.
//!
//! Delay changes take effect on the next sample without crossfading, so a
//! change mid-stream can click. Allocation only happens in [`DelayLine::new`]
//! and [`DelayLine::prepare`].

use crate::dsp::utils::ms_to_samples;

#[derive(Clone, Debug)]
pub struct DelayLine {
    buf: Vec<f32>,
    write_idx: usize,
    delay: usize,
    max_delay: usize,
}

impl Default for DelayLine {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DelayLine {
    pub fn new(max_delay: usize) -> Self {
        Self {
            buf: vec![0.0; max_delay + 1],
            write_idx: 0,
            delay: 0,
            max_delay,
        }
    }

    /// Reallocate for a new maximum delay and clear.
    /// The current delay is re-clamped to the new bound.
    pub fn prepare(&mut self, max_delay: usize) {
        self.max_delay = max_delay;
        self.buf.clear();
        self.buf.resize(max_delay + 1, 0.0);
        self.delay = self.delay.min(max_delay);
        self.reset();
    }

    pub fn reset(&mut self) {
        self.buf.fill(0.0);
        self.write_idx = 0;
    }

    /// Clamped to `[0, max_delay]`.
    pub fn set_delay(&mut self, delay_samples: usize) {
        self.delay = delay_samples.min(self.max_delay);
    }

    pub fn set_delay_ms(&mut self, delay_ms: f32, sample_rate: f32) {
        self.set_delay(ms_to_samples(delay_ms, sample_rate));
    }

    pub fn delay(&self) -> usize {
        self.delay
    }

    pub fn max_delay(&self) -> usize {
        self.max_delay
    }

    #[inline]
    pub fn process_sample(&mut self, sample: f32) -> f32 {
        let len = self.buf.len();
        self.buf[self.write_idx] = sample;
        let read_idx = (self.write_idx + len - self.delay) % len;
        let out = self.buf[read_idx];
        self.write_idx = (self.write_idx + 1) % len;
        out
    }

    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        for (&x, y) in input.iter().zip(output.iter_mut()) {
            *y = self.process_sample(x);
        }
    }

    pub fn process_in_place(&mut self, buf: &mut [f32]) {
        for x in buf.iter_mut() {
            *x = self.process_sample(*x);
        }
    }
}
