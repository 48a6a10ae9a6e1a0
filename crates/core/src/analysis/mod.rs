use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Samples kept by the analyser, matching a 2048-point analysis window.
pub const ANALYSER_WINDOW: usize = 2048;

const BYTE_MIDPOINT: f32 = 128.0;
const SMOOTHING: f32 = 0.8;
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Loudness reading for a single frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Loudness {
    /// Doubled RMS of the centered waveform, clamped to `[0, 1]`.
    pub level: f32,
    pub talking: bool,
}

/// Computes loudness from byte time-domain data, where 128 is silence.
pub fn measure_loudness(waveform: &[u8], threshold: f32) -> Loudness {
    if waveform.is_empty() {
        return Loudness::default();
    }

    let sum_squares: f32 = waveform
        .iter()
        .map(|&byte| {
            let centered = (byte as f32 - BYTE_MIDPOINT) / BYTE_MIDPOINT;
            centered * centered
        })
        .sum();
    let rms = (sum_squares / waveform.len() as f32).sqrt();
    let level = (rms * 2.0).clamp(0.0, 1.0);

    Loudness {
        level,
        talking: level > threshold,
    }
}

/// Rolling analyser over the most recent [`ANALYSER_WINDOW`] samples.
///
/// Time-domain data is exposed as bytes around 128; frequency data as
/// smoothed decibel magnitudes mapped onto `0..=255`.
pub struct Analyser {
    size: usize,
    ring: Vec<f32>,
    write: usize,
    waveform: Vec<u8>,
    smoothed: Vec<f32>,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl Analyser {
    /// An analyser over the standard 2048-sample window.
    pub fn new() -> Self {
        Self::with_size(ANALYSER_WINDOW)
    }

    /// `size` is rounded up to an even sample count of at least two.
    pub fn with_size(size: usize) -> Self {
        let size = size.max(2).next_multiple_of(2);
        Self {
            size,
            ring: vec![0.0; size],
            write: 0,
            waveform: vec![BYTE_MIDPOINT as u8; size],
            smoothed: vec![0.0; size / 2],
            fft_planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    /// Samples per analysis window.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of bytes returned by [`Analyser::frequency_bytes`].
    pub fn frequency_bin_count(&self) -> usize {
        self.size / 2
    }

    /// Clears the sample window and the spectrum's running average.
    pub fn reset(&mut self) {
        self.ring.fill(0.0);
        self.write = 0;
        self.smoothed.fill(0.0);
    }

    /// Appends samples in `[-1, 1]`, overwriting the oldest ones.
    pub fn push_samples(&mut self, samples: &[f32]) {
        let skip = samples.len().saturating_sub(self.size);
        for &sample in &samples[skip..] {
            self.ring[self.write] = sample;
            self.write = (self.write + 1) % self.size;
        }
    }

    /// Current window, oldest sample first, as bytes.
    pub fn time_domain_bytes(&mut self) -> &[u8] {
        for (offset, byte) in self.waveform.iter_mut().enumerate() {
            let sample = self.ring[(self.write + offset) % self.size];
            *byte = (BYTE_MIDPOINT * (1.0 + sample)).clamp(0.0, 255.0) as u8;
        }
        &self.waveform
    }

    /// Spectrum of the current window. Each call folds the new magnitudes into
    /// the running average.
    pub fn frequency_bytes(&mut self) -> Result<Vec<u8>> {
        let size = self.size;
        let mut fft = match self.fft.take() {
            Some(fft) => fft,
            None => self.plan_fft(),
        };

        for (index, slot) in fft.input.iter_mut().enumerate() {
            *slot = self.ring[(self.write + index) % size] * blackman_value(index, size);
        }

        let processed =
            fft.plan
                .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch);
        if let Err(err) = processed {
            self.fft = Some(fft);
            return Err(err.into());
        }

        let range = MAX_DECIBELS - MIN_DECIBELS;
        let mut bytes = Vec::with_capacity(self.smoothed.len());
        for (bin, average) in self.smoothed.iter_mut().enumerate() {
            let magnitude = fft.spectrum[bin].norm() / size as f32;
            *average = SMOOTHING * *average + (1.0 - SMOOTHING) * magnitude;
            let decibels = if *average > 0.0 {
                20.0 * average.log10()
            } else {
                f32::NEG_INFINITY
            };
            let scaled = 255.0 / range * (decibels - MIN_DECIBELS);
            bytes.push(scaled.clamp(0.0, 255.0) as u8);
        }

        self.fft = Some(fft);
        Ok(bytes)
    }

    fn plan_fft(&mut self) -> FftResources {
        let plan = self.fft_planner.plan_fft_forward(self.size);
        let scratch = plan.make_scratch_vec();
        let spectrum = plan.make_output_vec();
        let input = plan.make_input_vec();
        FftResources {
            plan,
            scratch,
            spectrum,
            input,
        }
    }
}

impl Default for Analyser {
    fn default() -> Self {
        Self::new()
    }
}

struct FftResources {
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for Analyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analyser")
            .field("size", &self.size)
            .field("write", &self.write)
            .field("fft_ready", &self.fft.is_some())
            .finish()
    }
}

fn blackman_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    let phase = 2.0 * PI * index as f32 / len as f32;
    0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos()
}
