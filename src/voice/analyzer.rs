//! Frequency-domain loudness estimation
//!
//! Mirrors a browser analyser node: Blackman-windowed FFT, temporal
//! smoothing, and decibel magnitudes mapped onto 0..=255 byte bins. The
//! mean bin value over a reference ceiling gives a quality score in [0, 1].

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

/// Analyzer tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyzerConfig {
    /// Samples per analysis window (power of two)
    pub fft_size: usize,
    /// Weight of the previous frame in [0, 1)
    pub smoothing: f32,
    /// Magnitude mapped to byte value 0
    pub min_decibels: f32,
    /// Magnitude mapped to byte value 255
    pub max_decibels: f32,
    /// Mean byte value reported as full quality
    pub reference_ceiling: f32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            fft_size: 256,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
            reference_ceiling: 128.0,
        }
    }
}

/// Stateful spectrum analyzer over a single microphone stream
pub struct SpectrumAnalyzer {
    config: AnalyzerConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    scratch: Vec<Complex32>,
    smoothed: Vec<f32>,
    bytes: Vec<u8>,
}

impl SpectrumAnalyzer {
    #[must_use]
    pub fn new(config: AnalyzerConfig) -> Self {
        let size = config.fft_size.max(2);
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);

        Self {
            config: AnalyzerConfig {
                fft_size: size,
                ..config
            },
            fft,
            window: blackman(size),
            scratch: vec![Complex32::ZERO; size],
            smoothed: vec![0.0; size / 2],
            bytes: vec![0; size / 2],
        }
    }

    /// Samples consumed per frame
    #[must_use]
    pub const fn fft_size(&self) -> usize {
        self.config.fft_size
    }

    /// Byte magnitudes per frequency bin from the latest frame
    #[must_use]
    pub fn frequency_bins(&self) -> &[u8] {
        &self.bytes
    }

    /// Analyze the most recent samples and return the quality score
    ///
    /// Short input is zero-padded at the front.
    pub fn quality(&mut self, samples: &[f32]) -> f32 {
        self.update(samples);

        if self.bytes.is_empty() || self.config.reference_ceiling <= 0.0 {
            return 0.0;
        }

        #[allow(clippy::cast_precision_loss)]
        let mean = self.bytes.iter().map(|&b| f32::from(b)).sum::<f32>() / self.bytes.len() as f32;

        (mean / self.config.reference_ceiling).clamp(0.0, 1.0)
    }

    fn update(&mut self, samples: &[f32]) {
        let size = self.config.fft_size;
        let input = &samples[samples.len().saturating_sub(size)..];
        let offset = size - input.len();

        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let sample = if i < offset { 0.0 } else { input[i - offset] };
            *slot = Complex32::new(sample * self.window[i], 0.0);
        }

        self.fft.process(&mut self.scratch);

        #[allow(clippy::cast_precision_loss)]
        let scale = 1.0 / size as f32;
        let smoothing = self.config.smoothing.clamp(0.0, 0.999);
        let range = (self.config.max_decibels - self.config.min_decibels).max(f32::EPSILON);

        for (bin, (smoothed, byte)) in self
            .smoothed
            .iter_mut()
            .zip(self.bytes.iter_mut())
            .enumerate()
        {
            let magnitude = self.scratch[bin].norm() * scale;
            *smoothed = smoothing.mul_add(*smoothed, (1.0 - smoothing) * magnitude);

            let decibels = if *smoothed > 0.0 {
                20.0 * smoothed.log10()
            } else {
                f32::NEG_INFINITY
            };

            let scaled = 255.0 * (decibels - self.config.min_decibels) / range;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                *byte = scaled.clamp(0.0, 255.0) as u8;
            }
        }
    }
}

fn blackman(size: usize) -> Vec<f32> {
    const ALPHA: f32 = 0.16;
    let a0 = 0.5 * (1.0 - ALPHA);
    let a1: f32 = 0.5;
    let a2 = 0.5 * ALPHA;

    #[allow(clippy::cast_precision_loss)]
    (0..size)
        .map(|n| {
            let x = n as f32 / size as f32;
            a2.mul_add((4.0 * PI * x).cos(), a1.mul_add(-(2.0 * PI * x).cos(), a0))
        })
        .collect()
}
