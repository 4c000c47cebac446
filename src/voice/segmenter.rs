//! Utterance segmentation
//!
//! Splits a continuous capture into utterances using local energy detection:
//! speech starts when RMS energy crosses a threshold and ends after a run of
//! silence.

use std::time::Duration;

/// Segmentation thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmenterConfig {
    /// Minimum RMS energy to consider speech
    pub energy_threshold: f32,
    /// Speech shorter than this is discarded as noise
    pub min_speech: Duration,
    /// Silence that closes an utterance
    pub silence: Duration,
    /// Utterances are cut at this length even without silence
    pub max_utterance: Duration,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.03,
            min_speech: Duration::from_millis(300),
            silence: Duration::from_millis(700),
            max_utterance: Duration::from_secs(30),
        }
    }
}

/// State of the segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Waiting for speech
    Quiet,
    /// Accumulating an utterance
    Speaking,
}

/// Detects utterance boundaries in a sample stream
pub struct UtteranceSegmenter {
    config: SegmenterConfig,
    state: SegmenterState,
    buffer: Vec<f32>,
    speech_samples: usize,
    silence_samples: usize,
    min_speech_samples: usize,
    silence_limit: usize,
    max_samples: usize,
}

fn samples_for(duration: Duration, sample_rate: u32) -> usize {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let samples = (duration.as_secs_f64() * f64::from(sample_rate)) as usize;
    samples
}

impl UtteranceSegmenter {
    #[must_use]
    pub fn new(config: SegmenterConfig, sample_rate: u32) -> Self {
        Self {
            config,
            state: SegmenterState::Quiet,
            buffer: Vec::new(),
            speech_samples: 0,
            silence_samples: 0,
            min_speech_samples: samples_for(config.min_speech, sample_rate),
            silence_limit: samples_for(config.silence, sample_rate),
            max_samples: samples_for(config.max_utterance, sample_rate).max(1),
        }
    }

    /// Feed captured samples; returns an utterance once one is complete
    pub fn push(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        if samples.is_empty() {
            return None;
        }

        let energy = calculate_energy(samples);
        let is_speech = energy > self.config.energy_threshold;

        match self.state {
            SegmenterState::Quiet => {
                if is_speech {
                    self.state = SegmenterState::Speaking;
                    self.buffer.clear();
                    self.buffer.extend_from_slice(samples);
                    self.speech_samples = samples.len();
                    self.silence_samples = 0;
                    tracing::trace!(energy, "speech detected");
                }
                None
            }
            SegmenterState::Speaking => {
                self.buffer.extend_from_slice(samples);

                if is_speech {
                    self.silence_samples = 0;
                    self.speech_samples += samples.len();
                } else {
                    self.silence_samples += samples.len();
                }

                if self.silence_samples > self.silence_limit
                    && self.speech_samples >= self.min_speech_samples
                {
                    tracing::debug!(samples = self.buffer.len(), "utterance complete");
                    return Some(self.take());
                }

                if self.buffer.len() >= self.max_samples {
                    tracing::debug!(samples = self.buffer.len(), "utterance cut at max length");
                    return Some(self.take());
                }

                // Too much silence without enough speech: it was noise
                if self.silence_samples > self.silence_limit * 2 {
                    tracing::trace!("noise burst discarded");
                    self.reset();
                }

                None
            }
        }
    }

    /// Close the utterance in progress, if it holds enough speech
    pub fn flush(&mut self) -> Option<Vec<f32>> {
        if self.state == SegmenterState::Speaking && self.speech_samples >= self.min_speech_samples
        {
            return Some(self.take());
        }
        self.reset();
        None
    }

    /// Discard anything accumulated
    pub fn reset(&mut self) {
        self.state = SegmenterState::Quiet;
        self.buffer.clear();
        self.speech_samples = 0;
        self.silence_samples = 0;
    }

    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.state == SegmenterState::Speaking
    }

    fn take(&mut self) -> Vec<f32> {
        let utterance = std::mem::take(&mut self.buffer);
        self.reset();
        utterance
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_calculation() {
        let silence = vec![0.0f32; 100];
        assert!(calculate_energy(&silence) < 0.001);

        let loud = vec![0.5f32; 100];
        assert!(calculate_energy(&loud) > 0.4);
    }

    #[test]
    fn test_quiet_input_never_starts() {
        let mut segmenter = UtteranceSegmenter::new(SegmenterConfig::default(), 16000);
        assert!(segmenter.push(&[0.001; 1600]).is_none());
        assert_eq!(segmenter.state(), SegmenterState::Quiet);
        assert!(segmenter.flush().is_none());
    }
}
