//! Feature extraction: peak normalization followed by MFCC frames.
//!
//! A chunk is converted to floats in [-1, 1], peak normalized, and cut into
//! overlapping Hamming windows. Each window goes through an FFT, a triangular
//! mel filterbank, a log and a DCT-II, keeping the first `coefficients` values.

use crate::chunk::AudioChunk;
use crate::config::MfccConfig;
use crate::error::ExtractionError;
use crate::mic::converters::i16_to_f32;
use crate::rms::peak;
use log::trace;
use ndarray::{s, Array2};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Peaks below this are treated as silence and left unscaled.
pub const SILENCE_PEAK: f32 = 1e-5;
const LOG_FLOOR: f32 = 1e-10;

/// Chunk samples as floats, scaled so the largest magnitude is 1.0.
#[derive(Debug, Clone)]
pub struct NormalizedSamples {
    samples: Vec<f32>,
    peak: f32,
}

impl NormalizedSamples {
    pub fn from_chunk(chunk: &AudioChunk) -> Self {
        Self::from_f32(chunk.samples().iter().map(i16_to_f32).collect())
    }

    pub fn from_f32(mut samples: Vec<f32>) -> Self {
        let peak = peak(&samples);
        if peak > SILENCE_PEAK {
            samples.iter_mut().for_each(|s| *s /= peak);
        }
        NormalizedSamples { samples, peak }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Peak before normalization.
    pub fn original_peak(&self) -> f32 {
        self.peak
    }

    pub fn is_silent(&self) -> bool {
        self.peak <= SILENCE_PEAK
    }
}

/// Extracted frames in window order, one row per frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix(Array2<f32>);

impl FeatureMatrix {
    pub fn new(frames: Array2<f32>) -> Self {
        FeatureMatrix(frames)
    }

    pub fn frame_count(&self) -> usize {
        self.0.nrows()
    }

    pub fn coeff_count(&self) -> usize {
        self.0.ncols()
    }

    pub fn as_array(&self) -> &Array2<f32> {
        &self.0
    }
}

pub struct FeatureExtractor {
    config: MfccConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    /// (mel_filters, window_size / 2 + 1)
    mel_filters: Array2<f32>,
    /// (coefficients, mel_filters)
    dct: Array2<f32>,
}

impl std::fmt::Debug for FeatureExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureExtractor").field("config", &self.config).finish()
    }
}

impl FeatureExtractor {
    pub fn new(config: &MfccConfig) -> Self {
        let fft = FftPlanner::new().plan_fft_forward(config.window_size);
        FeatureExtractor {
            fft,
            window: hamming_window(config.window_size),
            mel_filters: mel_filterbank(config),
            dct: dct_matrix(config.coefficients, config.mel_filters),
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &MfccConfig {
        &self.config
    }

    pub fn extract(&self, chunk: &AudioChunk) -> Result<FeatureMatrix, ExtractionError> {
        self.extract_normalized(&NormalizedSamples::from_chunk(chunk))
    }

    /// Slides the analysis window over already normalized samples.
    /// Any bad frame fails the whole buffer.
    pub fn extract_normalized(&self, audio: &NormalizedSamples) -> Result<FeatureMatrix, ExtractionError> {
        let data = audio.samples();
        let window_size = self.config.window_size;
        let frames = self.config.frame_count(data.len());
        if frames == 0 {
            return Err(ExtractionError::InsufficientAudio {
                samples: data.len(),
                window: window_size,
            });
        }

        let mut matrix = Array2::<f32>::zeros((frames, self.config.coefficients));
        let mut buffer = vec![Complex::new(0.0f32, 0.0f32); window_size];
        let mut scratch = vec![Complex::new(0.0f32, 0.0f32); self.fft.get_inplace_scratch_len()];
        let mut mel_energies = vec![0.0f32; self.config.mel_filters];

        for frame in 0..frames {
            let start = frame * self.config.hop_size;
            let input = &data[start..start + window_size];

            for ((b, &w), &s) in buffer.iter_mut().zip(&self.window).zip(input) {
                *b = Complex::new(s * w, 0.0);
            }
            self.fft.process_with_scratch(&mut buffer, &mut scratch);

            let bins = window_size / 2 + 1;
            for (m, energy) in mel_energies.iter_mut().enumerate() {
                let filter = self.mel_filters.row(m);
                let sum: f32 = buffer[..bins].iter().zip(filter.iter()).map(|(c, &f)| c.norm() * f).sum();
                *energy = sum.max(LOG_FLOOR).ln();
            }

            let mut row = matrix.slice_mut(s![frame, ..]);
            for (c, value) in row.iter_mut().enumerate() {
                let basis = self.dct.row(c);
                *value = basis.iter().zip(&mel_energies).map(|(&d, &e)| d * e).sum();
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(ExtractionError::NonFiniteCoefficient { frame });
            }
        }
        trace!("Extracted {} frames of {} coefficients", frames, self.config.coefficients);
        Ok(FeatureMatrix(matrix))
    }
}

fn hamming_window(size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|n| 0.54 - 0.46 * (2.0 * PI * n as f32 / (size - 1) as f32).cos())
        .collect()
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular filters evenly spaced on the mel scale over [lower_freq, upper_freq].
fn mel_filterbank(config: &MfccConfig) -> Array2<f32> {
    let bins = config.window_size / 2 + 1;
    let n_mels = config.mel_filters;
    let mut filters = Array2::<f32>::zeros((n_mels, bins));

    let mel_min = hz_to_mel(config.lower_freq);
    let mel_max = hz_to_mel(config.upper_freq);
    let edges: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
        .collect();
    let bin_hz = config.sample_rate as f32 / config.window_size as f32;

    for m in 0..n_mels {
        let (left, center, right) = (edges[m], edges[m + 1], edges[m + 2]);
        for k in 0..bins {
            let f = k as f32 * bin_hz;
            let weight = if f > left && f <= center {
                (f - left) / (center - left)
            } else if f > center && f < right {
                (right - f) / (right - center)
            } else {
                0.0
            };
            filters[[m, k]] = weight;
        }
    }
    filters
}

/// DCT-II basis, one row per output coefficient.
fn dct_matrix(coefficients: usize, inputs: usize) -> Array2<f32> {
    Array2::from_shape_fn((coefficients, inputs), |(n, m)| {
        (PI * n as f32 * (m as f32 + 0.5) / inputs as f32).cos()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tone(freq: f32, amplitude: f32, len: usize) -> Vec<i16> {
        (0..len)
            .map(|i| (amplitude * (2.0 * PI * freq * i as f32 / 22050.0).sin() * 32767.0) as i16)
            .collect()
    }

    #[test]
    fn normalization_scales_peak_to_one() {
        let n = NormalizedSamples::from_f32(vec![0.1, -0.25, 0.05]);
        assert_eq!(peak(n.samples()), 1.0);
        assert_eq!(n.original_peak(), 0.25);
        assert_relative_eq!(n.samples()[0], 0.4);
    }

    #[test]
    fn near_silence_is_left_unchanged() {
        let input = vec![1e-6, -2e-6, 0.0];
        let n = NormalizedSamples::from_f32(input.clone());
        assert!(n.is_silent());
        assert_eq!(n.samples(), input.as_slice());
    }

    #[test]
    fn full_chunk_yields_126_frames() {
        let extractor = FeatureExtractor::new(&MfccConfig::default());
        let chunk = AudioChunk::new(0, tone(440.0, 0.3, 66150));
        let features = extractor.extract(&chunk).unwrap();
        assert_eq!(features.frame_count(), 126);
        assert_eq!(features.coeff_count(), 20);
    }

    #[test]
    fn silent_chunk_extracts_finite_frames() {
        let extractor = FeatureExtractor::new(&MfccConfig::default());
        let chunk = AudioChunk::new(0, vec![0; 66150]);
        let features = extractor.extract(&chunk).unwrap();
        assert_eq!(features.frame_count(), 126);
        assert!(features.as_array().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn short_audio_is_insufficient() {
        let extractor = FeatureExtractor::new(&MfccConfig::default());
        let chunk = AudioChunk::new(0, vec![100; 2047]);
        assert_eq!(
            extractor.extract(&chunk),
            Err(ExtractionError::InsufficientAudio { samples: 2047, window: 2048 })
        );
    }

    #[test]
    fn extraction_is_deterministic() {
        let extractor = FeatureExtractor::new(&MfccConfig::default());
        let chunk = AudioChunk::new(0, tone(1000.0, 0.8, 8192));
        assert_eq!(extractor.extract(&chunk).unwrap(), extractor.extract(&chunk).unwrap());
    }

    #[test]
    fn loudness_does_not_change_features() {
        let extractor = FeatureExtractor::new(&MfccConfig::default());
        let quiet_samples = tone(800.0, 0.2, 4096);
        let loud_samples: Vec<i16> = quiet_samples.iter().map(|s| s * 2).collect();
        let quiet = extractor.extract(&AudioChunk::new(0, quiet_samples)).unwrap();
        let loud = extractor.extract(&AudioChunk::new(1, loud_samples)).unwrap();
        assert_eq!(quiet, loud);
    }

    #[test]
    fn filterbank_covers_nyquist() {
        let config = MfccConfig::default();
        let filters = mel_filterbank(&config);
        assert_eq!(filters.dim(), (128, 1025));
        // the last filter peaks just below Nyquist
        assert!(filters.row(127).iter().any(|&w| w > 0.0));
        assert!(filters.iter().all(|&w| (0.0..=1.0).contains(&w)));
    }
}
