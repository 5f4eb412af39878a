use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;
use std::time::Instant;

use super::{AudioFrame, DB_FLOOR, DEFAULT_SAMPLE_RATE};
use crate::error::{PipelineError, Result};

/// Magnitude spectrum of one analysis tick
///
/// `frequencies` and `magnitudes` are parallel and hold `transform_size / 2`
/// bins. Magnitudes are in decibels, floored at [`DB_FLOOR`]. The frequency
/// table is shared between every spectrum of the same sample rate.
#[derive(Debug, Clone)]
pub struct Spectrum {
    pub frequencies: Arc<[f32]>,
    pub magnitudes: Vec<f32>,
    pub sample_rate: u32,
    /// RMS of the time-domain frame before windowing
    pub rms: f32,
    pub timestamp: Instant,
}

impl Spectrum {
    pub fn len(&self) -> usize {
        self.magnitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }

    /// Width of one bin in Hz
    pub fn bin_width(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            self.sample_rate as f32 / (self.len() * 2) as f32
        }
    }
}

pub struct SpectralAnalyzer {
    transform_size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    // Bin centers for the last sample rate seen
    frequencies: Arc<[f32]>,
    frequencies_rate: u32,
}

impl SpectralAnalyzer {
    pub fn new(transform_size: usize) -> Result<Self> {
        if transform_size < 2 || !transform_size.is_power_of_two() {
            return Err(PipelineError::Analysis {
                expected: transform_size.next_power_of_two().max(2),
                actual: transform_size,
            });
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(transform_size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Ok(Self {
            transform_size,
            fft,
            window: hann_window(transform_size),
            buffer: vec![Complex::new(0.0, 0.0); transform_size],
            scratch,
            frequencies: bin_frequencies(transform_size, DEFAULT_SAMPLE_RATE),
            frequencies_rate: DEFAULT_SAMPLE_RATE,
        })
    }

    pub fn transform_size(&self) -> usize {
        self.transform_size
    }

    pub fn window(&self) -> &[f32] {
        &self.window
    }

    pub fn analyze(&mut self, frame: AudioFrame) -> Result<Spectrum> {
        if frame.len() != self.transform_size {
            return Err(PipelineError::Analysis {
                expected: self.transform_size,
                actual: frame.len(),
            });
        }

        for ((slot, &sample), &w) in self
            .buffer
            .iter_mut()
            .zip(frame.samples())
            .zip(self.window.iter())
        {
            *slot = Complex::new(sample * w, 0.0);
        }

        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        let bins = self.transform_size / 2;
        let magnitudes = self.buffer[..bins]
            .iter()
            .map(|c| to_decibels(c.norm()))
            .collect();

        let sample_rate = frame.sample_rate();
        if sample_rate != self.frequencies_rate {
            self.frequencies = bin_frequencies(self.transform_size, sample_rate);
            self.frequencies_rate = sample_rate;
        }

        Ok(Spectrum {
            frequencies: self.frequencies.clone(),
            magnitudes,
            sample_rate,
            rms: frame.rms(),
            timestamp: frame.timestamp(),
        })
    }
}

/// Center frequency of each of the `size / 2` bins
fn bin_frequencies(size: usize, sample_rate: u32) -> Arc<[f32]> {
    (0..size / 2)
        .map(|i| sample_rate as f32 * i as f32 / size as f32)
        .collect()
}

/// Periodic Hann window, zero at the first sample and 1.0 at `size / 2`
pub fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
        .collect()
}

/// `20 * log10(magnitude)`, floored at [`DB_FLOOR`]
pub fn to_decibels(magnitude: f32) -> f32 {
    if !magnitude.is_finite() || magnitude <= 0.0 {
        return DB_FLOOR;
    }
    (20.0 * magnitude.log10()).max(DB_FLOOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::TRANSFORM_SIZE;

    fn tone_frame(freq: f32, sample_rate: u32, len: usize) -> AudioFrame {
        let samples = (0..len)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                (2.0 * std::f64::consts::PI * freq as f64 * t).sin() as f32
            })
            .collect();
        AudioFrame::new(samples, sample_rate, Instant::now(), 0)
    }

    #[test]
    fn test_hann_window() {
        let size = 1024;
        let window = hann_window(size);

        assert_eq!(window.len(), size);
        assert!(window[0].abs() < 1e-6);
        assert!((window[size / 2] - 1.0).abs() < 1e-6);
        // Periodic form: symmetric around size / 2
        assert!((window[1] - window[size - 1]).abs() < 1e-5);
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        assert!(SpectralAnalyzer::new(1000).is_err());
        assert!(SpectralAnalyzer::new(0).is_err());
        assert!(SpectralAnalyzer::new(1).is_err());
        assert!(SpectralAnalyzer::new(512).is_ok());
    }

    #[test]
    fn test_rejects_wrong_frame_length() {
        let mut analyzer = SpectralAnalyzer::new(TRANSFORM_SIZE).unwrap();
        let frame = AudioFrame::new(vec![0.0; 100], 44100, Instant::now(), 0);

        match analyzer.analyze(frame) {
            Err(PipelineError::Analysis { expected, actual }) => {
                assert_eq!(expected, TRANSFORM_SIZE);
                assert_eq!(actual, 100);
            }
            other => panic!("expected analysis error, got {:?}", other),
        }
    }

    #[test]
    fn test_spectrum_shape() {
        let mut analyzer = SpectralAnalyzer::new(TRANSFORM_SIZE).unwrap();
        let spectrum = analyzer
            .analyze(tone_frame(440.0, 44100, TRANSFORM_SIZE))
            .unwrap();

        assert_eq!(spectrum.magnitudes.len(), TRANSFORM_SIZE / 2);
        assert_eq!(spectrum.frequencies.len(), TRANSFORM_SIZE / 2);
        assert_eq!(spectrum.frequencies[0], 0.0);
        assert!(spectrum
            .frequencies
            .windows(2)
            .all(|pair| pair[1] > pair[0]));
        assert!((spectrum.bin_width() - 44100.0 / 2048.0).abs() < 1e-3);
    }

    #[test]
    fn test_silence_is_floored() {
        let mut analyzer = SpectralAnalyzer::new(256).unwrap();
        let frame = AudioFrame::new(vec![0.0; 256], 48000, Instant::now(), 0);
        let spectrum = analyzer.analyze(frame).unwrap();

        assert!(spectrum.magnitudes.iter().all(|&m| m == DB_FLOOR));
        assert_eq!(spectrum.rms, 0.0);
    }

    #[test]
    fn test_peak_at_bin_center() {
        let sample_rate = 44100;
        let bin = 46;
        let freq = sample_rate as f32 * bin as f32 / TRANSFORM_SIZE as f32;

        let mut analyzer = SpectralAnalyzer::new(TRANSFORM_SIZE).unwrap();
        let spectrum = analyzer
            .analyze(tone_frame(freq, sample_rate, TRANSFORM_SIZE))
            .unwrap();

        let peak = spectrum
            .magnitudes
            .iter()
            .enumerate()
            .fold(0, |best, (i, &m)| {
                if m > spectrum.magnitudes[best] {
                    i
                } else {
                    best
                }
            });
        assert_eq!(peak, bin);
    }

    #[test]
    fn test_deterministic() {
        let mut analyzer = SpectralAnalyzer::new(TRANSFORM_SIZE).unwrap();
        let a = analyzer
            .analyze(tone_frame(1234.0, 44100, TRANSFORM_SIZE))
            .unwrap();
        let b = analyzer
            .analyze(tone_frame(1234.0, 44100, TRANSFORM_SIZE))
            .unwrap();

        assert_eq!(a.magnitudes, b.magnitudes);
    }

    #[test]
    fn test_frequency_table_shared_per_sample_rate() {
        let mut analyzer = SpectralAnalyzer::new(256).unwrap();
        let first = analyzer.analyze(tone_frame(440.0, 44100, 256)).unwrap();
        let second = analyzer.analyze(tone_frame(880.0, 44100, 256)).unwrap();
        assert!(Arc::ptr_eq(&first.frequencies, &second.frequencies));

        let resampled = analyzer.analyze(tone_frame(440.0, 48000, 256)).unwrap();
        assert!(!Arc::ptr_eq(&first.frequencies, &resampled.frequencies));
        assert!((resampled.frequencies[1] - 48000.0 / 256.0).abs() < 1e-3);
        assert_eq!(resampled.frequencies.len(), 128);
    }

    #[test]
    fn test_decibel_floor() {
        assert_eq!(to_decibels(0.0), DB_FLOOR);
        assert_eq!(to_decibels(-1.0), DB_FLOOR);
        assert_eq!(to_decibels(f32::NAN), DB_FLOOR);
        assert_eq!(to_decibels(1e-12), DB_FLOOR);
        assert!((to_decibels(10.0) - 20.0).abs() < 1e-5);
    }
}
