use std::f64::consts::TAU;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

use super::capture::{AudioBackend, InputDevice};
use crate::error::{PipelineError, Result};

/// Sine test signal standing in for a microphone
///
/// When `paced`, each read blocks for one frame period so frames arrive at
/// the same cadence a hardware device would deliver them.
pub struct ToneBackend {
    frequency: f32,
    amplitude: f32,
    sample_rate: u32,
    paced: bool,
}

impl ToneBackend {
    pub fn new(frequency: f32, sample_rate: u32) -> Self {
        Self {
            frequency,
            amplitude: 0.8,
            sample_rate,
            paced: true,
        }
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Deliver frames as fast as they are read
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }
}

impl AudioBackend for ToneBackend {
    fn name(&self) -> String {
        format!("test tone {} Hz", self.frequency)
    }

    fn open(&mut self, frame_len: usize) -> Result<Box<dyn InputDevice>> {
        if self.sample_rate == 0 {
            return Err(PipelineError::Device("sample rate must be non-zero".into()));
        }
        if self.frequency < 0.0 || self.frequency > self.sample_rate as f32 / 2.0 {
            return Err(PipelineError::Device(format!(
                "tone frequency {} Hz is outside 0..={} Hz",
                self.frequency,
                self.sample_rate / 2
            )));
        }

        debug!("Opening test tone at {} Hz", self.frequency);
        let period = Duration::from_secs_f64(frame_len as f64 / self.sample_rate as f64);
        Ok(Box::new(ToneDevice {
            step: TAU * self.frequency as f64 / self.sample_rate as f64,
            phase: 0.0,
            amplitude: self.amplitude,
            sample_rate: self.sample_rate,
            period: self.paced.then_some(period),
            next_deadline: Instant::now(),
        }))
    }
}

struct ToneDevice {
    step: f64,
    phase: f64,
    amplitude: f32,
    sample_rate: u32,
    period: Option<Duration>,
    next_deadline: Instant,
}

impl InputDevice for ToneDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read(&mut self, buf: &mut [f32]) -> Result<usize> {
        if let Some(period) = self.period {
            self.next_deadline += period;
            let now = Instant::now();
            if self.next_deadline > now {
                thread::sleep(self.next_deadline - now);
            } else {
                // Fell behind; don't try to catch up with a burst
                self.next_deadline = now;
            }
        }

        for sample in buf.iter_mut() {
            *sample = self.amplitude * self.phase.sin() as f32;
            self.phase = (self.phase + self.step) % TAU;
        }
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_is_continuous_across_reads() {
        let mut backend = ToneBackend::new(1000.0, 48000).unpaced();
        let mut device = backend.open(64).unwrap();

        let mut a = vec![0.0; 64];
        let mut b = vec![0.0; 64];
        device.read(&mut a).unwrap();
        device.read(&mut b).unwrap();

        let step = TAU * 1000.0 / 48000.0;
        let expected = (0.8 * (64.0 * step).sin()) as f32;
        assert!((b[0] - expected).abs() < 1e-4);
        assert!(a.iter().chain(&b).all(|s| s.abs() <= 0.8 + 1e-6));
    }

    #[test]
    fn test_rejects_frequency_above_nyquist() {
        let mut backend = ToneBackend::new(30000.0, 44100);
        assert!(matches!(backend.open(64), Err(PipelineError::Device(_))));
    }

    #[test]
    fn test_paced_reads_follow_frame_period() {
        let mut backend = ToneBackend::new(440.0, 8000);
        // 80 samples at 8 kHz = 10 ms
        let mut device = backend.open(80).unwrap();
        let mut buf = vec![0.0; 80];

        let start = Instant::now();
        for _ in 0..3 {
            device.read(&mut buf).unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(25));
    }
}
