mod bands;
mod capture;
mod fft;
#[cfg(feature = "pulse")]
mod pulse;
mod tone;

pub use bands::{
    dominant_frequency, normalize, BandEnergyMapper, BandEnergySet, BandGroup, BandLayout,
    FrequencyBand, SpectralBalance, BAND_LAYOUT, SIX_BANDS, TWELVE_BANDS,
};
pub use capture::{AudioBackend, AudioCaptureLoop, CaptureState, FrameSink, InputDevice};
pub use fft::{hann_window, to_decibels, SpectralAnalyzer, Spectrum};
#[cfg(feature = "pulse")]
pub use pulse::{list_sources, PulseBackend};
pub use tone::ToneBackend;

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::stream::{self, StreamUpdate};

/// Samples consumed per analysis tick
pub const TRANSFORM_SIZE: usize = 2048;

/// Capture rate assumed until a device reports its own
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Decibel value reported for silent or invalid bins
pub const DB_FLOOR: f32 = -160.0;

/// One fixed-length block of mono samples from the input device
#[derive(Debug, Clone)]
pub struct AudioFrame {
    samples: Vec<f32>,
    sample_rate: u32,
    timestamp: Instant,
    sequence: u64,
}

impl AudioFrame {
    /// Non-finite samples are replaced with silence
    pub fn new(mut samples: Vec<f32>, sample_rate: u32, timestamp: Instant, sequence: u64) -> Self {
        for s in samples.iter_mut().filter(|s| !s.is_finite()) {
            *s = 0.0;
        }
        Self {
            samples,
            sample_rate,
            timestamp,
            sequence,
        }
    }

    /// Zero-pad or truncate to `len`; device reads may under-deliver
    pub fn padded(
        mut samples: Vec<f32>,
        len: usize,
        sample_rate: u32,
        timestamp: Instant,
        sequence: u64,
    ) -> Self {
        samples.resize(len, 0.0);
        Self::new(samples, sample_rate, timestamp, sequence)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Position of this frame within its capture session
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        (self.samples.iter().map(|s| s * s).sum::<f32>() / self.samples.len() as f32).sqrt()
    }
}

/// Analysis stage run inline on the capture thread
///
/// Publishes each tick's [`BandEnergySet`] into a latest-value channel.
pub struct AnalysisSink {
    analyzer: SpectralAnalyzer,
    mapper: BandEnergyMapper,
    sender: watch::Sender<StreamUpdate<BandEnergySet>>,
}

impl AnalysisSink {
    pub fn new(
        transform_size: usize,
        layout: &'static BandLayout,
        sender: watch::Sender<StreamUpdate<BandEnergySet>>,
    ) -> Result<Self> {
        Ok(Self {
            analyzer: SpectralAnalyzer::new(transform_size)?,
            mapper: BandEnergyMapper::new(layout),
            sender,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamUpdate<BandEnergySet>> {
        self.sender.subscribe()
    }
}

impl FrameSink for AnalysisSink {
    fn on_frame(&mut self, frame: AudioFrame) -> Result<()> {
        let spectrum = self.analyzer.analyze(frame)?;
        let bands = self.mapper.map_bands(&spectrum);
        // send_replace never fails, even with no receivers left
        self.sender.send_replace(StreamUpdate::Value(Arc::new(bands)));
        Ok(())
    }

    fn on_terminated(&mut self, error: PipelineError) {
        warn!("Audio stream terminated: {}", error);
        self.sender.send_replace(StreamUpdate::Terminated(error));
    }
}

/// Create an audio processing pipeline
///
/// The returned capture loop is stopped; call `start()` to open the device.
pub fn create_audio_pipeline(
    backend: Box<dyn AudioBackend>,
) -> Result<(
    AudioCaptureLoop<AnalysisSink>,
    watch::Receiver<StreamUpdate<BandEnergySet>>,
)> {
    let (tx, rx) = stream::latest();
    let sink = AnalysisSink::new(TRANSFORM_SIZE, BAND_LAYOUT, tx)?;
    debug!(
        "Audio pipeline: {} samples per frame, {} band layout",
        TRANSFORM_SIZE, BAND_LAYOUT.name
    );
    Ok((AudioCaptureLoop::new(backend, sink, TRANSFORM_SIZE), rx))
}
