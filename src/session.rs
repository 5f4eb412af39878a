//! The running pipeline as seen by the front ends.
//!
//! Owns the capture loop, the spatial tracker, and the bridge task. Render
//! loops poll it once per tick and route keyboard and control socket
//! commands through it.

use anyhow::{Context, Result};
use glam::{Mat4, Vec3};
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::watch;
use tokio::task::{self, JoinHandle};
use tracing::{error, info};

use soundscape::audio::{
    self, AnalysisSink, AudioBackend, AudioCaptureLoop, BandEnergySet, CaptureState,
    SpectralBalance, ToneBackend, BAND_LAYOUT,
};
use soundscape::bridge::{self, ReactiveParameterBridge, SoundSource, VisualDriverFrame};
use soundscape::error::PipelineError;
use soundscape::spatial::{self, SpatialSnapshot};
use soundscape::stream::StreamUpdate;

use crate::config::Config;

pub struct Session {
    capture: AudioCaptureLoop<AnalysisSink>,
    bands: watch::Receiver<StreamUpdate<BandEnergySet>>,
    spatial: watch::Receiver<StreamUpdate<SpatialSnapshot>>,
    frames: watch::Receiver<StreamUpdate<VisualDriverFrame>>,
    source: SoundSource,
    tasks: Vec<JoinHandle<()>>,
}

fn select_backend(config: &Config) -> Result<Box<dyn AudioBackend>> {
    if let Some(frequency) = config.audio.tone {
        return Ok(Box::new(ToneBackend::new(frequency, config.audio.sample_rate)));
    }
    device_backend(config)
}

/// Run a capture control call that may block on a device open or thread join.
///
/// On a multi-threaded runtime the worker hands its other tasks off first;
/// elsewhere the call runs inline.
fn blocking<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            task::block_in_place(f)
        }
        _ => f(),
    }
}

#[cfg(feature = "pulse")]
fn device_backend(config: &Config) -> Result<Box<dyn AudioBackend>> {
    use soundscape::audio::PulseBackend;

    let audio = &config.audio;
    let backend = match (&audio.device, audio.monitor) {
        (Some(device), _) => {
            PulseBackend::new(Some(device.clone()), audio.sample_rate, audio.channels)
        }
        (None, true) => PulseBackend::default_monitor(audio.sample_rate, audio.channels),
        (None, false) => PulseBackend::new(None, audio.sample_rate, audio.channels),
    };
    Ok(Box::new(backend))
}

#[cfg(not(feature = "pulse"))]
fn device_backend(_config: &Config) -> Result<Box<dyn AudioBackend>> {
    anyhow::bail!("Built without the `pulse` feature; use --tone <HZ> for a test signal")
}

impl Session {
    /// Build the pipeline and start capturing
    ///
    /// Must be called inside a tokio runtime. A device that fails to open
    /// leaves the session running with capture stopped, so the error can be
    /// shown and capture retried.
    pub fn start(config: &Config) -> Result<Self> {
        let backend = select_backend(config)?;
        let (mut capture, bands) =
            audio::create_audio_pipeline(backend).context("Failed to build audio pipeline")?;

        let (spatial, tracker) =
            spatial::start_fixed_tracker(Mat4::IDENTITY, config.tracking.rate_hz);

        let source = SoundSource::new(
            config.bridge.source_offset(),
            config.bridge.drag_sensitivity,
        );
        let bridge =
            ReactiveParameterBridge::new(BAND_LAYOUT, config.bridge.base_radius, source.clone());
        let (frames, bridge_task) = bridge::spawn_bridge(bridge, bands.clone(), spatial.clone());

        if let Err(e) = blocking(|| capture.start()) {
            error!("Capture did not start: {}", e);
        }

        info!("Session started with {}", capture.backend_name());

        Ok(Self {
            capture,
            bands,
            spatial,
            frames,
            source,
            tasks: vec![tracker, bridge_task],
        })
    }

    pub fn capture_state(&self) -> CaptureState {
        self.capture.state()
    }

    pub fn backend_name(&self) -> String {
        self.capture.backend_name()
    }

    pub fn start_capture(&mut self) -> Result<(), PipelineError> {
        blocking(|| self.capture.start())
    }

    pub fn stop_capture(&mut self) {
        blocking(|| self.capture.stop());
    }

    pub fn restart_capture(&mut self) -> Result<(), PipelineError> {
        blocking(|| {
            self.capture.stop();
            self.capture.start()
        })
    }

    /// Start when stopped, stop otherwise; returns the new state
    pub fn toggle_capture(&mut self) -> Result<CaptureState, PipelineError> {
        blocking(|| -> Result<CaptureState, PipelineError> {
            if self.capture.state() == CaptureState::Stopped {
                self.capture.start()?;
            } else {
                self.capture.stop();
            }
            Ok(self.capture.state())
        })
    }

    /// Collecting the error of a dead session joins its thread
    pub fn last_error(&mut self) -> Option<PipelineError> {
        blocking(|| self.capture.last_error().cloned())
    }

    /// Average energy of the low, mid and high band groups in the latest tick
    pub fn balance(&self) -> Option<SpectralBalance> {
        self.bands
            .borrow()
            .value()
            .map(|bands| bands.balance(BAND_LAYOUT))
    }

    pub fn latest_frame(&self) -> StreamUpdate<VisualDriverFrame> {
        self.frames.borrow().clone()
    }

    pub fn latest_bands(&self) -> StreamUpdate<BandEnergySet> {
        self.bands.borrow().clone()
    }

    pub fn latest_spatial(&self) -> Arc<SpatialSnapshot> {
        self.spatial
            .borrow()
            .value()
            .cloned()
            .unwrap_or_default()
    }

    pub fn anchor(&self) -> Vec3 {
        self.source.offset()
    }

    pub fn set_anchor(&self, offset: Vec3) {
        self.source.set(offset);
    }

    /// Drag relative to the current camera orientation
    pub fn drag_anchor(&self, dx: f32, dy: f32) -> Vec3 {
        let spatial = self.latest_spatial();
        self.source.drag(dx, dy, &spatial)
    }

    pub fn shutdown(mut self) {
        blocking(|| self.capture.stop());
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("Session shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_config() -> Config {
        let mut config = Config::default();
        config.audio.tone = Some(220.0);
        config.tracking.rate_hz = 100;
        config
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_capture_controls_on_worker_thread() {
        let mut session = Session::start(&tone_config()).unwrap();
        assert_eq!(session.capture_state(), CaptureState::Running);

        assert_eq!(session.toggle_capture().unwrap(), CaptureState::Stopped);
        assert_eq!(session.toggle_capture().unwrap(), CaptureState::Running);
        session.restart_capture().unwrap();
        session.stop_capture();
        assert_eq!(session.capture_state(), CaptureState::Stopped);
        assert!(session.last_error().is_none());

        session.shutdown();
    }

    #[tokio::test]
    async fn test_capture_controls_on_current_thread_runtime() {
        let mut session = Session::start(&tone_config()).unwrap();
        session.restart_capture().unwrap();
        assert_eq!(session.capture_state(), CaptureState::Running);
        session.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_balance_follows_band_stream() {
        let mut session = Session::start(&tone_config()).unwrap();
        let mut bands = session.bands.clone();

        let balance = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                bands.changed().await.unwrap();
                if let Some(balance) = session.balance() {
                    return balance;
                }
            }
        })
        .await
        .unwrap();

        // A 220 Hz tone lives in the low group
        assert!(balance.bass > balance.mid);
        assert!(balance.bass > balance.high);
        session.stop_capture();
        session.shutdown();
    }
}
