use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{ReactiveParameterBridge, VisualDriverFrame};
use crate::audio::BandEnergySet;
use crate::spatial::SpatialSnapshot;
use crate::stream::{self, LatestJoin, StreamUpdate};

type FrameSender = watch::Sender<StreamUpdate<VisualDriverFrame>>;

struct BridgeState {
    bridge: ReactiveParameterBridge,
    join: LatestJoin<BandEnergySet, SpatialSnapshot>,
    tx: FrameSender,
}

impl BridgeState {
    fn on_audio(&mut self, update: StreamUpdate<BandEnergySet>) {
        match update {
            StreamUpdate::Value(bands) => {
                let pair = self.join.push_left(bands);
                self.emit(pair);
            }
            StreamUpdate::Pending => self.join.clear_left(),
            StreamUpdate::Terminated(e) => {
                warn!("Audio stream terminated: {}", e);
                self.join.clear_left();
                self.tx.send_replace(StreamUpdate::Terminated(e));
            }
        }
    }

    fn on_spatial(&mut self, update: StreamUpdate<SpatialSnapshot>) {
        match update {
            StreamUpdate::Value(snapshot) => {
                let pair = self.join.push_right(snapshot);
                self.emit(pair);
            }
            StreamUpdate::Pending => self.join.clear_right(),
            StreamUpdate::Terminated(e) => {
                warn!("Spatial stream terminated: {}", e);
                self.join.clear_right();
                self.tx.send_replace(StreamUpdate::Terminated(e));
            }
        }
    }

    fn emit(&self, pair: Option<(Arc<BandEnergySet>, Arc<SpatialSnapshot>)>) {
        if let Some((bands, spatial)) = pair {
            let frame = self.bridge.update(&bands, &spatial);
            self.tx.send_replace(StreamUpdate::Value(Arc::new(frame)));
        }
    }
}

/// Drive `bridge` from the latest audio and spatial values
///
/// A frame is published each time either input changes once both have
/// produced a value. A terminated input is forwarded downstream and
/// blocks frames until that input produces again. The task ends when
/// both inputs are closed or every frame receiver is dropped.
pub fn spawn_bridge(
    bridge: ReactiveParameterBridge,
    mut audio_rx: watch::Receiver<StreamUpdate<BandEnergySet>>,
    mut spatial_rx: watch::Receiver<StreamUpdate<SpatialSnapshot>>,
) -> (
    watch::Receiver<StreamUpdate<VisualDriverFrame>>,
    JoinHandle<()>,
) {
    let (tx, rx) = stream::latest();

    let handle = tokio::spawn(async move {
        info!("Bridge running with {} bands", bridge.layout().len());

        let mut state = BridgeState {
            bridge,
            join: LatestJoin::new(),
            tx,
        };

        // Pick up values published before we subscribed
        let update = audio_rx.borrow_and_update().clone();
        state.on_audio(update);
        let update = spatial_rx.borrow_and_update().clone();
        state.on_spatial(update);

        let mut audio_open = true;
        let mut spatial_open = true;

        while audio_open || spatial_open {
            tokio::select! {
                changed = audio_rx.changed(), if audio_open => {
                    if changed.is_err() {
                        debug!("Audio stream closed");
                        audio_open = false;
                        continue;
                    }
                    let update = audio_rx.borrow_and_update().clone();
                    state.on_audio(update);
                }
                changed = spatial_rx.changed(), if spatial_open => {
                    if changed.is_err() {
                        debug!("Spatial stream closed");
                        spatial_open = false;
                        continue;
                    }
                    let update = spatial_rx.borrow_and_update().clone();
                    state.on_spatial(update);
                }
                _ = state.tx.closed() => {
                    debug!("Frame receivers dropped");
                    break;
                }
            }
        }

        info!("Bridge stopped");
    });

    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SIX_BANDS;
    use crate::bridge::{SoundSource, DEFAULT_BASE_RADIUS};
    use crate::error::PipelineError;
    use std::time::{Duration, Instant};

    fn bands(level: f32) -> StreamUpdate<BandEnergySet> {
        StreamUpdate::Value(Arc::new(BandEnergySet {
            energies: vec![level; 6],
            dominant_frequency: 440.0,
            amplitude: level,
            timestamp: Instant::now(),
        }))
    }

    fn spatial() -> StreamUpdate<SpatialSnapshot> {
        StreamUpdate::Value(Arc::new(SpatialSnapshot::default()))
    }

    async fn next(
        rx: &mut watch::Receiver<StreamUpdate<VisualDriverFrame>>,
    ) -> StreamUpdate<VisualDriverFrame> {
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("no frame published")
            .unwrap();
        rx.borrow_and_update().clone()
    }

    fn start() -> (
        watch::Sender<StreamUpdate<BandEnergySet>>,
        watch::Sender<StreamUpdate<SpatialSnapshot>>,
        watch::Receiver<StreamUpdate<VisualDriverFrame>>,
        JoinHandle<()>,
    ) {
        let (audio_tx, audio_rx) = stream::latest();
        let (spatial_tx, spatial_rx) = stream::latest();
        let bridge =
            ReactiveParameterBridge::new(&SIX_BANDS, DEFAULT_BASE_RADIUS, SoundSource::default());
        let (frames, handle) = spawn_bridge(bridge, audio_rx, spatial_rx);
        (audio_tx, spatial_tx, frames, handle)
    }

    #[tokio::test]
    async fn test_emits_once_both_inputs_arrive() {
        let (audio_tx, spatial_tx, mut frames, _handle) = start();

        audio_tx.send_replace(bands(0.5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(*frames.borrow(), StreamUpdate::Pending));

        spatial_tx.send_replace(spatial());
        let update = next(&mut frames).await;
        let frame = update.value().unwrap();
        assert_eq!(frame.bands.len(), 6);
        assert_eq!(frame.dominant_frequency, 440.0);
    }

    #[tokio::test]
    async fn test_audio_termination_is_forwarded() {
        let (audio_tx, spatial_tx, mut frames, _handle) = start();
        spatial_tx.send_replace(spatial());
        audio_tx.send_replace(bands(0.5));
        next(&mut frames).await;

        audio_tx.send_replace(StreamUpdate::Terminated(PipelineError::StreamTerminated(
            "device unplugged".into(),
        )));
        let update = next(&mut frames).await;
        assert!(matches!(
            update.error(),
            Some(PipelineError::StreamTerminated(_))
        ));

        // Spatial alone cannot produce a frame after termination
        spatial_tx.send_replace(spatial());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(frames.borrow().error().is_some());

        audio_tx.send_replace(bands(0.0));
        let update = next(&mut frames).await;
        assert!(update.value().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ends_when_inputs_close() {
        let (audio_tx, spatial_tx, _frames, handle) = start();
        drop(audio_tx);
        drop(spatial_tx);

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("bridge did not stop")
            .unwrap();
    }
}
