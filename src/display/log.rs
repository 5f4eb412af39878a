use anyhow::Result;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};

use soundscape::bridge::VisualDriverFrame;
use soundscape::stream::StreamUpdate;

use super::{drain_ipc, shutdown_signal};
use crate::config::Config;
use crate::ipc::IpcCommand;
use crate::session::Session;

/// One-line summary of the active bands
pub fn describe_frame(frame: &VisualDriverFrame) -> String {
    if frame.is_empty() {
        return format!("silent, dominant {:.1} Hz", frame.dominant_frequency);
    }
    let bands: Vec<String> = frame
        .bands
        .iter()
        .map(|b| format!("{} {:.2} (r={:.2})", b.label, b.intensity, b.radius))
        .collect();
    format!(
        "dominant {:.1} Hz | {}",
        frame.dominant_frequency,
        bands.join(", ")
    )
}

/// Log the latest frame once per render tick until Ctrl-C
pub async fn run(
    config: Config,
    mut session: Session,
    mut ipc_rx: mpsc::Receiver<IpcCommand>,
) -> Result<()> {
    let shutdown_rx = shutdown_signal();
    let frame_duration = Duration::from_secs_f64(1.0 / config.display.fps.max(1) as f64);
    let mut last_terminated = false;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let tick = Instant::now();

        drain_ipc(&mut ipc_rx, &mut session);

        match session.latest_frame() {
            StreamUpdate::Value(frame) => {
                last_terminated = false;
                info!("{}", describe_frame(&frame));
            }
            StreamUpdate::Terminated(e) => {
                if !last_terminated {
                    warn!("Pipeline terminated: {}", e);
                    last_terminated = true;
                }
            }
            StreamUpdate::Pending => {}
        }

        let elapsed = tick.elapsed();
        if elapsed < frame_duration {
            tokio::time::sleep(frame_duration - elapsed).await;
        }
    }

    session.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use soundscape::bridge::BandVisual;

    #[test]
    fn test_describe_frame() {
        let mut frame = VisualDriverFrame {
            bands: Vec::new(),
            dominant_frequency: 107.666,
            amplitude: 0.5,
            timestamp: Instant::now(),
        };
        assert_eq!(describe_frame(&frame), "silent, dominant 107.7 Hz");

        frame.bands.push(BandVisual {
            band_index: 1,
            label: "Bass",
            position: Vec3::ZERO,
            radius: 0.88,
            color: [1.0, 0.0, 0.0, 1.0],
            intensity: 1.0,
            energy: 0.9,
        });
        assert_eq!(
            describe_frame(&frame),
            "dominant 107.7 Hz | Bass 1.00 (r=0.88)"
        );
    }
}
