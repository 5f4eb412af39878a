//! Spatial tracking snapshots.
//!
//! Tracking itself lives outside this crate; producers publish
//! [`SpatialSnapshot`]s into a latest-value channel at their own cadence.
//! [`start_fixed_tracker`] is a stand-in producer with a stationary camera.

use glam::{Mat4, Vec2, Vec3};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::stream::{self, StreamUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneAlignment {
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedPlane {
    pub center: Vec3,
    pub extent: Vec2,
    pub alignment: PlaneAlignment,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightEstimate {
    /// Lumens; 1000 is neutral
    pub ambient_intensity: f32,
    /// Kelvin; 6500 is neutral
    pub ambient_color_temperature: f32,
}

/// One tracking frame, read-only to this crate
#[derive(Debug, Clone)]
pub struct SpatialSnapshot {
    /// Camera-to-world transform
    pub camera_transform: Mat4,
    pub planes: Vec<DetectedPlane>,
    pub light_estimate: Option<LightEstimate>,
    pub timestamp: Instant,
}

impl SpatialSnapshot {
    pub fn new(camera_transform: Mat4) -> Self {
        Self {
            camera_transform,
            planes: Vec::new(),
            light_estimate: None,
            timestamp: Instant::now(),
        }
    }

    pub fn camera_position(&self) -> Vec3 {
        self.camera_transform.w_axis.truncate()
    }

    /// Screen-right direction in world space
    pub fn camera_right(&self) -> Vec3 {
        self.camera_transform.x_axis.truncate()
    }

    pub fn camera_up(&self) -> Vec3 {
        self.camera_transform.y_axis.truncate()
    }
}

impl Default for SpatialSnapshot {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY)
    }
}

/// Publish a stationary camera at `rate_hz` until every receiver is gone
pub fn start_fixed_tracker(
    camera_transform: Mat4,
    rate_hz: u32,
) -> (
    watch::Receiver<StreamUpdate<SpatialSnapshot>>,
    JoinHandle<()>,
) {
    let (tx, rx) = stream::latest();
    let period = Duration::from_secs_f64(1.0 / rate_hz.max(1) as f64);
    info!("Fixed tracker publishing at {} Hz", rate_hz.max(1));

    let handle = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let mut snapshot = SpatialSnapshot::new(camera_transform);
            snapshot.light_estimate = Some(LightEstimate {
                ambient_intensity: 1000.0,
                ambient_color_temperature: 6500.0,
            });
            if tx.send(StreamUpdate::Value(Arc::new(snapshot))).is_err() {
                debug!("Spatial receivers dropped, stopping tracker");
                break;
            }
        }
    });

    (rx, handle)
}
