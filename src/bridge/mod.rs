//! Reactive parameters derived from band energies and the tracked camera.
//!
//! The bridge turns each joined ([`BandEnergySet`], [`SpatialSnapshot`])
//! pair into a [`VisualDriverFrame`]: one [`BandVisual`] per band whose
//! energy clears [`ACTIVATION_THRESHOLD`]. Bands below it are left out
//! entirely so renderers can drop their visuals.

mod task;

pub use task::spawn_bridge;

use glam::Vec3;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::debug;

use crate::audio::{BandEnergySet, BandLayout};
use crate::color::{band_palette, Rgba};
use crate::spatial::SpatialSnapshot;

/// A band is drawn only when its energy is strictly above this
pub const ACTIVATION_THRESHOLD: f32 = 0.1;

pub const DEFAULT_BASE_RADIUS: f32 = 0.5;

/// Sound source offset from the camera: slightly below, two meters ahead
pub const DEFAULT_SOURCE_OFFSET: Vec3 = Vec3::new(0.0, -0.5, -2.0);

/// World units per gesture unit when dragging the source
pub const DEFAULT_DRAG_SENSITIVITY: f32 = 0.01;

#[derive(Debug, Clone, PartialEq)]
pub struct BandVisual {
    pub band_index: usize,
    pub label: &'static str,
    pub position: Vec3,
    pub radius: f32,
    pub color: Rgba,
    pub intensity: f32,
    pub energy: f32,
}

#[derive(Debug, Clone)]
pub struct VisualDriverFrame {
    /// Active bands in ascending band order
    pub bands: Vec<BandVisual>,
    pub dominant_frequency: f32,
    pub amplitude: f32,
    pub timestamp: Instant,
}

impl VisualDriverFrame {
    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    pub fn band(&self, band_index: usize) -> Option<&BandVisual> {
        self.bands.iter().find(|b| b.band_index == band_index)
    }
}

/// Shared, externally adjustable anchor for all band visuals
///
/// Stored as an offset from the camera position. Clones share the same
/// anchor.
#[derive(Clone)]
pub struct SoundSource {
    offset: Arc<watch::Sender<Vec3>>,
    sensitivity: f32,
}

impl Default for SoundSource {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE_OFFSET, DEFAULT_DRAG_SENSITIVITY)
    }
}

impl SoundSource {
    pub fn new(offset: Vec3, sensitivity: f32) -> Self {
        let (tx, _) = watch::channel(offset);
        Self {
            offset: Arc::new(tx),
            sensitivity,
        }
    }

    pub fn offset(&self) -> Vec3 {
        *self.offset.borrow()
    }

    pub fn set(&self, offset: Vec3) {
        self.offset.send_replace(offset);
    }

    /// Move along the camera's screen axes, as a pan gesture would
    pub fn drag(&self, dx: f32, dy: f32, spatial: &SpatialSnapshot) -> Vec3 {
        let delta = spatial.camera_right() * (dx * self.sensitivity)
            + spatial.camera_up() * (dy * self.sensitivity);
        self.offset.send_modify(|offset| *offset += delta);
        let moved = self.offset();
        debug!("Sound source moved to {:?}", moved);
        moved
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec3> {
        self.offset.subscribe()
    }
}

pub struct ReactiveParameterBridge {
    layout: &'static BandLayout,
    palette: Vec<Rgba>,
    base_radius: f32,
    source: SoundSource,
}

impl ReactiveParameterBridge {
    pub fn new(layout: &'static BandLayout, base_radius: f32, source: SoundSource) -> Self {
        Self {
            layout,
            palette: band_palette(layout.len()),
            base_radius,
            source,
        }
    }

    pub fn layout(&self) -> &'static BandLayout {
        self.layout
    }

    pub fn source(&self) -> &SoundSource {
        &self.source
    }

    pub fn intensity(&self, band_index: usize, energy: f32) -> f32 {
        let weight = self.layout.weights.get(band_index).copied().unwrap_or(1.0);
        (energy * weight * 2.0).clamp(0.2, 1.0)
    }

    /// Lower bands get larger radii, up to twice the base for band 0
    pub fn radius(&self, band_index: usize) -> f32 {
        let count = self.layout.len();
        let frequency_factor = if count > 1 {
            1.0 - band_index as f32 / (count - 1) as f32
        } else {
            1.0
        };
        let band_factor = self
            .layout
            .radius_factors
            .get(band_index)
            .copied()
            .unwrap_or(1.0);
        self.base_radius * (1.0 + frequency_factor) * band_factor
    }

    pub fn update(&self, bands: &BandEnergySet, spatial: &SpatialSnapshot) -> VisualDriverFrame {
        let position = spatial.camera_position() + self.source.offset();

        let visuals = self
            .layout
            .bands
            .iter()
            .zip(&bands.energies)
            .enumerate()
            .filter(|(_, (_, &energy))| energy > ACTIVATION_THRESHOLD)
            .map(|(i, (band, &energy))| BandVisual {
                band_index: i,
                label: band.label,
                position,
                radius: self.radius(i),
                color: self.palette[i],
                intensity: self.intensity(i, energy),
                energy,
            })
            .collect();

        VisualDriverFrame {
            bands: visuals,
            dominant_frequency: bands.dominant_frequency,
            amplitude: bands.amplitude,
            timestamp: bands.timestamp.max(spatial.timestamp),
        }
    }
}
