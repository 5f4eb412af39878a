//! Real-time audio spectrum analysis driving spatially anchored visuals.
//!
//! Audio is captured on a dedicated thread, analysed inline per frame
//! ([`audio::SpectralAnalyzer`], [`audio::BandEnergyMapper`]) and published
//! as the latest [`audio::BandEnergySet`]. The [`bridge`] joins that stream
//! with the latest [`spatial::SpatialSnapshot`] and emits
//! [`bridge::VisualDriverFrame`]s for a renderer to poll.

pub mod audio;
pub mod bridge;
pub mod color;
pub mod error;
pub mod spatial;
pub mod stream;

pub use error::{PipelineError, Result};
