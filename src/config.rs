use anyhow::{Context, Result};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use soundscape::audio::DEFAULT_SAMPLE_RATE;
use soundscape::bridge::{DEFAULT_BASE_RADIUS, DEFAULT_DRAG_SENSITIVITY, DEFAULT_SOURCE_OFFSET};

use crate::display::DisplayMode;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub display: DisplayConfig,
    pub audio: AudioConfig,
    pub tracking: TrackingConfig,
    pub bridge: BridgeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    pub mode: DisplayMode,
    pub fps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// PulseAudio source name (None = server default)
    pub device: Option<String>,
    /// Record the default sink's monitor when no device is named
    pub monitor: bool,
    pub sample_rate: u32,
    pub channels: u8,
    /// Generate a sine at this frequency instead of opening a device
    pub tone: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackingConfig {
    pub rate_hz: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub base_radius: f32,
    /// Sound source offset from the camera, in meters
    pub source_offset: [f32; 3],
    pub drag_sensitivity: f32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            mode: DisplayMode::Terminal,
            fps: 60,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            monitor: false,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 2,
            tone: None,
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self { rate_hz: 60 }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_radius: DEFAULT_BASE_RADIUS,
            source_offset: DEFAULT_SOURCE_OFFSET.to_array(),
            drag_sensitivity: DEFAULT_DRAG_SENSITIVITY,
        }
    }
}

impl BridgeConfig {
    pub fn source_offset(&self) -> Vec3 {
        Vec3::from_array(self.source_offset)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Get the default XDG config path (~/.config/soundscape/config.toml)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("soundscape").join("config.toml"))
    }

    /// Load config from the default XDG path if it exists
    /// Returns None if file doesn't exist, logs warning on parse errors
    pub fn load_from_default_path() -> Option<Self> {
        let path = Self::default_path()?;
        if !path.exists() {
            return None;
        }
        match Self::load(&path) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                Some(config)
            }
            Err(e) => {
                warn!("{:#}; using defaults", e);
                None
            }
        }
    }

    /// Initialize default config file at XDG path, returns the path
    pub fn init_default_config() -> Result<PathBuf> {
        let path = Self::default_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        std::fs::write(&path, Self::generate_config_template())
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(path)
    }

    /// Generate a commented TOML config template
    pub fn generate_config_template() -> String {
        r#"# Soundscape Configuration
# This file is auto-generated. Edit as needed.

[display]
# Display mode: "terminal" or "log"
mode = "terminal"
# Render ticks per second
fps = 60

[audio]
# PulseAudio source name (omit for the server default)
# device = "alsa_input.pci-0000_00_1f.3.analog-stereo"
# Record what is playing (default sink monitor) instead of the default source
monitor = false
# Sample rate in Hz
sample_rate = 44100
# Channels requested from the server; only the first is analysed
channels = 2
# Built-in sine source in Hz, replaces the device when set
# tone = 440.0

[tracking]
# Camera snapshots per second from the fixed tracker
rate_hz = 60

[bridge]
# Radius of the highest band before per-band scaling, in meters
base_radius = 0.5
# Sound source offset from the camera [x, y, z], in meters
source_offset = [0.0, -0.5, -2.0]
# Meters moved per drag step
drag_sensitivity = 0.01
"#
        .to_string()
    }

    /// Merge CLI arguments into config (CLI takes priority)
    pub fn merge_args(&mut self, args: &crate::Args) {
        if let Some(mode) = args.mode {
            self.display.mode = mode;
        }
        if let Some(fps) = args.fps {
            self.display.fps = fps;
        }

        if let Some(ref device) = args.device {
            self.audio.device = Some(device.clone());
        }
        if args.monitor {
            self.audio.monitor = true;
        }
        if let Some(rate) = args.sample_rate {
            self.audio.sample_rate = rate;
        }
        if let Some(tone) = args.tone {
            self.audio.tone = Some(tone);
        }
    }
}
