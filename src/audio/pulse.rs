use anyhow::anyhow;
use libpulse_binding as pulse;
use libpulse_simple_binding as psimple;
use pulse::def::BufferAttr;
use pulse::sample::{Format, Spec};
use pulse::stream::Direction;
use tracing::{info, warn};

use super::capture::{AudioBackend, InputDevice};
use crate::error::{PipelineError, Result};

const SAMPLE_BYTES: usize = std::mem::size_of::<f32>();

fn pactl(args: &[&str]) -> anyhow::Result<String> {
    let output = std::process::Command::new("pactl")
        .args(args)
        .output()
        .map_err(|e| anyhow!("Failed to run pactl: {}", e))?;
    if !output.status.success() {
        return Err(anyhow!("pactl {} exited with {}", args.join(" "), output.status));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Sources that `--device` accepts, as `(name, state)` pairs.
///
/// Microphones and sink monitors are both listed; monitors end in `.monitor`.
pub fn list_sources() -> anyhow::Result<Vec<(String, String)>> {
    let listing = pactl(&["list", "short", "sources"])?;
    Ok(listing.lines().filter_map(parse_source_row).collect())
}

// Short listing columns: id, name, driver, sample spec, state
fn parse_source_row(row: &str) -> Option<(String, String)> {
    let mut cols = row.split('\t');
    let name = cols.nth(1)?;
    let state = cols.nth(2)?;
    Some((name.to_string(), state.to_string()))
}

/// Record stream on the PulseAudio server
pub struct PulseBackend {
    source: Option<String>,
    sample_rate: u32,
    channels: u8,
}

impl PulseBackend {
    /// `source = None` records from the server's default source (the microphone)
    pub fn new(source: Option<String>, sample_rate: u32, channels: u8) -> Self {
        Self {
            source,
            sample_rate,
            channels,
        }
    }

    /// Record what the default sink is playing instead of the microphone
    pub fn default_monitor(sample_rate: u32, channels: u8) -> Self {
        Self::new(default_sink_monitor(), sample_rate, channels)
    }
}

impl AudioBackend for PulseBackend {
    fn name(&self) -> String {
        format!(
            "PulseAudio source {}",
            self.source.as_deref().unwrap_or("default")
        )
    }

    fn open(&mut self, frame_len: usize) -> Result<Box<dyn InputDevice>> {
        let spec = Spec {
            format: Format::F32le,
            channels: self.channels,
            rate: self.sample_rate,
        };

        if !spec.is_valid() {
            return Err(PipelineError::Device(format!(
                "invalid sample spec: {} channels at {} Hz",
                self.channels, self.sample_rate
            )));
        }

        let frame_bytes = frame_len * self.channels as usize * SAMPLE_BYTES;
        // One fragment per analysis frame keeps reads aligned with the tick
        let attr = BufferAttr {
            maxlength: u32::MAX,
            tlength: u32::MAX,
            prebuf: u32::MAX,
            minreq: u32::MAX,
            fragsize: frame_bytes as u32,
        };

        let simple = psimple::Simple::new(
            None,                    // Use default server
            "soundscape",            // Application name
            Direction::Record,       // Recording stream
            self.source.as_deref(),  // Device name (None = default)
            "spectrum-analysis",     // Stream description
            &spec,                   // Sample format
            None,                    // Default channel map
            Some(&attr),             // Buffering attributes
        )
        .map_err(|e| PipelineError::Device(format!("failed to connect to PulseAudio: {:?}", e)))?;

        info!("Connected to PulseAudio ({})", self.name());

        Ok(Box::new(PulseDevice {
            simple,
            channels: self.channels as usize,
            sample_rate: self.sample_rate,
            bytes: vec![0u8; frame_bytes],
        }))
    }
}

struct PulseDevice {
    simple: psimple::Simple,
    channels: usize,
    sample_rate: u32,
    bytes: Vec<u8>,
}

impl InputDevice for PulseDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read(&mut self, buf: &mut [f32]) -> Result<usize> {
        let wanted = buf.len() * self.channels * SAMPLE_BYTES;
        if self.bytes.len() != wanted {
            self.bytes.resize(wanted, 0);
        }

        self.simple
            .read(&mut self.bytes)
            .map_err(|e| PipelineError::Device(format!("PulseAudio read error: {:?}", e)))?;

        // Interleaved F32LE; keep channel 0 of each frame
        let stride = self.channels * SAMPLE_BYTES;
        for (sample, chunk) in buf.iter_mut().zip(self.bytes.chunks_exact(stride)) {
            *sample = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(buf.len())
    }
}

/// Monitor of the default sink, used only when `--monitor` asks for what is
/// playing instead of the microphone
fn default_sink_monitor() -> Option<String> {
    let sink = match pactl(&["get-default-sink"]) {
        Ok(out) => out.trim().to_string(),
        Err(e) => {
            warn!("{:#}; recording the default source instead", e);
            return None;
        }
    };
    if sink.is_empty() {
        warn!("No default sink; recording the default source instead");
        return None;
    }
    info!("Recording sink monitor {}.monitor", sink);
    Some(format!("{}.monitor", sink))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_source_row() {
        let row = "52\talsa_output.usb.monitor\tPipeWire\tfloat32le 2ch 48000Hz\tIDLE";
        assert_eq!(
            parse_source_row(row),
            Some(("alsa_output.usb.monitor".to_string(), "IDLE".to_string()))
        );
        assert_eq!(parse_source_row("52\tonly-a-name"), None);
    }
}
