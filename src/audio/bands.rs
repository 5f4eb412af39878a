//! Frequency band tables and band energy aggregation.

use std::time::Instant;

use super::fft::Spectrum;

/// Coarse grouping used for the bass/mid/high balance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandGroup {
    Low,
    Mid,
    High,
}

/// One row of a band table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyBand {
    pub low_hz: f32,
    pub high_hz: f32,
    pub label: &'static str,
    pub group: BandGroup,
}

impl FrequencyBand {
    const fn new(low_hz: f32, high_hz: f32, label: &'static str, group: BandGroup) -> Self {
        Self {
            low_hz,
            high_hz,
            label,
            group,
        }
    }

    /// Inclusive on both ends
    pub fn contains(&self, freq: f32) -> bool {
        freq >= self.low_hz && freq <= self.high_hz
    }
}

/// A band table plus the per-band reactive tuning that goes with it
#[derive(Debug)]
pub struct BandLayout {
    pub name: &'static str,
    pub bands: &'static [FrequencyBand],
    /// Intensity multiplier per band
    pub weights: &'static [f32],
    /// Radius multiplier per band
    pub radius_factors: &'static [f32],
}

impl BandLayout {
    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.bands.iter().map(|b| b.label)
    }

    pub fn find(&self, label: &str) -> Option<usize> {
        self.bands.iter().position(|b| b.label == label)
    }
}

use BandGroup::{High, Low, Mid};

pub static SIX_BANDS: BandLayout = BandLayout {
    name: "six",
    bands: &[
        FrequencyBand::new(20.0, 60.0, "Sub Bass", Low),
        FrequencyBand::new(60.0, 250.0, "Bass", Low),
        FrequencyBand::new(250.0, 500.0, "Low Mids", Mid),
        FrequencyBand::new(500.0, 2000.0, "Mids", Mid),
        FrequencyBand::new(2000.0, 6000.0, "High Mids", High),
        FrequencyBand::new(6000.0, 20000.0, "Highs", High),
    ],
    // Upper bands carry less energy in typical program material
    weights: &[1.0, 1.0, 1.1, 1.2, 1.4, 1.6],
    radius_factors: &[1.2, 1.1, 1.0, 0.9, 0.8, 0.7],
};

pub static TWELVE_BANDS: BandLayout = BandLayout {
    name: "twelve",
    bands: &[
        FrequencyBand::new(20.0, 40.0, "Sub Bass Low", Low),
        FrequencyBand::new(40.0, 60.0, "Sub Bass High", Low),
        FrequencyBand::new(60.0, 120.0, "Bass Low", Low),
        FrequencyBand::new(120.0, 250.0, "Bass High", Low),
        FrequencyBand::new(250.0, 500.0, "Low Mids", Mid),
        FrequencyBand::new(500.0, 1000.0, "Mid Low", Mid),
        FrequencyBand::new(1000.0, 2000.0, "Mid High", Mid),
        FrequencyBand::new(2000.0, 4000.0, "High Mids", Mid),
        FrequencyBand::new(4000.0, 6000.0, "Presence", High),
        FrequencyBand::new(6000.0, 10000.0, "Brilliance Low", High),
        FrequencyBand::new(10000.0, 16000.0, "Brilliance High", High),
        FrequencyBand::new(16000.0, 20000.0, "Air", High),
    ],
    weights: &[1.0, 1.0, 1.0, 1.0, 1.1, 1.1, 1.2, 1.2, 1.4, 1.5, 1.6, 1.8],
    radius_factors: &[1.25, 1.2, 1.15, 1.1, 1.0, 0.95, 0.9, 0.85, 0.8, 0.75, 0.7, 0.65],
};

/// Layout selected at build time
#[cfg(not(feature = "twelve-bands"))]
pub static BAND_LAYOUT: &BandLayout = &SIX_BANDS;
#[cfg(feature = "twelve-bands")]
pub static BAND_LAYOUT: &BandLayout = &TWELVE_BANDS;

/// Per-band energies for one analysis tick
#[derive(Debug, Clone)]
pub struct BandEnergySet {
    /// One entry per layout band, each in [0, 1]
    pub energies: Vec<f32>,
    pub dominant_frequency: f32,
    /// RMS amplitude of the source frame
    pub amplitude: f32,
    pub timestamp: Instant,
}

/// Average energy of the low, mid and high band groups
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpectralBalance {
    pub bass: f32,
    pub mid: f32,
    pub high: f32,
}

impl BandEnergySet {
    pub fn len(&self) -> usize {
        self.energies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.energies.is_empty()
    }

    /// Index of the band with the highest energy (first on ties)
    pub fn loudest_band(&self) -> Option<usize> {
        first_max_index(&self.energies)
    }

    pub fn balance(&self, layout: &BandLayout) -> SpectralBalance {
        let group_mean = |group: BandGroup| {
            let (sum, count) = layout
                .bands
                .iter()
                .zip(&self.energies)
                .filter(|(band, _)| band.group == group)
                .fold((0.0, 0usize), |(sum, count), (_, &e)| (sum + e, count + 1));
            if count > 0 {
                sum / count as f32
            } else {
                0.0
            }
        };

        SpectralBalance {
            bass: group_mean(Low),
            mid: group_mean(Mid),
            high: group_mean(High),
        }
    }
}

pub struct BandEnergyMapper {
    layout: &'static BandLayout,
}

impl BandEnergyMapper {
    pub fn new(layout: &'static BandLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &'static BandLayout {
        self.layout
    }

    pub fn map_bands(&self, spectrum: &Spectrum) -> BandEnergySet {
        let normalized = normalize(&spectrum.magnitudes);

        let energies = self
            .layout
            .bands
            .iter()
            .map(|band| {
                let (sum, count) = spectrum
                    .frequencies
                    .iter()
                    .zip(&normalized)
                    .filter(|(&freq, _)| band.contains(freq))
                    .fold((0.0f32, 0usize), |(sum, count), (_, &m)| {
                        (sum + m.max(0.0), count + 1)
                    });
                if count > 0 {
                    (sum / count as f32).clamp(0.0, 1.0)
                } else {
                    0.0
                }
            })
            .collect();

        BandEnergySet {
            energies,
            dominant_frequency: dominant_frequency(&spectrum.frequencies, &normalized),
            amplitude: spectrum.rms,
            timestamp: spectrum.timestamp,
        }
    }
}

/// Divide by the maximum when it is positive, otherwise return the input as is
pub fn normalize(magnitudes: &[f32]) -> Vec<f32> {
    let max = magnitudes.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max > 0.0 {
        magnitudes.iter().map(|&m| m / max).collect()
    } else {
        magnitudes.to_vec()
    }
}

/// Frequency of the first bin holding the largest value, 0 for empty or all-zero input
pub fn dominant_frequency(frequencies: &[f32], normalized: &[f32]) -> f32 {
    if normalized.iter().all(|&m| m == 0.0) {
        return 0.0;
    }
    first_max_index(normalized)
        .and_then(|i| frequencies.get(i).copied())
        .unwrap_or(0.0)
}

// Stable linear scan: a later bin only wins when strictly greater
fn first_max_index(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, current)) if v <= current => {}
            _ if v.is_nan() => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}
