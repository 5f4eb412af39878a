use palette::{Hsl, IntoColor, Srgb};

/// sRGB color plus alpha, components in 0.0..=1.0
pub type Rgba = [f32; 4];

/// Hue of the lowest band (red)
const LOW_HUE: f32 = 0.0;
/// Hue of the highest band (blue)
const HIGH_HUE: f32 = 240.0;

/// One color per band, red for the lowest through blue for the highest
pub fn band_palette(count: usize) -> Vec<Rgba> {
    (0..count)
        .map(|i| {
            let position = if count > 1 {
                i as f32 / (count - 1) as f32
            } else {
                0.0
            };
            hue_to_rgba(LOW_HUE + position * (HIGH_HUE - LOW_HUE))
        })
        .collect()
}

fn hue_to_rgba(hue: f32) -> Rgba {
    let hsl = Hsl::new(hue, 1.0, 0.5);
    let rgb: Srgb = hsl.into_color();
    [rgb.red, rgb.green, rgb.blue, 1.0]
}

/// Convert to 8-bit RGB for terminal output
pub fn to_rgb8(color: Rgba) -> (u8, u8, u8) {
    let channel = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    (channel(color[0]), channel(color[1]), channel(color[2]))
}

/// Scale brightness by `intensity`, keeping hue
pub fn dim(color: Rgba, intensity: f32) -> Rgba {
    let t = intensity.clamp(0.0, 1.0);
    [color[0] * t, color[1] * t, color[2] * t, color[3]]
}
