use palette::{Hsl, IntoColor, Srgb};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Accent hue attached to a track, also used for the idle indicator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Accent {
    Emerald,
    Violet,
    Amber,
    #[default]
    Indigo,
}

impl FromStr for Accent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "emerald" | "green" => Ok(Self::Emerald),
            "violet" | "purple" => Ok(Self::Violet),
            "amber" | "orange" => Ok(Self::Amber),
            "indigo" | "blue" => Ok(Self::Indigo),
            _ => Err(format!("Unknown accent: {}", s)),
        }
    }
}

impl Accent {
    pub fn name(&self) -> &'static str {
        match self {
            Accent::Emerald => "emerald",
            Accent::Violet => "violet",
            Accent::Amber => "amber",
            Accent::Indigo => "indigo",
        }
    }

    /// Base hue/saturation/lightness of the accent.
    fn hsl(&self) -> (f32, f32, f32) {
        match self {
            Accent::Emerald => (160.0, 0.84, 0.39),
            Accent::Violet => (258.0, 0.90, 0.66),
            Accent::Amber => (38.0, 0.92, 0.50),
            Accent::Indigo => (234.0, 0.89, 0.74),
        }
    }

    /// Indicator fill for a given loudness level (0.0 to 1.0). Lightness
    /// rises with the level so louder frames read brighter.
    pub fn fill(&self, level: f32) -> (u8, u8, u8) {
        let (h, s, l) = self.hsl();
        let level = level.clamp(0.0, 1.0);
        to_rgb(h, s, (l + level * 0.25).min(0.9))
    }

    /// Glow color at the given intensity (0.0 = fully faded toward black).
    pub fn glow(&self, intensity: f32) -> (u8, u8, u8) {
        let (h, s, l) = self.hsl();
        let intensity = intensity.clamp(0.0, 1.0);
        to_rgb(h, s * 0.9, l * intensity)
    }

    /// Muted variant used while no source is active.
    pub fn dim(&self) -> (u8, u8, u8) {
        let (h, s, l) = self.hsl();
        to_rgb(h, s * 0.35, l * 0.55)
    }
}

fn to_rgb(h: f32, s: f32, l: f32) -> (u8, u8, u8) {
    let hsl = Hsl::new(h, s, l);
    let rgb: Srgb = hsl.into_color();
    (
        (rgb.red * 255.0) as u8,
        (rgb.green * 255.0) as u8,
        (rgb.blue * 255.0) as u8,
    )
}

/// Glow strength for a loudness level: never fully dark while a source is
/// active, saturating toward full brightness as the level rises.
pub fn glow_intensity(level: f32) -> f32 {
    0.2 + level.clamp(0.0, 1.0) * 0.8
}

/// Interpolate between two colors
pub fn lerp_color(a: (u8, u8, u8), b: (u8, u8, u8), t: f32) -> (u8, u8, u8) {
    let t = t.clamp(0.0, 1.0);
    (
        (a.0 as f32 + (b.0 as f32 - a.0 as f32) * t) as u8,
        (a.1 as f32 + (b.1 as f32 - a.1 as f32) * t) as u8,
        (a.2 as f32 + (b.2 as f32 - a.2 as f32) * t) as u8,
    )
}
