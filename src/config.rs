use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::tracks::TrackDescriptor;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub audio: AudioConfig,
    pub playback: PlaybackConfig,
    pub indicator: IndicatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Capture device (None = default source).
    pub device: Option<String>,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Track selected when the session starts.
    pub initial_track: String,
    /// Replaces the built-in track list when non-empty.
    #[serde(default)]
    pub tracks: Vec<TrackDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    /// Resting radius, as a fraction of the largest circle that fits.
    pub base_radius: f32,
    /// Additional radius at full loudness, as a fraction of the same.
    pub expansion: f32,
    /// Show the horizontal level gauge under the indicator.
    pub show_gauge: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio: AudioConfig {
                device: None,
                sample_rate: 44100,
            },
            playback: PlaybackConfig {
                initial_track: "gardens".to_string(),
                tracks: Vec::new(),
            },
            indicator: IndicatorConfig {
                base_radius: 0.45,
                expansion: 0.35,
                show_gauge: true,
            },
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Get the default XDG config path (~/.config/creek/config.toml)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("creek").join("config.toml"))
    }

    /// Load config from the default XDG path if it exists
    /// Returns None if file doesn't exist, logs warning on parse errors
    pub fn load_from_default_path() -> Option<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            match Self::load(&path) {
                Ok(config) => Some(config),
                Err(e) => {
                    eprintln!(
                        "Warning: Failed to parse config at {}: {}\nUsing defaults.",
                        path.display(),
                        e
                    );
                    None
                }
            }
        } else {
            None
        }
    }

    /// Initialize default config file at XDG path, returns the path
    pub fn init_default_config() -> Result<PathBuf> {
        let path = Self::default_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let template = Self::generate_config_template();
        std::fs::write(&path, template)?;

        Ok(path)
    }

    /// Generate a commented TOML config template
    pub fn generate_config_template() -> String {
        r#"# Creek Configuration
# This file is auto-generated. Edit as needed.

[audio]
# Capture device for microphone input (omit for the default source)
# device = "alsa_input.pci-0000_00_1f.3.analog-stereo"
# Sample rate in Hz
sample_rate = 44100

[playback]
# Track selected at startup
initial_track = "gardens"
# Custom track list; replaces the built-ins when present.
# Accents: emerald, violet, amber, indigo
# [[playback.tracks]]
# id = "demo"
# name = "Demo"
# path = "/home/me/music/demo.mp3"
# accent = "violet"

[indicator]
# Resting radius as a fraction of the largest circle that fits the window
base_radius = 0.45
# Additional radius at full loudness
expansion = 0.35
# Show the horizontal level gauge under the indicator
show_gauge = true
"#
        .to_string()
    }

    /// Merge CLI arguments into config (CLI takes priority)
    pub fn merge_args(&mut self, args: &crate::Args) {
        if let Some(ref device) = args.audio_device {
            self.audio.device = Some(device.clone());
        }
        if let Some(rate) = args.sample_rate {
            self.audio.sample_rate = rate;
        }
        if let Some(ref track) = args.track {
            self.playback.initial_track = track.clone();
        }
    }
}
