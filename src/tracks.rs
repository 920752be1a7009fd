use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::color::Accent;

/// Static description of a playable track. Read-only configuration, not
/// session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub accent: Accent,
}

/// The set of tracks offered for playback, looked up by id. Built-ins can be
/// replaced wholesale from the config file.
#[derive(Debug, Clone)]
pub struct TrackLibrary {
    tracks: Vec<TrackDescriptor>,
}

impl Default for TrackLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TrackLibrary {
    pub fn builtin() -> Self {
        Self {
            tracks: vec![
                TrackDescriptor {
                    id: "gardens".into(),
                    name: "Gardens".into(),
                    path: PathBuf::from("assets/audio/gardens.mp3"),
                    accent: Accent::Emerald,
                },
                TrackDescriptor {
                    id: "kugelsicher".into(),
                    name: "Kugelsicher".into(),
                    path: PathBuf::from("assets/audio/kugelsicher.mp3"),
                    accent: Accent::Violet,
                },
                TrackDescriptor {
                    id: "spinning-head".into(),
                    name: "Spinning Head".into(),
                    path: PathBuf::from("assets/audio/spinning-head.mp3"),
                    accent: Accent::Amber,
                },
            ],
        }
    }

    /// Library from config: an explicit track list replaces the built-ins.
    pub fn from_tracks(tracks: Vec<TrackDescriptor>) -> Self {
        if tracks.is_empty() {
            Self::builtin()
        } else {
            Self { tracks }
        }
    }

    pub fn get(&self, id: &str) -> Option<&TrackDescriptor> {
        self.tracks.iter().find(|t| t.id == id)
    }

    /// Track at a 1-based position, as bound to the number keys.
    pub fn by_position(&self, position: usize) -> Option<&TrackDescriptor> {
        position.checked_sub(1).and_then(|i| self.tracks.get(i))
    }

    pub fn first_id(&self) -> Option<&str> {
        self.tracks.first().map(|t| t.id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackDescriptor> {
        self.tracks.iter()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
