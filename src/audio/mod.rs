mod capture;
mod level;
mod manager;
mod playback;
mod tap;

pub use manager::{SessionSnapshot, SourceKind, SourceManager};
pub use tap::AnalysisTap;

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

use crate::config::AudioConfig;
use crate::tracks::TrackLibrary;

/// Why a source could not be acquired. Reported to the user as a blocking
/// alert; the session state is left unchanged in every case.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("no usable capture device: {0}")]
    DeviceUnavailable(String),

    #[error("could not play {path}: {reason}", path = .path.display())]
    Playback { path: PathBuf, reason: String },

    #[error("unknown track id: {0}")]
    UnknownTrack(String),
}

/// An acquired capture stream. Dropping the handle releases the underlying
/// hardware stream.
pub trait CaptureHandle: Send {}

/// An acquired playback pipeline. Dropping the handle stops and releases it.
pub trait PlaybackHandle: Send {
    /// True until the first decoded samples have flowed through the tap.
    fn is_loading(&self) -> bool;
    /// Set once the track drains to its natural end.
    fn is_finished(&self) -> bool;
}

/// Seam between the source manager and the audio hardware. The production
/// implementation is [`SystemBackend`]; tests drive the manager with a fake.
pub trait AudioBackend: Send + Sync {
    fn open_capture(
        &self,
        tap: Arc<AnalysisTap>,
        device: Option<String>,
        sample_rate: u32,
    ) -> Result<Box<dyn CaptureHandle>, SourceError>;

    fn open_playback(
        &self,
        tap: Arc<AnalysisTap>,
        path: PathBuf,
    ) -> Result<Box<dyn PlaybackHandle>, SourceError>;
}

/// PulseAudio capture + rodio playback.
pub struct SystemBackend;

impl AudioBackend for SystemBackend {
    fn open_capture(
        &self,
        tap: Arc<AnalysisTap>,
        device: Option<String>,
        sample_rate: u32,
    ) -> Result<Box<dyn CaptureHandle>, SourceError> {
        let capture = capture::MicCapture::open(tap, device, sample_rate)?;
        Ok(Box::new(capture))
    }

    fn open_playback(
        &self,
        tap: Arc<AnalysisTap>,
        path: PathBuf,
    ) -> Result<Box<dyn PlaybackHandle>, SourceError> {
        let playback = playback::TrackPlayback::open(tap, path)?;
        Ok(Box::new(playback))
    }
}

/// Wire up a full audio session: analysis tap, source manager, level loop.
/// Returns the manager plus the receivers the presentation layer watches.
pub fn create_session(
    config: &AudioConfig,
    library: TrackLibrary,
    initial_track: &str,
) -> (
    SourceManager,
    watch::Receiver<SessionSnapshot>,
    watch::Receiver<f32>,
) {
    SourceManager::new(
        Arc::new(SystemBackend),
        library,
        initial_track,
        config.device.clone(),
        config.sample_rate,
    )
}
