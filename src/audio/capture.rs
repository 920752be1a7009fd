use libpulse_binding as pulse;
use libpulse_simple_binding as psimple;
use pulse::error::{Code, PAErr};
use pulse::sample::{Format, Spec};
use pulse::stream::Direction;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

use super::tap::AnalysisTap;
use super::{CaptureHandle, SourceError};

// Frames read per iteration (~23ms at 44.1kHz); small enough that the tap's
// 256-sample window never lags far behind the hardware.
const CAPTURE_FRAMES: usize = 1024;
const CAPTURE_CHANNELS: usize = 2;

/// Live microphone stream feeding the analysis tap.
///
/// The PulseAudio connection is owned by a dedicated thread; dropping the
/// handle flips the stop flag and the thread releases the stream on its next
/// iteration.
pub struct MicCapture {
    // Keep the thread handle to ensure it stays alive
    _capture_thread: thread::JoinHandle<()>,
    stop_flag: Arc<AtomicBool>,
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }
}

impl CaptureHandle for MicCapture {}

impl MicCapture {
    /// Connect to the default capture source (or an explicit device) and
    /// start streaming into the tap.
    pub fn open(
        tap: Arc<AnalysisTap>,
        device: Option<String>,
        sample_rate: u32,
    ) -> Result<Self, SourceError> {
        let spec = Spec {
            format: Format::F32le,
            channels: CAPTURE_CHANNELS as u8,
            rate: sample_rate,
        };

        if !spec.is_valid() {
            return Err(SourceError::DeviceUnavailable(format!(
                "invalid capture spec ({} Hz)",
                sample_rate
            )));
        }

        info!(
            "requesting capture stream from {}",
            device.as_deref().unwrap_or("default source")
        );

        let stream = psimple::Simple::new(
            None,                 // Use default server
            "creek",              // Application name
            Direction::Record,    // Recording stream
            device.as_deref(),    // Device name (None = default)
            "microphone-capture", // Stream description
            &spec,                // Sample format
            None,                 // Default channel map
            None,                 // Default buffering attributes
        )
        .map_err(map_connect_error)?;

        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_flag_clone = stop_flag.clone();

        let capture_thread = thread::spawn(move || {
            capture_loop(stream, tap, stop_flag_clone);
        });

        info!("capture stream connected");
        Ok(Self {
            _capture_thread: capture_thread,
            stop_flag,
        })
    }
}

fn capture_loop(stream: psimple::Simple, tap: Arc<AnalysisTap>, stop_flag: Arc<AtomicBool>) {
    let mut buffer = vec![0.0f32; CAPTURE_FRAMES * CAPTURE_CHANNELS];
    let mut mono = vec![0.0f32; CAPTURE_FRAMES];

    loop {
        if stop_flag.load(Ordering::Relaxed) {
            debug!("stop flag set, releasing capture stream");
            break;
        }

        let byte_slice = unsafe {
            std::slice::from_raw_parts_mut(
                buffer.as_mut_ptr() as *mut u8,
                buffer.len() * std::mem::size_of::<f32>(),
            )
        };

        if let Err(e) = stream.read(byte_slice) {
            warn!("capture read error: {:?}", e);
            continue;
        }

        // Downmix interleaved stereo to mono for the tap.
        for (frame, slot) in buffer.chunks_exact(CAPTURE_CHANNELS).zip(mono.iter_mut()) {
            *slot = frame.iter().sum::<f32>() / CAPTURE_CHANNELS as f32;
        }

        tap.feed(&mono);
    }
}

fn map_connect_error(err: PAErr) -> SourceError {
    let message = format!("{}", err);
    if err == Code::Access.into() {
        SourceError::PermissionDenied(message)
    } else {
        SourceError::DeviceUnavailable(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_errors_map_to_permission_denied() {
        assert!(matches!(
            map_connect_error(Code::Access.into()),
            SourceError::PermissionDenied(_)
        ));

        assert!(matches!(
            map_connect_error(Code::ConnectionRefused.into()),
            SourceError::DeviceUnavailable(_)
        ));
    }
}
