use rodio::{Decoder, OutputStream, Sink, Source};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

use super::tap::AnalysisTap;
use super::{PlaybackHandle, SourceError};

// Mono samples are batched before each tap feed so the sample iterator does
// not take the tap lock on every frame.
const TAP_BATCH: usize = 256;

// Drain poll quantum; bounds how long a stop can lag behind the flag.
const SINK_POLL: Duration = Duration::from_millis(50);

/// One playing track, wired through the analysis tap into the output device.
///
/// The rodio output stream is not `Send`, so stream, sink and decoder all
/// live on a dedicated playback thread. Setup errors are reported back over
/// a channel before the drain loop starts; afterwards the thread is
/// controlled purely through the stop flag. Dropping the handle stops the
/// sink; a subsequent start re-decodes from the beginning of the file.
pub struct TrackPlayback {
    stop_flag: Arc<AtomicBool>,
    loading: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    _playback_thread: thread::JoinHandle<()>,
}

impl Drop for TrackPlayback {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }
}

impl PlaybackHandle for TrackPlayback {
    fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Relaxed)
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}

impl TrackPlayback {
    /// Open `path`, wire it through the tap into the output device, and
    /// begin playback. Returns once the file is decoding and audible (or has
    /// failed to open).
    pub fn open(tap: Arc<AnalysisTap>, path: PathBuf) -> Result<Self, SourceError> {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let loading = Arc::new(AtomicBool::new(true));
        let finished = Arc::new(AtomicBool::new(false));

        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), SourceError>>();

        let thread_path = path.clone();
        let thread_stop = stop_flag.clone();
        let thread_loading = loading.clone();
        let thread_finished = finished.clone();

        let playback_thread = thread::spawn(move || {
            playback_loop(
                tap,
                thread_path,
                thread_stop,
                thread_loading,
                thread_finished,
                ready_tx,
            );
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("playback started: {}", path.display());
                Ok(Self {
                    stop_flag,
                    loading,
                    finished,
                    _playback_thread: playback_thread,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SourceError::Playback {
                path,
                reason: "playback thread exited during setup".into(),
            }),
        }
    }
}

fn playback_loop(
    tap: Arc<AnalysisTap>,
    path: PathBuf,
    stop_flag: Arc<AtomicBool>,
    loading: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    ready_tx: mpsc::Sender<Result<(), SourceError>>,
) {
    debug!("playback thread started");

    // Validate the file before touching the output device.
    let file = match File::open(&path) {
        Ok(f) => f,
        Err(e) => {
            let _ = ready_tx.send(Err(SourceError::Playback {
                path,
                reason: format!("could not open file: {e}"),
            }));
            return;
        }
    };

    let source = match Decoder::new(BufReader::new(file)) {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(SourceError::Playback {
                path,
                reason: format!("could not decode: {e}"),
            }));
            return;
        }
    };

    // The stream must outlive the sink; both stay on this thread.
    let (_stream, stream_handle) = match OutputStream::try_default() {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(SourceError::Playback {
                path,
                reason: format!("no output device: {e}"),
            }));
            return;
        }
    };

    let sink = match Sink::try_new(&stream_handle) {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(SourceError::Playback {
                path,
                reason: format!("could not create sink: {e}"),
            }));
            return;
        }
    };

    let channels = source.channels();
    let tapped = TappedSource {
        inner: source.convert_samples::<f32>(),
        tap,
        channels,
        frame_pos: 0,
        frame_acc: 0.0,
        pending: Vec::with_capacity(TAP_BATCH),
        loading,
    };

    sink.append(tapped);
    let _ = ready_tx.send(Ok(()));

    // Drain until the track ends naturally or the stop flag flips.
    while !sink.empty() {
        if stop_flag.load(Ordering::Relaxed) {
            debug!("stop requested, stopping sink");
            sink.stop();
            break;
        }
        thread::sleep(SINK_POLL);
    }

    if !stop_flag.load(Ordering::Relaxed) {
        debug!("track drained to its natural end");
        finished.store(true, Ordering::Relaxed);
    }

    debug!("playback thread ended");
}

/// Sample adapter that forwards audio to the sink unchanged while feeding a
/// mono downmix into the analysis tap. The first delivered batch clears the
/// loading flag.
struct TappedSource<I> {
    inner: I,
    tap: Arc<AnalysisTap>,
    channels: u16,
    frame_pos: u16,
    frame_acc: f32,
    pending: Vec<f32>,
    loading: Arc<AtomicBool>,
}

impl<I> Iterator for TappedSource<I>
where
    I: Iterator<Item = f32>,
{
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        let sample = match self.inner.next() {
            Some(s) => s,
            None => {
                // Flush whatever is left so the tail of the track is analyzed.
                if !self.pending.is_empty() {
                    self.tap.feed(&self.pending);
                    self.pending.clear();
                }
                return None;
            }
        };

        self.frame_acc += sample;
        self.frame_pos += 1;
        if self.frame_pos == self.channels.max(1) {
            self.pending.push(self.frame_acc / self.channels.max(1) as f32);
            self.frame_acc = 0.0;
            self.frame_pos = 0;

            if self.pending.len() >= TAP_BATCH {
                self.tap.feed(&self.pending);
                self.pending.clear();
                if self.loading.load(Ordering::Relaxed) {
                    self.loading.store(false, Ordering::Relaxed);
                }
            }
        }

        Some(sample)
    }
}

impl<I> Source for TappedSource<I>
where
    I: Source<Item = f32>,
{
    fn current_frame_len(&self) -> Option<usize> {
        self.inner.current_frame_len()
    }

    fn channels(&self) -> u16 {
        self.inner.channels()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn total_duration(&self) -> Option<Duration> {
        self.inner.total_duration()
    }
}
