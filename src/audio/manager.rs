use std::sync::Arc;
use tokio::sync::watch;
use tokio::task;
use tracing::{debug, info, warn};

use super::level::LevelLoop;
use super::tap::AnalysisTap;
use super::{AudioBackend, CaptureHandle, PlaybackHandle, SourceError};
use crate::tracks::TrackLibrary;

/// Which producer currently feeds the analysis tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceKind {
    #[default]
    None,
    Microphone,
    Playback,
}

/// UI-facing session state, published through a watch channel on every
/// transition. The loudness level travels on its own channel.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub source: SourceKind,
    pub is_loading: bool,
    pub selected_track: String,
}

impl SessionSnapshot {
    pub fn is_listening(&self) -> bool {
        self.source == SourceKind::Microphone
    }

    pub fn is_playing(&self) -> bool {
        self.source == SourceKind::Playback
    }
}

enum ActiveSource {
    None,
    Microphone(#[allow(dead_code)] Box<dyn CaptureHandle>),
    Playback(Box<dyn PlaybackHandle>),
}

impl ActiveSource {
    fn kind(&self) -> SourceKind {
        match self {
            ActiveSource::None => SourceKind::None,
            ActiveSource::Microphone(_) => SourceKind::Microphone,
            ActiveSource::Playback(_) => SourceKind::Playback,
        }
    }
}

/// Owns the single active audio source and its connection into the analysis
/// tap.
///
/// All transitions run on one logical control thread (the render loop);
/// acquisitions suspend on a blocking task, and a generation counter stamped
/// before the suspension is re-checked afterwards so a result that lost to a
/// competing start/stop releases its resources instead of being committed.
pub struct SourceManager {
    backend: Arc<dyn AudioBackend>,
    tap: Arc<AnalysisTap>,
    library: TrackLibrary,
    device: Option<String>,
    sample_rate: u32,
    active: ActiveSource,
    selected: String,
    loading: bool,
    level_loop: LevelLoop,
    status: watch::Sender<SessionSnapshot>,
    generation: u64,
    closed: bool,
}

impl SourceManager {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        library: TrackLibrary,
        initial_track: &str,
        device: Option<String>,
        sample_rate: u32,
    ) -> (
        Self,
        watch::Receiver<SessionSnapshot>,
        watch::Receiver<f32>,
    ) {
        let selected = if library.get(initial_track).is_some() {
            initial_track.to_string()
        } else {
            if !initial_track.is_empty() {
                warn!("unknown initial track '{}', using first", initial_track);
            }
            library.first_id().unwrap_or_default().to_string()
        };

        let tap = Arc::new(AnalysisTap::new());
        let (level_tx, level_rx) = watch::channel(0.0f32);
        let (status_tx, status_rx) = watch::channel(SessionSnapshot {
            source: SourceKind::None,
            is_loading: false,
            selected_track: selected.clone(),
        });

        let manager = Self {
            backend,
            tap: tap.clone(),
            library,
            device,
            sample_rate,
            active: ActiveSource::None,
            selected,
            loading: false,
            level_loop: LevelLoop::new(tap, level_tx),
            status: status_tx,
            generation: 0,
            closed: false,
        };

        (manager, status_rx, level_rx)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            source: self.active.kind(),
            is_loading: self.loading,
            selected_track: self.selected.clone(),
        }
    }

    pub fn library(&self) -> &TrackLibrary {
        &self.library
    }

    /// Acquire the microphone and wire it into the tap. Any active playback
    /// is stopped first. Starting while the microphone is already active is
    /// a no-op.
    pub async fn start_microphone(&mut self) -> Result<(), SourceError> {
        if self.closed {
            return Ok(());
        }
        if matches!(self.active, ActiveSource::Playback(_)) {
            self.stop_playback();
        }
        if matches!(self.active, ActiveSource::Microphone(_)) {
            return Ok(());
        }

        let generation = self.bump();
        self.tap.reset();

        let backend = self.backend.clone();
        let tap = self.tap.clone();
        let device = self.device.clone();
        let sample_rate = self.sample_rate;
        let handle = task::spawn_blocking(move || backend.open_capture(tap, device, sample_rate))
            .await
            .map_err(|e| SourceError::DeviceUnavailable(e.to_string()))??;

        if generation != self.generation {
            // A competing start/stop won while we waited on the device; the
            // late stream is released, not committed.
            debug!("discarding superseded capture acquisition");
            drop(handle);
            return Ok(());
        }

        self.active = ActiveSource::Microphone(handle);
        self.publish();
        self.level_loop.start();
        info!("microphone active");
        Ok(())
    }

    /// Release the capture stream. No-op when the microphone is not active.
    pub fn stop_microphone(&mut self) {
        if matches!(self.active, ActiveSource::Microphone(_)) {
            self.bump();
            self.active = ActiveSource::None;
            self.level_loop.stop();
            self.publish();
            info!("microphone stopped");
        }
    }

    /// Start playing the selected track through the tap and the output
    /// device. An active microphone, and any previous playback, are torn
    /// down first.
    pub async fn start_playback(&mut self) -> Result<(), SourceError> {
        if self.closed {
            return Ok(());
        }
        if matches!(self.active, ActiveSource::Microphone(_)) {
            self.stop_microphone();
        }
        if matches!(self.active, ActiveSource::Playback(_)) {
            self.stop_playback();
        }

        let track = self
            .library
            .get(&self.selected)
            .ok_or_else(|| SourceError::UnknownTrack(self.selected.clone()))?;
        let path = track.path.clone();

        let generation = self.bump();
        self.loading = true;
        self.publish();
        self.tap.reset();

        let backend = self.backend.clone();
        let tap = self.tap.clone();
        let open_path = path.clone();
        let result = task::spawn_blocking(move || backend.open_playback(tap, open_path))
            .await
            .map_err(|e| SourceError::Playback {
                path: path.clone(),
                reason: e.to_string(),
            })
            .and_then(|r| r);

        let handle = match result {
            Ok(handle) => handle,
            Err(e) => {
                if generation == self.generation {
                    self.loading = false;
                    self.publish();
                }
                return Err(e);
            }
        };

        if generation != self.generation {
            debug!("discarding superseded playback acquisition");
            drop(handle);
            return Ok(());
        }

        self.active = ActiveSource::Playback(handle);
        self.publish();
        self.level_loop.start();
        info!(track = %self.selected, "playback active");
        Ok(())
    }

    /// Stop and release playback. No-op when nothing is playing. Also the
    /// transition taken when a track reaches its natural end.
    pub fn stop_playback(&mut self) {
        if matches!(self.active, ActiveSource::Playback(_)) {
            self.bump();
            self.active = ActiveSource::None;
            self.loading = false;
            self.level_loop.stop();
            self.publish();
            info!("playback stopped");
        }
    }

    /// Change the pending track selection. Active playback is stopped first;
    /// while idle this only updates the selection and touches no resources.
    pub fn select_track(&mut self, id: &str) -> Result<(), SourceError> {
        if self.library.get(id).is_none() {
            return Err(SourceError::UnknownTrack(id.to_string()));
        }
        if matches!(self.active, ActiveSource::Playback(_)) {
            self.stop_playback();
        }
        if self.selected != id {
            self.selected = id.to_string();
            self.publish();
            debug!(track = %id, "track selected");
        }
        Ok(())
    }

    /// Apply deferred transitions observed from the playback thread: natural
    /// end of track and the loading flag clearing. Called once per frame on
    /// the control thread; never acquires resources.
    pub fn poll(&mut self) {
        if let ActiveSource::Playback(handle) = &self.active {
            if handle.is_finished() {
                debug!("track reached natural end");
                self.stop_playback();
                return;
            }
            if self.loading && !handle.is_loading() {
                self.loading = false;
                self.publish();
            }
        }
    }

    /// Close the session: release any active source and cancel level
    /// sampling. Safe to call when everything is already stopped; the second
    /// call is a no-op.
    pub fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.stop_microphone();
        self.stop_playback();
        self.level_loop.stop();
        self.closed = true;
        info!("audio session closed");
    }

    fn bump(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn publish(&self) {
        self.status.send_replace(self.snapshot());
    }
}

impl Drop for SourceManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeCapture {
        released: Arc<AtomicBool>,
    }

    impl CaptureHandle for FakeCapture {}

    impl Drop for FakeCapture {
        fn drop(&mut self) {
            self.released.store(true, Ordering::Relaxed);
        }
    }

    struct FakePlayback {
        released: Arc<AtomicBool>,
        loading: Arc<AtomicBool>,
        finished: Arc<AtomicBool>,
    }

    impl PlaybackHandle for FakePlayback {
        fn is_loading(&self) -> bool {
            self.loading.load(Ordering::Relaxed)
        }

        fn is_finished(&self) -> bool {
            self.finished.load(Ordering::Relaxed)
        }
    }

    impl Drop for FakePlayback {
        fn drop(&mut self) {
            self.released.store(true, Ordering::Relaxed);
        }
    }

    /// Flags for the most recent playback acquisition.
    #[derive(Default)]
    struct PlaybackProbe {
        released: Option<Arc<AtomicBool>>,
        loading: Option<Arc<AtomicBool>>,
        finished: Option<Arc<AtomicBool>>,
    }

    #[derive(Default)]
    struct FakeBackend {
        captures: AtomicUsize,
        playbacks: AtomicUsize,
        fail_capture: AtomicBool,
        fail_playback: AtomicBool,
        capture_released: Mutex<Option<Arc<AtomicBool>>>,
        playback_probe: Mutex<PlaybackProbe>,
    }

    impl FakeBackend {
        fn acquisitions(&self) -> usize {
            self.captures.load(Ordering::Relaxed) + self.playbacks.load(Ordering::Relaxed)
        }

        fn capture_released(&self) -> bool {
            self.capture_released
                .lock()
                .unwrap()
                .as_ref()
                .map(|f| f.load(Ordering::Relaxed))
                .unwrap_or(false)
        }

        fn playback_released(&self) -> bool {
            self.playback_probe
                .lock()
                .unwrap()
                .released
                .as_ref()
                .map(|f| f.load(Ordering::Relaxed))
                .unwrap_or(false)
        }

        fn finish_playback(&self) {
            if let Some(flag) = &self.playback_probe.lock().unwrap().finished {
                flag.store(true, Ordering::Relaxed);
            }
        }

        fn clear_loading(&self) {
            if let Some(flag) = &self.playback_probe.lock().unwrap().loading {
                flag.store(false, Ordering::Relaxed);
            }
        }
    }

    impl AudioBackend for FakeBackend {
        fn open_capture(
            &self,
            _tap: Arc<AnalysisTap>,
            _device: Option<String>,
            _sample_rate: u32,
        ) -> Result<Box<dyn CaptureHandle>, SourceError> {
            if self.fail_capture.load(Ordering::Relaxed) {
                return Err(SourceError::PermissionDenied("test denial".into()));
            }
            self.captures.fetch_add(1, Ordering::Relaxed);
            let released = Arc::new(AtomicBool::new(false));
            *self.capture_released.lock().unwrap() = Some(released.clone());
            Ok(Box::new(FakeCapture { released }))
        }

        fn open_playback(
            &self,
            _tap: Arc<AnalysisTap>,
            path: PathBuf,
        ) -> Result<Box<dyn PlaybackHandle>, SourceError> {
            if self.fail_playback.load(Ordering::Relaxed) {
                return Err(SourceError::Playback {
                    path,
                    reason: "test failure".into(),
                });
            }
            self.playbacks.fetch_add(1, Ordering::Relaxed);
            let released = Arc::new(AtomicBool::new(false));
            let loading = Arc::new(AtomicBool::new(true));
            let finished = Arc::new(AtomicBool::new(false));
            *self.playback_probe.lock().unwrap() = PlaybackProbe {
                released: Some(released.clone()),
                loading: Some(loading.clone()),
                finished: Some(finished.clone()),
            };
            Ok(Box::new(FakePlayback {
                released,
                loading,
                finished,
            }))
        }
    }

    fn session() -> (
        Arc<FakeBackend>,
        SourceManager,
        watch::Receiver<SessionSnapshot>,
        watch::Receiver<f32>,
    ) {
        let backend = Arc::new(FakeBackend::default());
        let (manager, status_rx, level_rx) = SourceManager::new(
            backend.clone(),
            TrackLibrary::builtin(),
            "gardens",
            None,
            44100,
        );
        (backend, manager, status_rx, level_rx)
    }

    #[tokio::test]
    async fn sources_are_mutually_exclusive() {
        let (backend, mut manager, status_rx, _level_rx) = session();

        manager.start_microphone().await.unwrap();
        assert_eq!(status_rx.borrow().source, SourceKind::Microphone);

        manager.start_playback().await.unwrap();
        assert_eq!(status_rx.borrow().source, SourceKind::Playback);
        assert!(
            backend.capture_released(),
            "starting playback must release the microphone first"
        );

        manager.start_microphone().await.unwrap();
        assert_eq!(status_rx.borrow().source, SourceKind::Microphone);
        assert!(
            backend.playback_released(),
            "starting the microphone must release playback first"
        );
    }

    #[tokio::test]
    async fn stops_are_idempotent() {
        let (_backend, mut manager, status_rx, _level_rx) = session();

        manager.stop_microphone();
        manager.stop_playback();
        assert_eq!(status_rx.borrow().source, SourceKind::None);

        manager.start_microphone().await.unwrap();
        manager.stop_microphone();
        manager.stop_microphone();
        assert_eq!(status_rx.borrow().source, SourceKind::None);
    }

    #[tokio::test]
    async fn starting_microphone_twice_acquires_once() {
        let (backend, mut manager, _status_rx, _level_rx) = session();

        manager.start_microphone().await.unwrap();
        manager.start_microphone().await.unwrap();
        assert_eq!(backend.captures.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn level_resets_to_zero_on_deactivation() {
        let (_backend, mut manager, _status_rx, level_rx) = session();

        manager.start_microphone().await.unwrap();
        assert!(manager.level_loop.is_running());

        manager.stop_microphone();
        assert!(!manager.level_loop.is_running());
        assert_eq!(*level_rx.borrow(), 0.0);
    }

    #[tokio::test]
    async fn selecting_while_idle_touches_no_resources() {
        let (backend, mut manager, status_rx, _level_rx) = session();

        manager.select_track("kugelsicher").unwrap();
        assert_eq!(status_rx.borrow().selected_track, "kugelsicher");
        assert_eq!(backend.acquisitions(), 0);
    }

    #[tokio::test]
    async fn selecting_while_playing_stops_playback() {
        let (backend, mut manager, status_rx, _level_rx) = session();

        manager.start_playback().await.unwrap();
        manager.select_track("spinning-head").unwrap();

        let snapshot = status_rx.borrow().clone();
        assert_eq!(snapshot.source, SourceKind::None);
        assert_eq!(snapshot.selected_track, "spinning-head");
        assert!(backend.playback_released());
    }

    #[tokio::test]
    async fn unknown_track_is_rejected() {
        let (_backend, mut manager, status_rx, _level_rx) = session();

        assert!(matches!(
            manager.select_track("no-such-track"),
            Err(SourceError::UnknownTrack(_))
        ));
        assert_eq!(status_rx.borrow().selected_track, "gardens");
    }

    #[tokio::test]
    async fn natural_end_behaves_like_explicit_stop() {
        let (backend, mut manager, status_rx, level_rx) = session();

        manager.start_playback().await.unwrap();
        assert_eq!(status_rx.borrow().source, SourceKind::Playback);

        backend.finish_playback();
        manager.poll();

        let snapshot = status_rx.borrow().clone();
        assert_eq!(snapshot.source, SourceKind::None);
        assert!(!snapshot.is_loading);
        assert_eq!(*level_rx.borrow(), 0.0);
        assert!(backend.playback_released());
    }

    #[tokio::test]
    async fn loading_clears_once_samples_flow() {
        let (backend, mut manager, status_rx, _level_rx) = session();

        manager.start_playback().await.unwrap();
        assert!(status_rx.borrow().is_loading);

        backend.clear_loading();
        manager.poll();
        assert!(!status_rx.borrow().is_loading);
        assert_eq!(status_rx.borrow().source, SourceKind::Playback);
    }

    #[tokio::test]
    async fn capture_failure_leaves_state_unchanged() {
        let (backend, mut manager, status_rx, _level_rx) = session();
        backend.fail_capture.store(true, Ordering::Relaxed);

        let err = manager.start_microphone().await.unwrap_err();
        assert!(matches!(err, SourceError::PermissionDenied(_)));
        assert_eq!(status_rx.borrow().source, SourceKind::None);
        assert!(!manager.level_loop.is_running());
    }

    #[tokio::test]
    async fn playback_failure_clears_loading() {
        let (backend, mut manager, status_rx, _level_rx) = session();
        backend.fail_playback.store(true, Ordering::Relaxed);

        let err = manager.start_playback().await.unwrap_err();
        assert!(matches!(err, SourceError::Playback { .. }));

        let snapshot = status_rx.borrow().clone();
        assert_eq!(snapshot.source, SourceKind::None);
        assert!(!snapshot.is_loading);
    }

    #[tokio::test]
    async fn teardown_is_once_only_and_releases_sources() {
        let (backend, mut manager, status_rx, level_rx) = session();

        manager.start_microphone().await.unwrap();
        manager.teardown();

        assert!(backend.capture_released());
        assert_eq!(status_rx.borrow().source, SourceKind::None);
        assert_eq!(*level_rx.borrow(), 0.0);

        // Further calls do nothing, and start operations are refused.
        manager.teardown();
        manager.start_microphone().await.unwrap();
        assert_eq!(backend.captures.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn rapid_switching_never_leaks_a_source() {
        let (backend, mut manager, status_rx, _level_rx) = session();

        for _ in 0..3 {
            manager.start_microphone().await.unwrap();
            manager.start_playback().await.unwrap();
            manager.stop_playback();
        }

        assert_eq!(status_rx.borrow().source, SourceKind::None);
        assert!(backend.capture_released());
        assert!(backend.playback_released());

        // Give the level loop tasks a beat, then confirm nothing lingers.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!manager.level_loop.is_running());
    }
}
