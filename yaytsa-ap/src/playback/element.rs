//! Media element: one source slot feeding the mixer
//!
//! Holds a decoded source, a play head, a volume and a playing flag. Loading
//! runs on the blocking pool and is keyed by a sequence number so a stale
//! load can never overwrite a newer one. Audio is pulled by the mixer through
//! [`RenderSource`]; position and end-of-stream are reported as
//! [`ElementEvent`]s.

use crate::audio::graph::RenderSource;
use crate::audio::loader::SourceLoader;
use crate::audio::types::DecodedAudio;
use crate::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};
use yaytsa_common::sanitize_message;

const EVENT_CAPACITY: usize = 64;

/// Readiness of the current source
#[derive(Debug, Clone, PartialEq)]
pub enum ReadyState {
    /// No source
    Idle,
    Loading,
    /// Enough data to start playback
    Ready,
    /// Load failed (message sanitized)
    Failed(String),
}

/// Readiness tagged with the load it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct LoadStatus {
    pub seq: u64,
    pub state: ReadyState,
}

/// Element notifications
#[derive(Debug, Clone, PartialEq)]
pub enum ElementEvent {
    LoadStart,
    CanPlay,
    Play,
    Pause,
    TimeUpdate { position: f64, duration: f64 },
    Ended,
    Error(String),
}

/// Why `play` did not start playback
#[derive(Debug, Clone, PartialEq)]
pub enum PlayError {
    /// A newer load replaced the source while waiting
    Aborted,
    /// The element has been released
    NotAllowed,
    /// No source set
    NoSource,
    /// The source failed to load
    Failed(String),
}

impl From<PlayError> for Error {
    fn from(e: PlayError) -> Self {
        match e {
            PlayError::Aborted => Error::Cancelled,
            PlayError::NotAllowed => Error::Playback("playback not allowed".to_string()),
            PlayError::NoSource => Error::Playback("no source loaded".to_string()),
            PlayError::Failed(msg) => Error::Load(msg),
        }
    }
}

struct ElementState {
    src: Option<String>,
    audio: Option<DecodedAudio>,
    position: usize,
    playing: bool,
    volume: f32,
    released: bool,
    last_time_update: usize,
}

struct Shared {
    name: &'static str,
    state: Mutex<ElementState>,
    seq: AtomicU64,
    status: watch::Sender<LoadStatus>,
    events: broadcast::Sender<ElementEvent>,
    time_update_frames: usize,
    sample_rate: u32,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ElementState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: ElementEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    /// Advance the play head by up to `left.len()` frames
    fn pull(&self, left: &mut [f32], right: &mut [f32]) {
        let mut st = self.lock();
        if !st.playing {
            return;
        }
        let Some(audio) = st.audio.clone() else {
            return;
        };

        let total = audio.frames();
        let volume = st.volume;
        let mut written = 0;
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let Some(frame) = audio.frame(st.position) else {
                break;
            };
            *l = frame.left * volume;
            *r = frame.right * volume;
            st.position += 1;
            written += 1;
        }

        let duration = audio.duration_seconds();
        let rate = audio.sample_rate as f64;
        if st.position >= total {
            st.playing = false;
            st.last_time_update = st.position;
            self.emit(ElementEvent::TimeUpdate {
                position: duration,
                duration,
            });
            self.emit(ElementEvent::Ended);
            debug!("{}: ended", self.name);
        } else if written > 0
            && st.position.saturating_sub(st.last_time_update) >= self.time_update_frames
        {
            st.last_time_update = st.position;
            self.emit(ElementEvent::TimeUpdate {
                position: st.position as f64 / rate,
                duration,
            });
        }
    }
}

impl RenderSource for Shared {
    fn render(&self, left: &mut [f32], right: &mut [f32], _sample_rate: u32) {
        self.pull(left, right);
    }
}

/// One playback slot
#[derive(Clone)]
pub struct MediaElement {
    shared: Arc<Shared>,
    loader: Arc<dyn SourceLoader>,
}

impl std::fmt::Debug for MediaElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaElement")
            .field("name", &self.shared.name)
            .field("src", &self.src())
            .finish()
    }
}

impl MediaElement {
    pub fn new(
        name: &'static str,
        loader: Arc<dyn SourceLoader>,
        sample_rate: u32,
        time_update_interval: Duration,
    ) -> Self {
        let (status, _) = watch::channel(LoadStatus {
            seq: 0,
            state: ReadyState::Idle,
        });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let time_update_frames =
            ((time_update_interval.as_secs_f64() * sample_rate as f64) as usize).max(1);

        Self {
            shared: Arc::new(Shared {
                name,
                state: Mutex::new(ElementState {
                    src: None,
                    audio: None,
                    position: 0,
                    playing: false,
                    volume: 1.0,
                    released: false,
                    last_time_update: 0,
                }),
                seq: AtomicU64::new(0),
                status,
                events,
                time_update_frames,
                sample_rate,
            }),
            loader,
        }
    }

    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    /// Handle the mixer pulls audio through
    pub fn render_source(&self) -> Arc<dyn RenderSource> {
        self.shared.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ElementEvent> {
        self.shared.events.subscribe()
    }

    pub fn load_status(&self) -> watch::Receiver<LoadStatus> {
        self.shared.status.subscribe()
    }

    /// Current load sequence number
    pub fn load_seq(&self) -> u64 {
        self.shared.seq.load(Ordering::SeqCst)
    }

    /// Replace the source and start loading it
    ///
    /// Returns the sequence number of this load. Must be called inside a
    /// tokio runtime.
    pub fn set_src(&self, url: &str) -> u64 {
        let seq = self.shared.seq.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut st = self.shared.lock();
            if st.released {
                return seq;
            }
            st.src = Some(url.to_string());
            st.audio = None;
            st.position = 0;
            st.last_time_update = 0;
            st.playing = false;
        }
        self.shared.status.send_replace(LoadStatus {
            seq,
            state: ReadyState::Loading,
        });
        self.shared.emit(ElementEvent::LoadStart);
        debug!("{}: loading {}", self.shared.name, sanitize_message(url));

        let shared = Arc::clone(&self.shared);
        let loader = Arc::clone(&self.loader);
        let url = url.to_string();
        tokio::task::spawn_blocking(move || {
            let result = loader.load(&url, shared.sample_rate);
            if shared.seq.load(Ordering::SeqCst) != seq {
                debug!("{}: discarding superseded load {}", shared.name, seq);
                return;
            }
            match result {
                Ok(audio) => {
                    {
                        let mut st = shared.lock();
                        if st.released || shared.seq.load(Ordering::SeqCst) != seq {
                            return;
                        }
                        st.audio = Some(audio);
                    }
                    shared.emit(ElementEvent::CanPlay);
                    shared.status.send_replace(LoadStatus {
                        seq,
                        state: ReadyState::Ready,
                    });
                }
                Err(e) => {
                    let message = sanitize_message(&e.to_string());
                    warn!("{}: load failed: {}", shared.name, message);
                    shared.emit(ElementEvent::Error(message.clone()));
                    shared.status.send_replace(LoadStatus {
                        seq,
                        state: ReadyState::Failed(message),
                    });
                }
            }
        });
        seq
    }

    pub fn src(&self) -> Option<String> {
        self.shared.lock().src.clone()
    }

    /// True when the current source is decoded and playable
    pub fn is_ready(&self) -> bool {
        self.shared.status.borrow().state == ReadyState::Ready
            && self.shared.lock().audio.is_some()
    }

    /// Start playback, waiting for the current load if needed
    pub async fn play(&self) -> Result<(), PlayError> {
        let mut status = self.load_status();
        let seq = self.load_seq();
        loop {
            {
                let current = status.borrow_and_update().clone();
                if current.seq != seq {
                    return Err(PlayError::Aborted);
                }
                match current.state {
                    ReadyState::Ready => break,
                    ReadyState::Failed(msg) => return Err(PlayError::Failed(msg)),
                    ReadyState::Idle => {
                        return Err(if self.shared.lock().released {
                            PlayError::NotAllowed
                        } else {
                            PlayError::NoSource
                        });
                    }
                    ReadyState::Loading => {}
                }
            }
            if status.changed().await.is_err() {
                return Err(PlayError::Aborted);
            }
        }

        let started = {
            let mut st = self.shared.lock();
            if st.released {
                return Err(PlayError::NotAllowed);
            }
            if self.shared.seq.load(Ordering::SeqCst) != seq {
                return Err(PlayError::Aborted);
            }
            let Some(total) = st.audio.as_ref().map(|a| a.frames()) else {
                return Err(PlayError::NoSource);
            };
            if st.position >= total {
                st.position = 0;
                st.last_time_update = 0;
            }
            let was_playing = st.playing;
            st.playing = true;
            !was_playing
        };
        if started {
            self.shared.emit(ElementEvent::Play);
        }
        Ok(())
    }

    pub fn pause(&self) {
        let was_playing = {
            let mut st = self.shared.lock();
            std::mem::replace(&mut st.playing, false)
        };
        if was_playing {
            self.shared.emit(ElementEvent::Pause);
        }
    }

    pub fn is_playing(&self) -> bool {
        self.shared.lock().playing
    }

    /// Play head in seconds
    pub fn current_time(&self) -> f64 {
        let st = self.shared.lock();
        match &st.audio {
            Some(audio) if audio.sample_rate > 0 => st.position as f64 / audio.sample_rate as f64,
            _ => 0.0,
        }
    }

    /// Move the play head; clamped to the source. Ignored without a source.
    pub fn set_current_time(&self, seconds: f64) {
        let event = {
            let mut st = self.shared.lock();
            let Some(audio) = st.audio.clone() else {
                return;
            };
            let frame = (seconds.max(0.0) * audio.sample_rate as f64) as usize;
            st.position = frame.min(audio.frames());
            st.last_time_update = st.position;
            ElementEvent::TimeUpdate {
                position: st.position as f64 / audio.sample_rate as f64,
                duration: audio.duration_seconds(),
            }
        };
        self.shared.emit(event);
    }

    /// Source duration in seconds; NaN while unknown
    pub fn duration(&self) -> f64 {
        self.shared
            .lock()
            .audio
            .as_ref()
            .map(|a| a.duration_seconds())
            .unwrap_or(f64::NAN)
    }

    pub fn volume(&self) -> f32 {
        self.shared.lock().volume
    }

    /// Set volume, clamped to [0, 1]
    pub fn set_volume(&self, volume: f32) {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        self.shared.lock().volume = volume;
    }

    /// Advance the play head without audio output (no mixer available)
    pub fn advance(&self, frames: usize) {
        const CHUNK: usize = 1024;
        let mut left = [0.0f32; CHUNK];
        let mut right = [0.0f32; CHUNK];
        let mut remaining = frames;
        while remaining > 0 {
            let n = remaining.min(CHUNK);
            self.shared.pull(&mut left[..n], &mut right[..n]);
            remaining -= n;
        }
    }

    /// Stop and drop the source; cancels any in-flight load
    pub fn release(&self) {
        self.shared.seq.fetch_add(1, Ordering::SeqCst);
        {
            let mut st = self.shared.lock();
            st.released = true;
            st.playing = false;
            st.audio = None;
            st.src = None;
            st.position = 0;
        }
        let seq = self.load_seq();
        self.shared.status.send_replace(LoadStatus {
            seq,
            state: ReadyState::Idle,
        });
    }

    pub fn is_released(&self) -> bool {
        self.shared.lock().released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;

    struct ConstLoader {
        frames: usize,
    }

    impl SourceLoader for ConstLoader {
        fn load(&self, url: &str, sample_rate: u32) -> Result<DecodedAudio> {
            if url.contains("bad") {
                return Err(Error::Load(format!("cannot open {}", url)));
            }
            Ok(DecodedAudio::new(vec![0.5; self.frames * 2], sample_rate))
        }
    }

    fn element(frames: usize) -> MediaElement {
        MediaElement::new(
            "test",
            Arc::new(ConstLoader { frames }),
            1_000,
            Duration::from_millis(250),
        )
    }

    #[tokio::test]
    async fn test_load_then_play() {
        let el = element(2_000);
        assert!(el.duration().is_nan());
        el.set_src("a.wav");
        el.play().await.unwrap();
        assert!(el.is_playing());
        assert!((el.duration() - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failed_load_reports_sanitized_error() {
        let el = element(10);
        el.set_src("bad.wav?api_key=hunter2");
        let err = el.play().await.unwrap_err();
        match err {
            PlayError::Failed(msg) => assert!(!msg.contains("hunter2"), "{}", msg),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_play_without_source() {
        let el = element(10);
        assert_eq!(el.play().await, Err(PlayError::NoSource));
    }

    #[tokio::test]
    async fn test_volume_is_clamped() {
        let el = element(10);
        el.set_volume(-0.3);
        assert_eq!(el.volume(), 0.0);
        el.set_volume(1.7);
        assert_eq!(el.volume(), 1.0);
    }

    #[tokio::test]
    async fn test_render_applies_volume_and_emits_events() {
        let el = element(600);
        let mut events = el.subscribe();
        el.set_src("a.wav");
        el.play().await.unwrap();
        el.set_volume(0.5);

        let mut left = [0.0f32; 300];
        let mut right = [0.0f32; 300];
        el.render_source().render(&mut left, &mut right, 1_000);
        assert!((left[0] - 0.25).abs() < 1e-6);
        assert!((el.current_time() - 0.3).abs() < 1e-9);

        el.advance(300);
        assert!(!el.is_playing());

        let mut seen = Vec::new();
        while let Ok(e) = events.try_recv() {
            seen.push(e);
        }
        assert!(seen.contains(&ElementEvent::CanPlay));
        assert!(seen.contains(&ElementEvent::Play));
        assert_eq!(seen.last(), Some(&ElementEvent::Ended));
        assert!(seen
            .iter()
            .any(|e| matches!(e, ElementEvent::TimeUpdate { .. })));
    }

    #[tokio::test]
    async fn test_seek_clamps() {
        let el = element(1_000);
        el.set_src("a.wav");
        el.play().await.unwrap();
        el.set_current_time(5.0);
        assert!((el.current_time() - 1.0).abs() < 1e-9);
        el.set_current_time(0.25);
        assert!((el.current_time() - 0.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_release_blocks_play() {
        let el = element(100);
        el.set_src("a.wav");
        el.play().await.unwrap();
        el.release();
        assert!(!el.is_playing());
        assert_eq!(el.play().await, Err(PlayError::NotAllowed));
    }
}
