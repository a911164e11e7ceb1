//! Core audio engine - construction, transport controls and disposal
//!
//! **Responsibilities:**
//! - Mixer setup: both channels feed one bus, then the level analyser, then
//!   the output
//! - Degraded mode when no mixer can be opened: elements are clocked by a
//!   timer task instead of the output device
//! - Load / play / pause / seek / volume on the active channel
//! - Dispose
//!
//! Loads run on a supersede queue: a new load cancels the one in flight.
//! Play, pause and switches run on a FIFO control queue and wait for pending
//! loads first, so a pause can never overtake the load it depends on.

use super::karaoke::KaraokeState;
use crate::audio::backend::{AudioBackend, Mixer};
use crate::audio::graph::{AudioGraph, GraphState, LevelMeter, NodeId};
use crate::audio::loader::SourceLoader;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::playback::channel::PlaybackChannel;
use crate::playback::element::{MediaElement, PlayError};
use crate::playback::fader::FadeHandle;
use crate::playback::serial::OperationQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use yaytsa_common::{sanitize_message, FadeCurve, PlaybackState, PlayerEvent};

const EVENT_CAPACITY: usize = 256;

/// Tick of the fallback clock used without a mixer
const FALLBACK_CLOCK_TICK: Duration = Duration::from_millis(20);

pub(super) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Mixer nodes owned by the engine
#[derive(Debug, Clone)]
pub(super) struct Routing {
    pub(super) mixer: Arc<Mixer>,
    pub(super) bus: NodeId,
    pub(super) analyser: NodeId,
    pub(super) meter: LevelMeter,
}

pub(super) struct EngineInner {
    pub(super) config: EngineConfig,
    pub(super) routing: Option<Routing>,
    pub(super) channels: [PlaybackChannel; 2],
    pub(super) active: AtomicUsize,
    pub(super) loads: OperationQueue,
    pub(super) controls: OperationQueue,
    /// URL requested for the standby channel
    pub(super) preloaded: Mutex<Option<String>>,
    pub(super) karaoke: Mutex<KaraokeState>,
    pub(super) events: broadcast::Sender<PlayerEvent>,
    pub(super) forwarder: Mutex<Option<JoinHandle<()>>>,
    clock: Mutex<Option<JoinHandle<()>>>,
    pub(super) disposed: watch::Sender<bool>,
}

impl EngineInner {
    pub(super) fn active_index(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub(super) fn active(&self) -> &PlaybackChannel {
        &self.channels[self.active_index()]
    }

    pub(super) fn standby(&self) -> &PlaybackChannel {
        &self.channels[1 - self.active_index()]
    }

    pub(super) fn graph(&self) -> Option<&AudioGraph> {
        self.routing.as_ref().map(|r| r.mixer.graph())
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        for task in [&self.forwarder, &self.clock] {
            if let Some(task) = lock(task).take() {
                task.abort();
            }
        }
    }
}

/// Dual-channel audio engine
///
/// Cheap to clone; clones share the same engine. Must be created and used
/// inside a tokio runtime.
#[derive(Clone)]
pub struct AudioEngine {
    pub(super) inner: Arc<EngineInner>,
}

impl std::fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEngine")
            .field("active", &self.inner.active_index())
            .field("mixer", &self.inner.routing.as_ref().map(|r| r.mixer.backend_name()))
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Wire both channels through bus and analyser to the destination
fn build_routing(
    mixer: &Arc<Mixer>,
    elements: &[MediaElement; 2],
) -> Result<(Routing, [PlaybackChannel; 2])> {
    let graph = mixer.graph();
    let bus = graph.create_gain(1.0)?;
    let (analyser, meter) = graph.create_analyser()?;
    graph.connect(bus, analyser)?;
    graph.connect(analyser, graph.destination())?;

    let primary = PlaybackChannel::wired(elements[0].clone(), graph, bus)?;
    let secondary = PlaybackChannel::wired(elements[1].clone(), graph, bus)?;

    Ok((
        Routing {
            mixer: Arc::clone(mixer),
            bus,
            analyser,
            meter,
        },
        [primary, secondary],
    ))
}

/// Advance both elements in real time when nothing pulls audio
fn spawn_fallback_clock(inner: Weak<EngineInner>, sample_rate: u32) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(FALLBACK_CLOCK_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = Instant::now();
        let mut carry = 0.0f64;
        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let now = Instant::now();
            let exact = (now - last).as_secs_f64() * sample_rate as f64 + carry;
            let frames = exact.floor();
            carry = exact - frames;
            last = now;
            for channel in &inner.channels {
                channel.element().advance(frames as usize);
            }
        }
    })
}

impl AudioEngine {
    /// Open a mixer on `backend` and build the engine
    ///
    /// A backend that cannot open leaves the engine in degraded mode:
    /// playback still runs (clocked by a timer) but nothing is audible and
    /// karaoke is unavailable.
    pub fn new(
        config: EngineConfig,
        backend: &dyn AudioBackend,
        loader: Arc<dyn SourceLoader>,
    ) -> Self {
        let mixer = match Mixer::open(backend, config.sample_rate) {
            Ok(mixer) => Some(mixer),
            Err(e) => {
                warn!(
                    "{} output unavailable, continuing without a mixer: {}",
                    backend.name(),
                    e
                );
                None
            }
        };
        Self::with_mixer(config, mixer, loader)
    }

    /// Build the engine on an already opened mixer (or none)
    ///
    /// The engine takes ownership of the mixer and closes it on dispose.
    pub fn with_mixer(
        config: EngineConfig,
        mixer: Option<Arc<Mixer>>,
        loader: Arc<dyn SourceLoader>,
    ) -> Self {
        let sample_rate = mixer
            .as_ref()
            .map_or(config.sample_rate, |m| m.sample_rate());
        let elements = [
            MediaElement::new(
                "primary",
                Arc::clone(&loader),
                sample_rate,
                config.time_update_interval,
            ),
            MediaElement::new("secondary", loader, sample_rate, config.time_update_interval),
        ];

        let wired = mixer.map(|mixer| match build_routing(&mixer, &elements) {
            Ok(wired) => Ok(wired),
            Err(e) => {
                mixer.close();
                Err(e)
            }
        });
        let (routing, channels) = match wired {
            Some(Ok((routing, channels))) => (Some(routing), channels),
            other => {
                if let Some(Err(e)) = other {
                    warn!("Mixer setup failed, continuing without a mixer: {}", e);
                }
                let [primary, secondary] = elements;
                (
                    None,
                    [
                        PlaybackChannel::detached(primary),
                        PlaybackChannel::detached(secondary),
                    ],
                )
            }
        };

        let degraded = routing.is_none();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (disposed, _) = watch::channel(false);
        let engine = Self {
            inner: Arc::new(EngineInner {
                config,
                routing,
                channels,
                active: AtomicUsize::new(0),
                loads: OperationQueue::new("loads"),
                controls: OperationQueue::new("controls"),
                preloaded: Mutex::new(None),
                karaoke: Mutex::new(KaraokeState::default()),
                events,
                forwarder: Mutex::new(None),
                clock: Mutex::new(None),
                disposed,
            }),
        };

        if degraded {
            let clock = spawn_fallback_clock(Arc::downgrade(&engine.inner), sample_rate);
            *lock(&engine.inner.clock) = Some(clock);
        }
        engine.rewire_forwarder();

        info!(
            "Audio engine ready ({} Hz, {})",
            sample_rate,
            engine
                .inner
                .routing
                .as_ref()
                .map_or("no mixer", |r| r.mixer.backend_name())
        );
        engine
    }

    pub(super) fn ensure_alive(&self) -> Result<()> {
        if self.is_disposed() {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Load `url` into the active channel
    ///
    /// Resolves once the source is playable. A newer load supersedes this
    /// one, which then fails with [`Error::Cancelled`]. Loading the URL the
    /// active channel already holds is a no-op.
    pub async fn load(&self, url: &str) -> Result<()> {
        self.ensure_alive()?;
        let inner = &self.inner;
        let token = inner.loads.supersede();
        let _turn = inner.loads.enter(token).await?;
        self.ensure_alive()?;

        let channel = inner.active();
        if channel.holds(url) {
            debug!("Already loaded: {}", sanitize_message(url));
            return Ok(());
        }

        self.emit(PlayerEvent::LoadingStateChanged { loading: true });
        let seq = channel.element().set_src(url);
        let result = tokio::select! {
            result = channel.wait_ready(seq) => result,
            _ = inner.loads.superseded(token) => Err(Error::Cancelled),
        };

        match &result {
            Ok(()) => debug!("Loaded {}", sanitize_message(url)),
            Err(e) if e.is_cancelled() => {
                debug!("Load superseded: {}", sanitize_message(url));
                return result;
            }
            Err(e) => warn!("Load failed: {}", e),
        }
        self.emit(PlayerEvent::LoadingStateChanged { loading: false });
        result
    }

    /// Start the active channel
    ///
    /// Waits for pending loads. Resumes a suspended mixer first. A play that
    /// is interrupted by a newer load resolves quietly.
    pub async fn play(&self) -> Result<()> {
        self.ensure_alive()?;
        let inner = &self.inner;
        let token = inner.controls.ticket();
        inner.loads.settle().await;
        let _turn = inner.controls.enter(token).await?;
        self.ensure_alive()?;

        if let Some(routing) = &inner.routing {
            if routing.mixer.state() == GraphState::Suspended {
                routing.mixer.resume()?;
            }
        }

        match inner.active().element().play().await {
            Ok(()) => Ok(()),
            Err(PlayError::Aborted) | Err(PlayError::NotAllowed) => {
                debug!("Play interrupted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn pause(&self) -> Result<()> {
        self.ensure_alive()?;
        let inner = &self.inner;
        let token = inner.controls.ticket();
        inner.loads.settle().await;
        let _turn = inner.controls.enter(token).await?;
        self.ensure_alive()?;

        inner.active().element().pause();
        Ok(())
    }

    /// Move the play head; clamped to the duration when known
    pub fn seek(&self, seconds: f64) -> Result<()> {
        self.ensure_alive()?;
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(Error::InvalidPosition(seconds));
        }
        let duration = self.duration();
        let target = if duration > 0.0 {
            seconds.min(duration)
        } else {
            seconds
        };
        self.inner.active().element().set_current_time(target);
        Ok(())
    }

    /// Set the active channel volume (clamped to [0, 1])
    ///
    /// Cancels a running engine fade.
    pub fn set_volume(&self, volume: f32) -> Result<()> {
        self.ensure_alive()?;
        let channel = self.inner.active();
        channel.cancel_fade();
        channel.element().set_volume(volume);
        Ok(())
    }

    pub fn volume(&self) -> f32 {
        self.inner.active().element().volume()
    }

    /// Fade the active channel volume, replacing any running engine fade
    pub fn fade_volume(&self, from: f32, to: f32, duration_ms: u64) -> Result<FadeHandle> {
        self.ensure_alive()?;
        Ok(self.inner.active().fade(
            from,
            to,
            Duration::from_millis(duration_ms),
            FadeCurve::EaseInOut,
        ))
    }

    /// Stop any engine fade where it is
    pub fn cancel_fade(&self) {
        for channel in &self.inner.channels {
            channel.cancel_fade();
        }
    }

    pub fn current_time(&self) -> f64 {
        self.inner.active().element().current_time()
    }

    /// Duration of the active source; 0 while unknown
    pub fn duration(&self) -> f64 {
        normalize_duration(self.inner.active().element().duration())
    }

    pub fn is_playing(&self) -> bool {
        self.inner.active().element().is_playing()
    }

    pub fn playback_state(&self) -> PlaybackState {
        if self.is_playing() {
            PlaybackState::Playing
        } else {
            PlaybackState::Paused
        }
    }

    /// Source of the active channel
    pub fn current_src(&self) -> Option<String> {
        self.inner.active().element().src()
    }

    /// RMS of the mixed output; 0 without a mixer
    pub fn output_level(&self) -> f32 {
        self.inner.routing.as_ref().map_or(0.0, |r| r.meter.rms())
    }

    /// The engine's mixer, for sharing with other sources
    pub fn mixer(&self) -> Option<Arc<Mixer>> {
        self.inner.routing.as_ref().map(|r| Arc::clone(&r.mixer))
    }

    /// True when running without a mixer
    pub fn is_degraded(&self) -> bool {
        self.inner.routing.is_none()
    }

    pub fn is_disposed(&self) -> bool {
        *self.inner.disposed.borrow()
    }

    pub(super) fn emit(&self, event: PlayerEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    /// Release every resource; safe to call repeatedly
    ///
    /// Cancels queued and running operations and fades, stops both channels,
    /// tears down karaoke and closes the mixer. Control methods fail with
    /// [`Error::Disposed`] afterwards.
    pub fn dispose(&self) {
        let inner = &self.inner;
        if inner.disposed.send_replace(true) {
            return;
        }
        info!("Disposing audio engine");

        inner.loads.cancel_all();
        inner.controls.cancel_all();
        for task in [&inner.forwarder, &inner.clock] {
            if let Some(task) = lock(task).take() {
                task.abort();
            }
        }

        self.dispose_karaoke();
        lock(&inner.preloaded).take();

        let graph = inner.graph();
        for channel in &inner.channels {
            channel.release(graph);
        }
        if let Some(routing) = &inner.routing {
            let graph = routing.mixer.graph();
            graph.remove(routing.analyser);
            graph.remove(routing.bus);
            routing.mixer.close();
        }
    }
}

pub(super) fn normalize_duration(duration: f64) -> f64 {
    if duration.is_finite() && duration > 0.0 {
        duration
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_duration() {
        assert_eq!(normalize_duration(f64::NAN), 0.0);
        assert_eq!(normalize_duration(-3.0), 0.0);
        assert_eq!(normalize_duration(f64::INFINITY), 0.0);
        assert_eq!(normalize_duration(12.5), 12.5);
    }
}
