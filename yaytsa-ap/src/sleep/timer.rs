//! Sleep timer state machine
//!
//! ```text
//! Idle ─start─► Music ──(noise = 0)──────────────────────────► Stopped
//!                 │
//!                 └─► CrossfadeToNoise ─► Noise ─(noise faded)─► Stopped
//!
//! cancel() from any running phase ─► Idle
//! ```
//!
//! A 100 ms ticker drives phase deadlines; a 500 ms sampler feeds the
//! loudness estimate during the music phase. Every transition goes through
//! [`SleepTimer::advance`], which only fires if the session and phase are
//! still the ones the caller saw, so a late fade completion can never move a
//! cancelled or restarted session.

use super::config::{SleepTimerConfig, SleepTimerOptions};
use crate::db::settings;
use crate::dsp::loudness::LoudnessEstimate;
use crate::dsp::pink_noise::PinkNoiseSource;
use crate::error::Result;
use crate::playback::engine::AudioEngine;
use crate::playback::fader::FadeOutcome;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Phase deadline check interval
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Output loudness sampling interval (music phase only)
pub const LOUDNESS_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Slack after the noise window before the tick ends the session itself
///
/// The noise fade's own completion normally ends it first.
pub const NOISE_COMPLETION_GRACE: Duration = Duration::from_secs(2);

const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepPhase {
    Idle,
    Music,
    CrossfadeToNoise,
    Noise,
    Stopped,
}

impl SleepPhase {
    /// True while a session is in progress
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            SleepPhase::Music | SleepPhase::CrossfadeToNoise | SleepPhase::Noise
        )
    }
}

impl std::fmt::Display for SleepPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SleepPhase::Idle => "idle",
            SleepPhase::Music => "music",
            SleepPhase::CrossfadeToNoise => "crossfade-to-noise",
            SleepPhase::Noise => "noise",
            SleepPhase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Published on every phase transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseChange {
    pub from: SleepPhase,
    pub to: SleepPhase,
}

/// Snapshot for display
#[derive(Debug, Clone, Serialize)]
pub struct SleepTimerStatus {
    pub phase: SleepPhase,
    pub config: SleepTimerConfig,
    /// Until the end of the whole session
    pub remaining_ms: u64,
    /// Until the end of the current phase
    pub phase_remaining_ms: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub phase_started_at: Option<DateTime<Utc>>,
    pub estimated_loudness: f32,
}

#[derive(Debug, Clone, Copy)]
struct Stamp {
    at: Instant,
    wall: DateTime<Utc>,
}

impl Stamp {
    fn now() -> Self {
        Self {
            at: Instant::now(),
            wall: Utc::now(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.at.elapsed().as_millis() as u64
    }
}

#[derive(Debug)]
struct Session {
    generation: u64,
    phase: SleepPhase,
    config: SleepTimerConfig,
    started: Option<Stamp>,
    phase_started: Option<Stamp>,
    /// Engine volume when the session started; restored on teardown
    saved_volume: f32,
    /// Set when a session ended and its volume is not restored yet
    pending_restore: Option<f32>,
    loudness: LoudnessEstimate,
    ticker: Option<JoinHandle<()>>,
    sampler: Option<JoinHandle<()>>,
}

impl Session {
    fn phase_duration_ms(&self) -> u64 {
        match self.phase {
            SleepPhase::Music => self.config.music_duration_ms,
            SleepPhase::CrossfadeToNoise => self.config.crossfade_duration_ms,
            SleepPhase::Noise => self.config.noise_duration_ms,
            SleepPhase::Idle | SleepPhase::Stopped => 0,
        }
    }

    fn phase_elapsed_ms(&self) -> u64 {
        self.phase_started.map_or(0, |s| s.elapsed_ms())
    }
}

struct TimerInner {
    engine: AudioEngine,
    noise: PinkNoiseSource,
    settings: Option<SqlitePool>,
    /// Config new sessions start from
    defaults: Mutex<SleepTimerConfig>,
    session: Mutex<Session>,
    events: broadcast::Sender<PhaseChange>,
}

/// Music-then-noise sleep timer driving an [`AudioEngine`]
///
/// Cheap to clone. Must be used inside a tokio runtime.
#[derive(Clone)]
pub struct SleepTimer {
    inner: Arc<TimerInner>,
}

impl std::fmt::Debug for SleepTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SleepTimer")
            .field("phase", &self.phase())
            .finish()
    }
}

/// What a tick decided to do
enum Deadline {
    CrossfadeToNoise,
    StopAfterMusic,
    EnterNoise,
    Finish,
}

impl SleepTimer {
    pub fn new(engine: AudioEngine, noise: PinkNoiseSource) -> Self {
        Self::build(engine, noise, None, SleepTimerConfig::default())
    }

    /// Timer that loads and persists its config in the settings table
    pub async fn with_settings(
        engine: AudioEngine,
        noise: PinkNoiseSource,
        pool: SqlitePool,
    ) -> Result<Self> {
        let config = settings::get_sleep_timer_config(&pool).await?;
        Ok(Self::build(engine, noise, Some(pool), config))
    }

    fn build(
        engine: AudioEngine,
        noise: PinkNoiseSource,
        settings: Option<SqlitePool>,
        config: SleepTimerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(TimerInner {
                engine,
                noise,
                settings,
                defaults: Mutex::new(config),
                session: Mutex::new(Session {
                    generation: 0,
                    phase: SleepPhase::Idle,
                    config,
                    started: None,
                    phase_started: None,
                    saved_volume: 1.0,
                    pending_restore: None,
                    loudness: LoudnessEstimate::default(),
                    ticker: None,
                    sampler: None,
                }),
                events,
            }),
        }
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.inner.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn defaults(&self) -> MutexGuard<'_, SleepTimerConfig> {
        self.inner.defaults.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PhaseChange> {
        self.inner.events.subscribe()
    }

    pub fn phase(&self) -> SleepPhase {
        self.session().phase
    }

    /// Current pink noise gain; 0 outside the noise phases
    pub fn noise_volume(&self) -> f32 {
        self.inner.noise.volume()
    }

    /// Config the next session starts from
    pub fn config(&self) -> SleepTimerConfig {
        *self.defaults()
    }

    /// Start a session, replacing any running one
    ///
    /// Fields missing from `options` come from the last used config. The
    /// merged config is persisted when a settings pool is attached.
    pub async fn start(&self, options: SleepTimerOptions) -> Result<()> {
        if self.phase().is_running() {
            self.cancel().await;
        }

        let config = {
            let mut defaults = self.defaults();
            *defaults = defaults.merged(&options);
            *defaults
        };
        if let Some(pool) = &self.inner.settings {
            if let Err(e) = settings::set_sleep_timer_config(pool, &config).await {
                warn!("Failed to persist sleep timer config: {}", e);
            }
        }

        // A teardown still in flight loses to this session; take over its restore
        let leftover = self.session().pending_restore.take();
        if let Some(volume) = leftover {
            if let Err(e) = self.inner.engine.set_volume(volume) {
                debug!("Volume restore skipped: {}", e);
            }
        }

        let saved_volume = self.inner.engine.volume();
        let weak = Arc::downgrade(&self.inner);
        let (generation, from) = {
            let mut st = self.session();
            let from = st.phase;
            st.generation += 1;
            for task in [st.ticker.take(), st.sampler.take()].into_iter().flatten() {
                task.abort();
            }
            st.phase = SleepPhase::Music;
            st.config = config;
            let now = Stamp::now();
            st.started = Some(now);
            st.phase_started = Some(now);
            st.saved_volume = saved_volume;
            st.loudness.reset();
            st.ticker = Some(spawn_periodic(weak.clone(), TICK_INTERVAL, |timer| {
                timer.tick()
            }));
            st.sampler = Some(spawn_periodic(weak, LOUDNESS_SAMPLE_INTERVAL, |timer| {
                timer.sample_loudness()
            }));
            (st.generation, from)
        };

        info!(
            "Sleep timer started: music {}s, crossfade {}s, noise {}s",
            config.music_duration_ms / 1000,
            config.crossfade_duration_ms / 1000,
            config.noise_duration_ms / 1000
        );
        debug!("Sleep session {}", generation);
        self.emit(from, SleepPhase::Music);
        Ok(())
    }

    /// Abandon the session and restore the listener's volume
    ///
    /// Music is resumed if the session had already left the music phase.
    pub async fn cancel(&self) {
        let (generation, phase) = {
            let st = self.session();
            (st.generation, st.phase)
        };
        match phase {
            SleepPhase::Idle => {}
            SleepPhase::Stopped => {
                let _ = self.advance(generation, SleepPhase::Stopped, SleepPhase::Idle);
            }
            running => {
                if let Some(ended) = self.advance(generation, running, SleepPhase::Idle) {
                    info!("Sleep timer cancelled during {}", running);
                    let resume = running != SleepPhase::Music;
                    self.wind_down(ended, false, resume).await;
                }
            }
        }
    }

    /// End the session now: pause music, stop noise, restore volume
    pub async fn stop(&self) {
        let (generation, phase) = {
            let st = self.session();
            (st.generation, st.phase)
        };
        if !phase.is_running() {
            return;
        }
        if let Some(ended) = self.advance(generation, phase, SleepPhase::Stopped) {
            self.wind_down(ended, true, false).await;
        }
    }

    /// Lengthen the music phase; ignored in any other phase
    pub fn extend_time(&self, additional_ms: u64) -> bool {
        let mut st = self.session();
        if st.phase != SleepPhase::Music {
            debug!("extend_time ignored in {} phase", st.phase);
            return false;
        }
        st.config.music_duration_ms += additional_ms;
        info!(
            "Sleep timer extended by {}s (music now {}s)",
            additional_ms / 1000,
            st.config.music_duration_ms / 1000
        );
        true
    }

    pub fn status(&self) -> SleepTimerStatus {
        let st = self.session();
        let running = st.phase.is_running();
        let remaining_ms = match (running, st.started) {
            (true, Some(started)) => st
                .config
                .total_duration_ms()
                .saturating_sub(started.elapsed_ms()),
            _ => 0,
        };
        let phase_remaining_ms = if running {
            st.phase_duration_ms().saturating_sub(st.phase_elapsed_ms())
        } else {
            0
        };
        SleepTimerStatus {
            phase: st.phase,
            config: st.config,
            remaining_ms,
            phase_remaining_ms,
            started_at: st.started.map(|s| s.wall),
            phase_started_at: st.phase_started.map(|s| s.wall),
            estimated_loudness: st.loudness.value(),
        }
    }

    /// Check phase deadlines; called by the ticker
    pub fn tick(&self) {
        let (generation, deadline) = {
            let st = self.session();
            let due = st.phase_elapsed_ms() >= st.phase_duration_ms();
            let deadline = match st.phase {
                SleepPhase::Music if due && st.config.noise_duration_ms == 0 => {
                    Some(Deadline::StopAfterMusic)
                }
                SleepPhase::Music if due => Some(Deadline::CrossfadeToNoise),
                SleepPhase::CrossfadeToNoise if due => Some(Deadline::EnterNoise),
                SleepPhase::Noise
                    if st.phase_elapsed_ms()
                        >= st.phase_duration_ms() + NOISE_COMPLETION_GRACE.as_millis() as u64 =>
                {
                    Some(Deadline::Finish)
                }
                _ => None,
            };
            (st.generation, deadline)
        };

        match deadline {
            Some(Deadline::CrossfadeToNoise) => {
                if self
                    .advance(generation, SleepPhase::Music, SleepPhase::CrossfadeToNoise)
                    .is_some()
                {
                    self.begin_crossfade(generation);
                }
            }
            Some(Deadline::StopAfterMusic) => {
                if let Some(ended) = self.advance(generation, SleepPhase::Music, SleepPhase::Stopped)
                {
                    let timer = self.clone();
                    tokio::spawn(async move { timer.wind_down(ended, true, false).await });
                }
            }
            Some(Deadline::EnterNoise) => {
                if self
                    .advance(generation, SleepPhase::CrossfadeToNoise, SleepPhase::Noise)
                    .is_some()
                {
                    self.begin_noise(generation);
                }
            }
            Some(Deadline::Finish) => {
                debug!("Noise fade overran its window");
                self.finish(generation);
            }
            None => {}
        }
    }

    fn sample_loudness(&self) {
        let level = self.inner.engine.output_level();
        let mut st = self.session();
        if st.phase == SleepPhase::Music {
            st.loudness.update(level);
        }
    }

    /// Move `from` -> `to` if the session is still `generation` in `from`
    ///
    /// Returns the generation after the move. Leaving the running phases
    /// retires the session at once: its tasks, fades and noise are stopped
    /// here, and only the engine pause/restore is left to [`Self::wind_down`].
    fn advance(&self, generation: u64, from: SleepPhase, to: SleepPhase) -> Option<u64> {
        let retiring = from.is_running() && !to.is_running();
        let (current, retired) = {
            let mut st = self.session();
            if st.generation != generation || st.phase != from {
                return None;
            }
            st.phase = to;
            st.phase_started = if to.is_running() {
                Some(Stamp::now())
            } else {
                None
            };
            let retired = if retiring {
                // Outstanding fade completions belong to the old session
                st.generation += 1;
                st.started = None;
                st.pending_restore = Some(st.saved_volume);
                [st.ticker.take(), st.sampler.take()]
            } else {
                [None, None]
            };
            (st.generation, retired)
        };

        for task in retired.into_iter().flatten() {
            task.abort();
        }
        if retiring {
            self.inner.engine.cancel_fade();
            self.inner.noise.dispose();
        }

        info!("Sleep timer: {} -> {}", from, to);
        self.emit(from, to);
        Some(current)
    }

    fn emit(&self, from: SleepPhase, to: SleepPhase) {
        let _ = self.inner.events.send(PhaseChange { from, to });
    }

    fn begin_crossfade(&self, generation: u64) {
        let (noise_target, crossfade) = {
            let mut st = self.session();
            if let Some(sampler) = st.sampler.take() {
                sampler.abort();
            }
            let ui_volume = self.inner.engine.volume();
            (
                st.loudness.noise_target(ui_volume),
                st.config.crossfade_duration_ms,
            )
        };
        debug!("Crossfading to noise at {:.2} over {}ms", noise_target, crossfade);

        let engine = &self.inner.engine;
        let noise = &self.inner.noise;
        if let Err(e) = noise.start(0.0, engine.mixer()) {
            warn!("Pink noise unavailable: {}", e);
        }
        let music_fade = engine
            .fade_volume(engine.volume(), 0.0, crossfade)
            .map_err(|e| warn!("Music fade-out failed: {}", e))
            .ok();
        let noise_fade = noise
            .fade_volume(0.0, noise_target, Duration::from_millis(crossfade))
            .map_err(|e| debug!("Noise fade-in skipped: {}", e))
            .ok();

        let timer = self.clone();
        tokio::spawn(async move {
            let mut completed = true;
            for fade in [music_fade, noise_fade].into_iter().flatten() {
                completed &= fade.finished().await == FadeOutcome::Completed;
            }
            if completed
                && timer
                    .advance(generation, SleepPhase::CrossfadeToNoise, SleepPhase::Noise)
                    .is_some()
            {
                timer.begin_noise(generation);
            }
        });
    }

    fn begin_noise(&self, generation: u64) {
        let timer = self.clone();
        tokio::spawn(async move {
            if let Err(e) = timer.inner.engine.pause().await {
                debug!("Music pause skipped: {}", e);
            }
            let noise_ms = {
                let st = timer.session();
                if st.generation != generation {
                    return;
                }
                st.config.noise_duration_ms
            };
            let noise = &timer.inner.noise;
            let fade = noise.fade_volume(noise.volume(), 0.0, Duration::from_millis(noise_ms));
            match fade {
                Ok(fade) => {
                    if fade.finished().await == FadeOutcome::Completed {
                        timer.finish(generation);
                    }
                }
                Err(e) => debug!("Noise fade-out skipped: {}", e),
            }
        });
    }

    /// Natural end of the noise phase
    fn finish(&self, generation: u64) {
        if let Some(ended) = self.advance(generation, SleepPhase::Noise, SleepPhase::Stopped) {
            let timer = self.clone();
            tokio::spawn(async move { timer.wind_down(ended, true, false).await });
        }
    }

    /// Pause or resume music and restore the saved volume of an ended session
    ///
    /// `ended` is the generation [`Self::advance`] returned; a newer session
    /// makes this a no-op.
    async fn wind_down(&self, ended: u64, pause_music: bool, resume_music: bool) {
        let engine = &self.inner.engine;
        if pause_music {
            if self.session().generation != ended {
                debug!("Stale sleep teardown skipped");
                return;
            }
            if let Err(e) = engine.pause().await {
                debug!("Music pause skipped: {}", e);
            }
        }

        let saved_volume = {
            let mut st = self.session();
            if st.generation != ended {
                debug!("Stale sleep teardown skipped");
                return;
            }
            st.pending_restore.take()
        };
        if let Some(volume) = saved_volume {
            if let Err(e) = engine.set_volume(volume) {
                debug!("Volume restore skipped: {}", e);
            }
        }
        if resume_music {
            if let Err(e) = engine.play().await {
                warn!("Failed to resume music: {}", e);
            }
        }
    }
}

/// Run `f` every `period` while the timer is alive
fn spawn_periodic<F>(weak: Weak<TimerInner>, period: Duration, f: F) -> JoinHandle<()>
where
    F: Fn(&SleepTimer) + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            f(&SleepTimer { inner });
        }
    })
}
