//! Preloading and seamless switching between the two channels
//!
//! The standby channel loads the next source ahead of time. A switch starts
//! it (at the requested position), crossfades linearly from the active
//! channel and then swaps the roles of the two channels.

use super::core::{lock, normalize_duration, AudioEngine};
use crate::error::{Error, Result};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, info};
use yaytsa_common::{sanitize_message, FadeCurve};

impl AudioEngine {
    /// Load `url` into the standby channel
    ///
    /// Resolves when the source is playable. Preloading the URL that is
    /// already preloaded (or still preloading) just waits for it.
    pub async fn preload(&self, url: &str) -> Result<()> {
        self.ensure_alive()?;
        let inner = &self.inner;
        let standby = inner.standby();

        let seq = {
            let mut preloaded = lock(&inner.preloaded);
            if preloaded.as_deref() == Some(url) && standby.is_loading_or_holds(url) {
                standby.element().load_seq()
            } else {
                standby.cancel_fade();
                *preloaded = Some(url.to_string());
                debug!("Preloading {}", sanitize_message(url));
                standby.element().set_src(url)
            }
        };

        let result = standby.wait_ready(seq).await;
        if let Err(e) = &result {
            if !e.is_cancelled() {
                let mut preloaded = lock(&inner.preloaded);
                if preloaded.as_deref() == Some(url) {
                    *preloaded = None;
                }
            }
        }
        result
    }

    /// True when `url` is preloaded and playable on the standby channel
    pub fn is_preloaded(&self, url: &str) -> bool {
        lock(&self.inner.preloaded).as_deref() == Some(url) && self.inner.standby().holds(url)
    }

    /// Make the preloaded source the active one
    ///
    /// Waits for the preload, seeks it to `seek_position`, and if the active
    /// channel was playing, starts it silent and crossfades over
    /// `crossfade_ms`. Returns the new active duration (0 when unknown).
    /// Fails with [`Error::NothingPreloaded`] without touching the active
    /// channel when no preload was requested.
    pub async fn seamless_switch(&self, seek_position: f64, crossfade_ms: u64) -> Result<f64> {
        self.ensure_alive()?;
        let inner = &self.inner;
        let url = lock(&inner.preloaded)
            .clone()
            .ok_or(Error::NothingPreloaded)?;

        let token = inner.controls.ticket();
        inner.loads.settle().await;
        let _turn = inner.controls.enter(token).await?;
        self.ensure_alive()?;

        let active_index = inner.active_index();
        let old = &inner.channels[active_index];
        let new = &inner.channels[1 - active_index];

        if let Err(e) = new.wait_ready(new.element().load_seq()).await {
            if !e.is_cancelled() {
                lock(&inner.preloaded).take();
            }
            return Err(e);
        }
        self.ensure_alive()?;

        if seek_position.is_finite() && seek_position > 0.0 {
            new.element().set_current_time(seek_position);
        }

        let was_playing = old.element().is_playing();
        old.cancel_fade();
        let volume = old.element().volume();

        if was_playing {
            new.element().set_volume(0.0);
            new.element().play().await?;

            let duration = Duration::from_millis(crossfade_ms);
            let fade_out = old.fade(volume, 0.0, duration, FadeCurve::Linear);
            let fade_in = new.fade(0.0, volume, duration, FadeCurve::Linear);
            tokio::join!(fade_out.finished(), fade_in.finished());
            self.ensure_alive()?;
        } else {
            new.element().set_volume(volume);
        }

        // Hand over: events follow the new channel from here on
        if let Some(task) = lock(&inner.forwarder).take() {
            task.abort();
        }
        old.cancel_fade();
        old.element().pause();
        old.element().set_volume(volume);
        inner.active.store(1 - active_index, Ordering::SeqCst);
        self.rewire_forwarder();

        {
            let mut preloaded = lock(&inner.preloaded);
            if preloaded.as_deref() == Some(url.as_str()) {
                *preloaded = None;
            }
        }

        let duration = normalize_duration(new.element().duration());
        info!(
            "Switched to {} ({:.1}s, crossfade {}ms)",
            new.element().name(),
            duration,
            if was_playing { crossfade_ms } else { 0 }
        );
        Ok(duration)
    }

    /// Preload `url` and switch to it at the current position
    ///
    /// Used for quality or format changes of the same track. `crossfade_ms`
    /// defaults to the configured switch crossfade.
    pub async fn switch_stream(&self, url: &str, crossfade_ms: Option<u64>) -> Result<f64> {
        self.preload(url).await?;
        let position = self.current_time();
        let crossfade_ms = crossfade_ms.unwrap_or(self.inner.config.switch_crossfade_ms);
        self.seamless_switch(position, crossfade_ms).await
    }
}
