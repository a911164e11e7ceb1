//! Karaoke mode on the engine bus
//!
//! The vocal-removal processor is built on first use and inserted between
//! the channel bus and the output analyser, so it covers both channels and
//! survives seamless switches.

use super::core::{lock, AudioEngine};
use crate::dsp::vocal_removal::{clamp_cutoff, VocalRemovalProcessor, DEFAULT_BASS_CUTOFF_HZ};
use crate::error::{Error, Result};
use tracing::{debug, warn};

#[derive(Debug)]
pub(super) struct KaraokeState {
    processor: Option<VocalRemovalProcessor>,
    cutoff: f64,
}

impl Default for KaraokeState {
    fn default() -> Self {
        Self {
            processor: None,
            cutoff: DEFAULT_BASS_CUTOFF_HZ,
        }
    }
}

impl AudioEngine {
    /// Turn vocal removal on or off
    ///
    /// Resolves when the click-free routing switch has finished. Without a
    /// mixer this only logs a warning.
    pub async fn set_karaoke_mode(&self, enabled: bool) -> Result<()> {
        self.ensure_alive()?;
        let Some(routing) = self.inner.routing.as_ref() else {
            warn!("Karaoke mode unavailable without an audio mixer");
            return Ok(());
        };

        let transition = {
            let mut karaoke = lock(&self.inner.karaoke);
            if karaoke.processor.is_none() {
                if !enabled {
                    return Ok(());
                }
                let graph = routing.mixer.graph();
                let processor = VocalRemovalProcessor::new(graph.clone());
                processor.set_bass_preservation_cutoff(karaoke.cutoff)?;

                graph.disconnect_from(routing.bus, routing.analyser);
                if let Err(e) = processor.connect(routing.bus, routing.analyser) {
                    graph.connect(routing.bus, routing.analyser)?;
                    return Err(e);
                }
                debug!("Karaoke processor inserted");
                karaoke.processor = Some(processor);
            }
            karaoke
                .processor
                .as_ref()
                .map(|processor| processor.set_enabled(enabled))
        };

        if let Some(transition) = transition {
            transition
                .await
                .map_err(|e| Error::Internal(format!("karaoke transition failed: {}", e)))?;
        }
        debug!("Karaoke mode {}", if enabled { "on" } else { "off" });
        Ok(())
    }

    /// Requested karaoke state
    pub fn is_karaoke_enabled(&self) -> bool {
        lock(&self.inner.karaoke)
            .processor
            .as_ref()
            .map_or(false, |p| p.is_enabled())
    }

    /// Set the bass preservation crossover; clamped to 50-300 Hz
    pub fn set_karaoke_bass_cutoff(&self, hz: f64) -> Result<()> {
        self.ensure_alive()?;
        let mut karaoke = lock(&self.inner.karaoke);
        karaoke.cutoff = clamp_cutoff(hz);
        if let Some(processor) = &karaoke.processor {
            processor.set_bass_preservation_cutoff(karaoke.cutoff)?;
        }
        Ok(())
    }

    pub fn karaoke_bass_cutoff(&self) -> f64 {
        lock(&self.inner.karaoke).cutoff
    }

    /// Remove the processor and restore the direct bus connection
    pub(super) fn dispose_karaoke(&self) {
        let processor = lock(&self.inner.karaoke).processor.take();
        if let Some(processor) = processor {
            processor.dispose();
            if let Some(routing) = &self.inner.routing {
                if let Err(e) = routing.mixer.graph().connect(routing.bus, routing.analyser) {
                    debug!("Bus reconnect skipped: {}", e);
                }
            }
        }
    }
}
