//! Looping pink noise for the sleep timer
//!
//! Noise is generated once per start with Paul Kellet's refined filter
//! (approximately -3 dB/octave) into a two-second buffer that loops through a
//! gain node. The source either plays on a mixer it is given or opens its
//! own; only an owned mixer is closed on dispose.

use crate::audio::backend::{AudioBackend, Mixer};
use crate::audio::graph::{AudioGraph, GraphState, NodeId};
use crate::audio::types::DecodedAudio;
use crate::error::{Error, Result};
use crate::playback::fader::{FadeHandle, FadeSlot, GainTarget};
use rand::Rng;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};
use yaytsa_common::FadeCurve;

/// Length of the looped noise buffer
pub const NOISE_BUFFER_SECONDS: u32 = 2;

/// Generate `NOISE_BUFFER_SECONDS` of mono pink noise
pub fn generate_pink_noise<R: Rng + ?Sized>(sample_rate: u32, rng: &mut R) -> Vec<f32> {
    let len = (sample_rate * NOISE_BUFFER_SECONDS) as usize;
    let mut out = Vec::with_capacity(len);
    let (mut b0, mut b1, mut b2, mut b3, mut b4, mut b5, mut b6) =
        (0.0f32, 0.0f32, 0.0f32, 0.0f32, 0.0f32, 0.0f32, 0.0f32);

    for _ in 0..len {
        let white: f32 = rng.gen_range(-1.0..1.0);
        b0 = 0.99886 * b0 + white * 0.0555179;
        b1 = 0.99332 * b1 + white * 0.0750759;
        b2 = 0.96900 * b2 + white * 0.1538520;
        b3 = 0.86650 * b3 + white * 0.3104856;
        b4 = 0.55000 * b4 + white * 0.5329522;
        b5 = -0.7616 * b5 - white * 0.0168980;
        out.push((b0 + b1 + b2 + b3 + b4 + b5 + b6 + white * 0.5362) * 0.11);
        b6 = white * 0.115926;
    }
    out
}

struct Playing {
    mixer: Arc<Mixer>,
    source: NodeId,
    gain: NodeId,
}

#[derive(Default)]
struct NoiseState {
    /// Mixer opened by this source, kept across stop/start
    owned: Option<Arc<Mixer>>,
    playing: Option<Playing>,
}

/// Pink noise generator bound to a mixer
pub struct PinkNoiseSource {
    backend: Arc<dyn AudioBackend>,
    sample_rate: u32,
    state: Mutex<NoiseState>,
    fades: FadeSlot,
}

impl std::fmt::Debug for PinkNoiseSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinkNoiseSource")
            .field("backend", &self.backend.name())
            .field("sample_rate", &self.sample_rate)
            .field("playing", &self.is_playing())
            .finish()
    }
}

impl PinkNoiseSource {
    /// `backend` is used only when `start` is not handed a mixer
    pub fn new(backend: Arc<dyn AudioBackend>, sample_rate: u32) -> Self {
        Self {
            backend,
            sample_rate,
            state: Mutex::new(NoiseState::default()),
            fades: FadeSlot::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NoiseState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start looping noise at `initial_volume`
    ///
    /// Plays on `shared` when given, otherwise on a mixer this source owns.
    /// Restarting replaces the previous noise buffer.
    pub fn start(&self, initial_volume: f32, shared: Option<Arc<Mixer>>) -> Result<()> {
        self.stop();

        let mixer = match shared {
            Some(mixer) => {
                // A shared mixer makes an owned one redundant
                if let Some(owned) = self.lock().owned.take() {
                    owned.close();
                }
                mixer
            }
            None => {
                let existing = self.lock().owned.clone();
                match existing {
                    Some(owned) if !owned.is_closed() => owned,
                    _ => {
                        let owned = Mixer::open(self.backend.as_ref(), self.sample_rate)?;
                        self.lock().owned = Some(Arc::clone(&owned));
                        owned
                    }
                }
            }
        };

        if mixer.is_closed() {
            return Err(Error::AudioOutput("mixer is closed".to_string()));
        }
        if mixer.state() == GraphState::Suspended {
            mixer.resume()?;
        }

        let graph = mixer.graph();
        let rate = mixer.sample_rate();
        let mono = generate_pink_noise(rate, &mut rand::thread_rng());
        let stereo: Vec<f32> = mono.iter().flat_map(|&s| [s, s]).collect();

        let gain = graph.create_gain(clamp_volume(initial_volume))?;
        let source = match build_source(graph, gain, DecodedAudio::new(stereo, rate)) {
            Ok(source) => source,
            Err(e) => {
                graph.remove(gain);
                return Err(e);
            }
        };

        info!("Pink noise started at volume {:.2}", clamp_volume(initial_volume));
        self.lock().playing = Some(Playing {
            mixer,
            source,
            gain,
        });
        Ok(())
    }

    /// Stop the noise and remove its nodes; keeps an owned mixer open
    pub fn stop(&self) {
        self.fades.cancel();
        let playing = self.lock().playing.take();
        if let Some(playing) = playing {
            let graph = playing.mixer.graph();
            if let Err(e) = graph.stop_source(playing.source) {
                debug!("Noise source already gone: {}", e);
            }
            graph.remove(playing.source);
            graph.remove(playing.gain);
            debug!("Pink noise stopped");
        }
    }

    pub fn is_playing(&self) -> bool {
        self.lock().playing.is_some()
    }

    /// Current noise gain; 0 when stopped
    pub fn volume(&self) -> f32 {
        match &self.lock().playing {
            Some(p) => p.mixer.graph().gain(p.gain).unwrap_or(0.0),
            None => 0.0,
        }
    }

    /// Set the noise gain, clamped to [0, 1]; ignored when stopped
    pub fn set_volume(&self, volume: f32) {
        if let Some(p) = &self.lock().playing {
            if let Err(e) = p.mixer.graph().set_gain(p.gain, clamp_volume(volume)) {
                warn!("Failed to set noise volume: {}", e);
            }
        }
    }

    /// Fade the noise gain with an ease-in-out curve
    pub fn fade_volume(&self, from: f32, to: f32, duration: Duration) -> Result<FadeHandle> {
        let target = self.gain_target().ok_or_else(|| {
            Error::InvalidState("pink noise is not playing".to_string())
        })?;
        Ok(self
            .fades
            .start(target, from, to, duration, FadeCurve::EaseInOut))
    }

    pub fn cancel_fade(&self) {
        self.fades.cancel();
    }

    fn gain_target(&self) -> Option<GainTarget> {
        self.lock()
            .playing
            .as_ref()
            .map(|p| GainTarget::new(p.mixer.graph().clone(), p.gain))
    }

    /// Stop and close an owned mixer; safe to call repeatedly
    pub fn dispose(&self) {
        self.stop();
        if let Some(owned) = self.lock().owned.take() {
            owned.close();
            debug!("Pink noise mixer closed");
        }
    }
}

impl Drop for PinkNoiseSource {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

fn build_source(graph: &AudioGraph, gain: NodeId, buffer: DecodedAudio) -> Result<NodeId> {
    let source = graph.create_buffer_source(buffer, true)?;
    let wired = graph
        .connect(source, gain)
        .and_then(|_| graph.connect(gain, graph.destination()))
        .and_then(|_| graph.start_source(source));
    if let Err(e) = wired {
        graph.remove(source);
        return Err(e);
    }
    Ok(source)
}
