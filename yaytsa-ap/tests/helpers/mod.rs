//! Test helpers for yaytsa-ap integration tests
//!
//! - ScriptedLoader: in-memory sources with configurable length and failures
//! - audio_generator: WAV fixtures for the file loader

#![allow(dead_code)]

pub mod audio_generator;
pub mod scripted_loader;

pub use audio_generator::generate_sine_wav;
pub use scripted_loader::ScriptedLoader;

use std::sync::Arc;
use std::time::Duration;
use yaytsa_ap::audio::{Mixer, OfflineBackend};
use yaytsa_ap::{AudioEngine, EngineConfig};

/// Low rate keeps synthetic sources small
pub const TEST_SAMPLE_RATE: u32 = 8_000;

pub fn test_config() -> EngineConfig {
    EngineConfig {
        sample_rate: TEST_SAMPLE_RATE,
        time_update_interval: Duration::from_millis(250),
        ..EngineConfig::default()
    }
}

/// Engine on an offline mixer; audio only advances via [`render`]
pub fn offline_engine(loader: Arc<ScriptedLoader>) -> AudioEngine {
    AudioEngine::new(test_config(), &OfflineBackend::new(), loader)
}

/// Pull `frames` stereo frames through the engine's mixer
pub fn render(mixer: &Mixer, frames: usize) -> Vec<f32> {
    let mut out = vec![0.0; frames * 2];
    mixer.graph().render(&mut out);
    out
}
