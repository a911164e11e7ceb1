//! yaytsa-ap engine configuration

use std::time::Duration;
use yaytsa_common::config::TomlConfig;

/// Mixer sample rate used when nothing else is configured
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Default seamless-switch crossfade
pub const DEFAULT_SWITCH_CROSSFADE_MS: u64 = 150;

/// Audio engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Mixer sample rate; sources are resampled to it on load
    pub sample_rate: u32,

    /// Played-audio interval between time-update events
    pub time_update_interval: Duration,

    /// Crossfade used by `switch_stream`
    pub switch_crossfade_ms: u64,

    /// Output device name (None = system default)
    pub device: Option<String>,

    /// Requested device buffer size in frames
    pub buffer_size: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            time_update_interval: Duration::from_millis(250),
            switch_crossfade_ms: DEFAULT_SWITCH_CROSSFADE_MS,
            device: None,
            buffer_size: None,
        }
    }
}

impl From<&TomlConfig> for EngineConfig {
    fn from(toml: &TomlConfig) -> Self {
        let defaults = Self::default();
        Self {
            sample_rate: if toml.sample_rate > 0 {
                toml.sample_rate
            } else {
                defaults.sample_rate
            },
            time_update_interval: if toml.time_update_interval_ms > 0 {
                Duration::from_millis(toml.time_update_interval_ms)
            } else {
                defaults.time_update_interval
            },
            switch_crossfade_ms: toml.crossfade_ms,
            device: toml.audio_device.clone(),
            buffer_size: toml.buffer_size,
        }
    }
}
