//! Sleep timer durations and presets

use serde::{Deserialize, Serialize};
use std::str::FromStr;

const MINUTE_MS: u64 = 60_000;

/// Phase durations of one sleep session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepTimerConfig {
    /// Music before the crossfade starts
    pub music_duration_ms: u64,
    /// Noise after the crossfade; 0 stops right after the music
    pub noise_duration_ms: u64,
    /// Music-to-noise crossfade
    pub crossfade_duration_ms: u64,
}

impl Default for SleepTimerConfig {
    fn default() -> Self {
        Self {
            music_duration_ms: 30 * MINUTE_MS,
            noise_duration_ms: 15 * MINUTE_MS,
            crossfade_duration_ms: 30_000,
        }
    }
}

impl SleepTimerConfig {
    /// Whole session length
    pub fn total_duration_ms(&self) -> u64 {
        if self.noise_duration_ms == 0 {
            self.music_duration_ms
        } else {
            self.music_duration_ms + self.crossfade_duration_ms + self.noise_duration_ms
        }
    }

    /// This config with every field set in `options` replaced
    pub fn merged(&self, options: &SleepTimerOptions) -> Self {
        Self {
            music_duration_ms: options.music_duration_ms.unwrap_or(self.music_duration_ms),
            noise_duration_ms: options.noise_duration_ms.unwrap_or(self.noise_duration_ms),
            crossfade_duration_ms: options
                .crossfade_duration_ms
                .unwrap_or(self.crossfade_duration_ms),
        }
    }
}

/// Partial config passed to `start`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepTimerOptions {
    pub music_duration_ms: Option<u64>,
    pub noise_duration_ms: Option<u64>,
    pub crossfade_duration_ms: Option<u64>,
}

impl SleepTimerOptions {
    pub fn minutes(music: u64, noise: u64) -> Self {
        Self {
            music_duration_ms: Some(music * MINUTE_MS),
            noise_duration_ms: Some(noise * MINUTE_MS),
            crossfade_duration_ms: None,
        }
    }
}

/// Built-in session shapes
///
/// Plain presets stop when the music ends; drift presets fade into noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SleepTimerPreset {
    Minutes15,
    Minutes30,
    Minutes45,
    Minutes60,
    Drift20,
    Drift45,
    Night,
}

impl SleepTimerPreset {
    pub const ALL: [SleepTimerPreset; 7] = [
        SleepTimerPreset::Minutes15,
        SleepTimerPreset::Minutes30,
        SleepTimerPreset::Minutes45,
        SleepTimerPreset::Minutes60,
        SleepTimerPreset::Drift20,
        SleepTimerPreset::Drift45,
        SleepTimerPreset::Night,
    ];

    /// (music minutes, noise minutes)
    fn minutes(&self) -> (u64, u64) {
        match self {
            SleepTimerPreset::Minutes15 => (15, 0),
            SleepTimerPreset::Minutes30 => (30, 0),
            SleepTimerPreset::Minutes45 => (45, 0),
            SleepTimerPreset::Minutes60 => (60, 0),
            SleepTimerPreset::Drift20 => (20, 10),
            SleepTimerPreset::Drift45 => (45, 15),
            SleepTimerPreset::Night => (60, 30),
        }
    }

    pub fn options(&self) -> SleepTimerOptions {
        let (music, noise) = self.minutes();
        SleepTimerOptions::minutes(music, noise)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SleepTimerPreset::Minutes15 => "15m",
            SleepTimerPreset::Minutes30 => "30m",
            SleepTimerPreset::Minutes45 => "45m",
            SleepTimerPreset::Minutes60 => "60m",
            SleepTimerPreset::Drift20 => "drift-20",
            SleepTimerPreset::Drift45 => "drift-45",
            SleepTimerPreset::Night => "night",
        }
    }
}

impl std::fmt::Display for SleepTimerPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SleepTimerPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|p| p.name()).collect();
                format!("unknown preset '{}' (expected one of: {})", s, names.join(", "))
            })
    }
}
