//! # Yaytsa Audio Player Library (yaytsa-ap)
//!
//! Client-side playback engine for a media-server music client.
//!
//! **Purpose:** Play one track at a time with gapless preloading of the next,
//! cancellable volume fades, click-free karaoke (vocal removal) and a sleep
//! timer that crossfades music into pink noise.
//!
//! **Architecture:** symphonia + rubato decode and resample each source into
//! memory; a pull-rendered mixer graph feeds a cpal output stream.

pub mod audio;
pub mod config;
pub mod db;
pub mod dsp;
pub mod error;
pub mod playback;
pub mod sleep;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use playback::{AudioEngine, FadeHandle, FadeOutcome, Subscription};
pub use sleep::{SleepPhase, SleepTimer, SleepTimerConfig, SleepTimerOptions, SleepTimerPreset};
