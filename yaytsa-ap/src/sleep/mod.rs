//! Sleep timer: music, a crossfade into pink noise, then silence

pub mod config;
pub mod timer;

pub use config::{SleepTimerConfig, SleepTimerOptions, SleepTimerPreset};
pub use timer::{PhaseChange, SleepPhase, SleepTimer, SleepTimerStatus};
