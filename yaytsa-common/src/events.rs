//! Player event types
//!
//! Events published by the playback engine to its orchestrator. Time values
//! are seconds of media time.

use serde::{Deserialize, Serialize};

/// Events emitted by the audio engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// Position advanced on the active channel
    TimeUpdate { position: f64, duration: f64 },

    /// Active channel reached the end of its source
    Ended,

    /// Active channel failed (message already sanitized)
    Error { message: String },

    /// A load started or settled
    LoadingStateChanged { loading: bool },

    /// Active channel started or paused
    PlaybackStateChanged { state: PlaybackState },
}

impl PlayerEvent {
    /// Short name for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            PlayerEvent::TimeUpdate { .. } => "TimeUpdate",
            PlayerEvent::Ended => "Ended",
            PlayerEvent::Error { .. } => "Error",
            PlayerEvent::LoadingStateChanged { .. } => "LoadingStateChanged",
            PlayerEvent::PlaybackStateChanged { .. } => "PlaybackStateChanged",
        }
    }
}

/// Playback state enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    #[default]
    Paused,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
        }
    }
}
