//! Playback: media elements, fades and the dual-channel engine

pub mod channel;
pub mod element;
pub mod engine;
pub mod fader;
pub mod serial;

pub use channel::PlaybackChannel;
pub use element::{ElementEvent, MediaElement, PlayError, ReadyState};
pub use engine::{AudioEngine, Subscription};
pub use fader::{fade, FadeHandle, FadeOutcome, FadeSlot, GainTarget, VolumeTarget};
pub use serial::{OpToken, OperationQueue};
