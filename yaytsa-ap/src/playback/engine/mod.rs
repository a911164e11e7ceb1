//! Dual-channel audio engine
//!
//! **Module layout:**
//! - `core`: construction, transport controls, volume, dispose
//! - `preload`: standby preloading and seamless switching
//! - `karaoke`: vocal removal on the engine bus
//! - `events`: event forwarding and listener registration

mod core;
mod events;
mod karaoke;
mod preload;

pub use self::core::AudioEngine;
pub use self::events::Subscription;
