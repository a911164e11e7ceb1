//! # Yaytsa Common Library
//!
//! Shared code for the yaytsa playback client crates:
//! - Configuration loading (TOML file, environment, compiled defaults)
//! - Player event types
//! - Fade curve definitions and calculations
//! - Secret stripping for log and error text

pub mod config;
pub mod error;
pub mod events;
pub mod fade_curves;
pub mod sanitize;

pub use error::{Error, Result};
pub use events::{PlaybackState, PlayerEvent};
pub use fade_curves::FadeCurve;
pub use sanitize::sanitize_message;
