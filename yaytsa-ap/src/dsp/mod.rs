//! Signal processing: karaoke filter, pink noise, loudness tracking

pub mod loudness;
pub mod pink_noise;
pub mod vocal_removal;

pub use loudness::LoudnessEstimate;
pub use pink_noise::{generate_pink_noise, PinkNoiseSource};
pub use vocal_removal::{Routing, VocalRemovalProcessor};
