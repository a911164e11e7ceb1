//! Audio platform layer: mixer graph, output backends, decoding

pub mod backend;
pub mod biquad;
pub mod decoder;
pub mod graph;
pub mod loader;
pub mod output;
pub mod param;
pub mod resampler;
pub mod types;

pub use backend::{AudioBackend, Mixer, NullBackend, OfflineBackend, UnavailableBackend};
pub use graph::{AudioGraph, GraphState, LevelMeter, NodeId, RenderSource};
pub use loader::{FileSourceLoader, SourceLoader};
pub use output::CpalBackend;
pub use types::{AudioFrame, DecodedAudio};
