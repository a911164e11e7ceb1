//! In-memory source loader

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use yaytsa_ap::audio::{DecodedAudio, SourceLoader};
use yaytsa_ap::{Error, Result};

/// Serves a constant-level stereo source for every URL
///
/// URLs containing "fail" fail to load. Lengths default to two seconds.
pub struct ScriptedLoader {
    lengths: Mutex<HashMap<String, f64>>,
    default_seconds: f64,
    latency: Duration,
    level: f32,
    calls: AtomicUsize,
}

impl ScriptedLoader {
    pub fn new() -> Self {
        Self {
            lengths: Mutex::new(HashMap::new()),
            default_seconds: 2.0,
            latency: Duration::ZERO,
            level: 0.25,
            calls: AtomicUsize::new(0),
        }
    }

    /// Blocking delay per load, in real time
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_track(self, url: &str, seconds: f64) -> Self {
        self.lengths.lock().unwrap().insert(url.to_string(), seconds);
        self
    }

    /// Number of loads started
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SourceLoader for ScriptedLoader {
    fn load(&self, url: &str, sample_rate: u32) -> Result<DecodedAudio> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        if url.contains("fail") {
            return Err(Error::Load(format!("cannot open {}", url)));
        }
        let seconds = self
            .lengths
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(self.default_seconds);
        let frames = (seconds * sample_rate as f64) as usize;
        Ok(DecodedAudio::new(vec![self.level; frames * 2], sample_rate))
    }
}
