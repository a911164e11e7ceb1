//! Source loading
//!
//! A [`SourceLoader`] turns a stream URL into PCM at the mixer rate. Loading
//! is blocking and runs on the tokio blocking pool.

use crate::audio::decoder::SimpleDecoder;
use crate::audio::resampler::Resampler;
use crate::audio::types::DecodedAudio;
use crate::error::{Error, Result};
use std::path::PathBuf;
use tracing::debug;
use yaytsa_common::sanitize_message;

/// Resolves a URL to decoded audio
pub trait SourceLoader: Send + Sync + 'static {
    /// Fetch and decode `url`, resampled to `sample_rate`
    fn load(&self, url: &str, sample_rate: u32) -> Result<DecodedAudio>;
}

/// Loads local files (plain paths or `file://` URLs)
#[derive(Debug, Default, Clone)]
pub struct FileSourceLoader;

impl FileSourceLoader {
    pub fn new() -> Self {
        Self
    }

    fn resolve(url: &str) -> Result<PathBuf> {
        if let Some(path) = url.strip_prefix("file://") {
            // Drop any query string a URL provider may have appended
            let path = path.split('?').next().unwrap_or(path);
            return Ok(PathBuf::from(path));
        }
        if let Some((scheme, _)) = url.split_once("://") {
            return Err(Error::Load(sanitize_message(&format!(
                "Unsupported URL scheme '{}' in {}",
                scheme, url
            ))));
        }
        Ok(PathBuf::from(url))
    }
}

impl SourceLoader for FileSourceLoader {
    fn load(&self, url: &str, sample_rate: u32) -> Result<DecodedAudio> {
        let path = Self::resolve(url)?;
        let (samples, source_rate) = SimpleDecoder::decode_file(&path)
            .map_err(|e| Error::Load(sanitize_message(&e.to_string())))?;
        let samples = Resampler::resample(&samples, source_rate, sample_rate)
            .map_err(|e| Error::Load(sanitize_message(&e.to_string())))?;
        let audio = DecodedAudio::new(samples, sample_rate);
        debug!(
            "Loaded {:.2}s from {}",
            audio.duration_seconds(),
            path.display()
        );
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_file_url() {
        let path = FileSourceLoader::resolve("file:///music/a.flac?api_key=x").unwrap();
        assert_eq!(path, PathBuf::from("/music/a.flac"));
    }

    #[test]
    fn test_resolve_plain_path() {
        let path = FileSourceLoader::resolve("/music/b.mp3").unwrap();
        assert_eq!(path, PathBuf::from("/music/b.mp3"));
    }

    #[test]
    fn test_network_url_rejected_and_sanitized() {
        let err = FileSourceLoader::resolve("https://host/Audio/1/stream?api_key=secret")
            .unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, Error::Load(_)));
        assert!(!msg.contains("secret"), "{}", msg);
    }
}
