//! Audio decoder using symphonia
//!
//! Decodes MP3, FLAC, AAC, Vorbis and WAV to interleaved stereo f32.
//! Mono sources are duplicated to both channels; channels beyond the first
//! two are dropped.

use crate::error::{Error, Result};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Whole-file decoder
pub struct SimpleDecoder;

impl SimpleDecoder {
    /// Decode an entire file
    ///
    /// # Returns
    /// - interleaved stereo samples
    /// - the source sample rate (before resampling)
    pub fn decode_file(path: &Path) -> Result<(Vec<f32>, u32)> {
        debug!("Decoding file: {}", path.display());

        let file = std::fs::File::open(path)
            .map_err(|e| Error::Decode(format!("Failed to open file {}: {}", path.display(), e)))?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| Error::Decode(format!("Failed to probe format: {}", e)))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Decode("No audio track found".to_string()))?;

        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| Error::Decode("Sample rate not found".to_string()))?;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("Failed to create decoder: {}", e)))?;

        let mut samples = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;
        let mut decoded_packets = 0usize;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    continue;
                }
                Err(e) => {
                    warn!("Error reading packet: {}", e);
                    break;
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping corrupt packet: {}", e);
                    continue;
                }
                Err(e) => return Err(Error::Decode(format!("Decode failed: {}", e))),
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count();
            let capacity = decoded.capacity() as u64;

            let too_small = sample_buf
                .as_ref()
                .map_or(true, |b| b.capacity() < decoded.capacity() * channels);
            if too_small {
                sample_buf = Some(SampleBuffer::<f32>::new(capacity, spec));
            }
            let Some(buf) = sample_buf.as_mut() else {
                continue;
            };
            buf.copy_interleaved_ref(decoded);

            push_stereo(buf.samples(), channels, &mut samples);
            decoded_packets += 1;
        }

        if decoded_packets == 0 {
            return Err(Error::Decode(format!(
                "No decodable audio in {}",
                path.display()
            )));
        }

        debug!(
            "Decoded {} frames at {}Hz from {}",
            samples.len() / 2,
            sample_rate,
            path.display()
        );

        Ok((samples, sample_rate))
    }
}

/// Append interleaved `channels`-wide samples as stereo
fn push_stereo(interleaved: &[f32], channels: usize, output: &mut Vec<f32>) {
    match channels {
        0 => {}
        1 => {
            output.reserve(interleaved.len() * 2);
            for &s in interleaved {
                output.push(s);
                output.push(s);
            }
        }
        2 => output.extend_from_slice(interleaved),
        n => {
            output.reserve(interleaved.len() / n * 2);
            for frame in interleaved.chunks_exact(n) {
                output.push(frame[0]);
                output.push(frame[1]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_is_duplicated() {
        let mut out = Vec::new();
        push_stereo(&[0.1, 0.2], 1, &mut out);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn test_surround_keeps_front_pair() {
        let mut out = Vec::new();
        push_stereo(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3, &mut out);
        assert_eq!(out, vec![1.0, 2.0, 4.0, 5.0]);
    }

    #[test]
    fn test_missing_file_is_decode_error() {
        let result = SimpleDecoder::decode_file(Path::new("/nonexistent/track.flac"));
        assert!(matches!(result, Err(Error::Decode(_))));
    }
}
