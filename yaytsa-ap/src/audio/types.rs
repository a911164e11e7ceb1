//! Core audio data types
//!
//! All PCM inside the mixer is f32, stereo interleaved `[L, R, L, R, ...]`,
//! at the mixer sample rate.

use std::sync::Arc;

/// Decoded source audio ready for playback
///
/// Cloning is cheap; the sample data is shared.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Interleaved stereo samples
    samples: Arc<[f32]>,

    /// Sample rate of `samples`
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Wrap interleaved stereo samples
    ///
    /// A trailing odd sample is dropped.
    pub fn new(mut samples: Vec<f32>, sample_rate: u32) -> Self {
        if samples.len() % 2 != 0 {
            samples.pop();
        }
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Interleaved stereo samples
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of stereo frames
    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    /// Duration in seconds
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Frame at `index`, if in range
    pub fn frame(&self, index: usize) -> Option<AudioFrame> {
        let i = index * 2;
        if i + 1 < self.samples.len() {
            Some(AudioFrame {
                left: self.samples[i],
                right: self.samples[i + 1],
            })
        } else {
            None
        }
    }
}

/// A single stereo frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AudioFrame {
    pub left: f32,
    pub right: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_and_frames() {
        let audio = DecodedAudio::new(vec![0.0; 44_100 * 2], 44_100);
        assert_eq!(audio.frames(), 44_100);
        assert!((audio.duration_seconds() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_odd_sample_dropped() {
        let audio = DecodedAudio::new(vec![0.1, 0.2, 0.3], 8_000);
        assert_eq!(audio.frames(), 1);
        assert_eq!(audio.frame(0), Some(AudioFrame { left: 0.1, right: 0.2 }));
        assert_eq!(audio.frame(1), None);
    }
}
