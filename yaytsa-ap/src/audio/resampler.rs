//! Audio resampling using rubato
//!
//! Converts decoded stereo audio to the mixer sample rate.

use crate::error::{Error, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::debug;

/// Whole-buffer resampler
pub struct Resampler;

impl Resampler {
    /// Resample interleaved stereo audio to `output_rate`
    ///
    /// Returns a copy when the rates already match.
    pub fn resample(input: &[f32], input_rate: u32, output_rate: u32) -> Result<Vec<f32>> {
        if input_rate == output_rate || input.is_empty() {
            return Ok(input.to_vec());
        }
        if input_rate == 0 || output_rate == 0 {
            return Err(Error::Decode(format!(
                "Invalid sample rate conversion {} -> {}",
                input_rate, output_rate
            )));
        }

        debug!("Resampling from {}Hz to {}Hz", input_rate, output_rate);

        let planar_input = deinterleave(input);
        let input_frames = planar_input[0].len();

        let mut resampler = FastFixedIn::<f32>::new(
            output_rate as f64 / input_rate as f64,
            1.0,
            PolynomialDegree::Septic,
            input_frames,
            2,
        )
        .map_err(|e| Error::Decode(format!("Failed to create resampler: {}", e)))?;

        let planar_output = resampler
            .process(&planar_input, None)
            .map_err(|e| Error::Decode(format!("Resampling failed: {}", e)))?;

        Ok(interleave(&planar_output))
    }
}

/// `[L, R, L, R, ...]` to `[[L, L, ...], [R, R, ...]]`
fn deinterleave(samples: &[f32]) -> Vec<Vec<f32>> {
    let frames = samples.len() / 2;
    let mut left = Vec::with_capacity(frames);
    let mut right = Vec::with_capacity(frames);
    for frame in samples.chunks_exact(2) {
        left.push(frame[0]);
        right.push(frame[1]);
    }
    vec![left, right]
}

/// `[[L, L, ...], [R, R, ...]]` to `[L, R, L, R, ...]`
fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    let [left, right] = planar else {
        return Vec::new();
    };
    let frames = left.len().min(right.len());
    let mut out = Vec::with_capacity(frames * 2);
    for i in 0..frames {
        out.push(left[i]);
        out.push(right[i]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deinterleave_interleave() {
        let planar = deinterleave(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(planar[0], vec![1.0, 3.0, 5.0]);
        assert_eq!(planar[1], vec![2.0, 4.0, 6.0]);
        assert_eq!(interleave(&planar), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_same_rate_is_copy() {
        let input = vec![0.1, 0.2, 0.3, 0.4];
        assert_eq!(Resampler::resample(&input, 44_100, 44_100).unwrap(), input);
    }

    #[test]
    fn test_48k_to_44k_length() {
        let frames = 4_800;
        let mut input = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let s = (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 48_000.0).sin() * 0.5;
            input.push(s);
            input.push(s);
        }

        let output = Resampler::resample(&input, 48_000, 44_100).unwrap();
        let expected = (frames as f64 * 44_100.0 / 48_000.0) as usize;
        let got = output.len() / 2;
        assert!(
            got + 20 >= expected && got <= expected + 20,
            "expected ~{} frames, got {}",
            expected,
            got
        );
    }
}
