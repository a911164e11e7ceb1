//! Biquad low-pass / high-pass filter
//!
//! RBJ cookbook coefficients, Direct Form II Transposed, independent state per
//! stereo channel. Coefficients are f64; retuning keeps the filter state so a
//! live cutoff change does not click.

use std::f64::consts::PI;

/// Default filter quality
pub const DEFAULT_Q: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Lowpass,
    Highpass,
}

#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    z1: f64,
    z2: f64,
}

/// Stereo biquad filter
#[derive(Debug, Clone)]
pub struct Biquad {
    kind: FilterKind,
    frequency: f64,
    q: f64,
    sample_rate: f64,

    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,

    state: [ChannelState; 2],
}

impl Biquad {
    pub fn new(kind: FilterKind, frequency: f64, q: f64, sample_rate: u32) -> Self {
        let mut filter = Self {
            kind,
            frequency,
            q,
            sample_rate: sample_rate as f64,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            state: [ChannelState::default(); 2],
        };
        filter.calculate_coefficients();
        filter
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Retune; filter state is kept
    pub fn set_frequency(&mut self, frequency: f64) {
        if (self.frequency - frequency).abs() < 1e-6 {
            return;
        }
        self.frequency = frequency;
        self.calculate_coefficients();
    }

    fn calculate_coefficients(&mut self) {
        let nyquist = self.sample_rate / 2.0;
        let f0 = self.frequency.clamp(1.0, nyquist * 0.999);
        let w0 = 2.0 * PI * f0 / self.sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * self.q.max(1e-3));

        let (b0, b1, b2) = match self.kind {
            FilterKind::Lowpass => {
                let b = (1.0 - cos_w0) / 2.0;
                (b, 1.0 - cos_w0, b)
            }
            FilterKind::Highpass => {
                let b = (1.0 + cos_w0) / 2.0;
                (b, -(1.0 + cos_w0), b)
            }
        };
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha;

        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = a1 / a0;
        self.a2 = a2 / a0;
    }

    /// Filter one sample on `channel` (0 = left, 1 = right)
    #[inline]
    pub fn process_sample(&mut self, channel: usize, input: f32) -> f32 {
        let x = input as f64;
        let s = &mut self.state[channel & 1];
        let y = self.b0 * x + s.z1;
        s.z1 = self.b1 * x - self.a1 * y + s.z2;
        s.z2 = self.b2 * x - self.a2 * y;
        flush_denormal(y) as f32
    }

    /// Filter interleaved stereo in place
    pub fn process_interleaved(&mut self, samples: &mut [f32]) {
        for frame in samples.chunks_exact_mut(2) {
            frame[0] = self.process_sample(0, frame[0]);
            frame[1] = self.process_sample(1, frame[1]);
        }
    }

    pub fn reset(&mut self) {
        self.state = [ChannelState::default(); 2];
    }
}

#[inline]
fn flush_denormal(x: f64) -> f64 {
    if x.abs() < 1e-20 {
        0.0
    } else {
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, rate: u32, frames: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let s = (2.0 * PI * freq * i as f64 / rate as f64).sin() as f32;
            out.push(s);
            out.push(s);
        }
        out
    }

    fn rms_tail(samples: &[f32]) -> f32 {
        let tail = &samples[samples.len() / 2..];
        (tail.iter().map(|s| s * s).sum::<f32>() / tail.len() as f32).sqrt()
    }

    #[test]
    fn test_lowpass_attenuates_highs() {
        let mut lp = Biquad::new(FilterKind::Lowpass, 120.0, DEFAULT_Q, 44_100);
        let mut low = sine(50.0, 44_100, 8_192);
        let mut high = sine(5_000.0, 44_100, 8_192);
        lp.process_interleaved(&mut low);
        lp.reset();
        lp.process_interleaved(&mut high);
        assert!(rms_tail(&low) > 0.5);
        assert!(rms_tail(&high) < 0.01);
    }

    #[test]
    fn test_highpass_attenuates_lows() {
        let mut hp = Biquad::new(FilterKind::Highpass, 120.0, DEFAULT_Q, 44_100);
        let mut low = sine(20.0, 44_100, 16_384);
        let mut high = sine(5_000.0, 44_100, 8_192);
        hp.process_interleaved(&mut low);
        hp.reset();
        hp.process_interleaved(&mut high);
        assert!(rms_tail(&low) < 0.1);
        assert!(rms_tail(&high) > 0.6);
    }

    #[test]
    fn test_retune_keeps_state() {
        let mut lp = Biquad::new(FilterKind::Lowpass, 120.0, DEFAULT_Q, 44_100);
        lp.process_sample(0, 1.0);
        lp.set_frequency(300.0);
        assert_eq!(lp.frequency(), 300.0);
        // State carried over, so the next output is non-zero even for silence
        assert!(lp.process_sample(0, 0.0).abs() > 0.0);
    }
}
