//! Running loudness estimate of the music output
//!
//! Samples of the output RMS are smoothed with an exponential moving average.
//! The sleep timer uses the estimate to pick a noise level that sits under
//! what the listener has been hearing.

/// Weight of the newest sample
pub const LOUDNESS_ALPHA: f32 = 0.3;

/// Estimates at or below this are treated as silence
pub const MIN_MEANINGFUL_LOUDNESS: f32 = 0.05;

/// Noise plays at this fraction of the music loudness
pub const NOISE_LEVEL_RATIO: f32 = 0.5;

/// Exponential moving average of output RMS
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessEstimate {
    value: Option<f32>,
    alpha: f32,
}

impl Default for LoudnessEstimate {
    fn default() -> Self {
        Self::new(LOUDNESS_ALPHA)
    }
}

impl LoudnessEstimate {
    pub fn new(alpha: f32) -> Self {
        Self {
            value: None,
            alpha: alpha.clamp(0.0, 1.0),
        }
    }

    /// Fold in one RMS sample; non-finite samples are ignored
    pub fn update(&mut self, rms: f32) {
        if !rms.is_finite() {
            return;
        }
        let rms = rms.max(0.0);
        self.value = Some(match self.value {
            None => rms,
            Some(prev) => self.alpha * rms + (1.0 - self.alpha) * prev,
        });
    }

    /// Current estimate; 0 before the first sample
    pub fn value(&self) -> f32 {
        self.value.unwrap_or(0.0)
    }

    pub fn reset(&mut self) {
        self.value = None;
    }

    /// Level to base the noise on: the estimate when meaningful, else `ui_volume`
    pub fn reference_level(&self, ui_volume: f32) -> f32 {
        let value = self.value();
        let level = if value > MIN_MEANINGFUL_LOUDNESS {
            value
        } else {
            ui_volume
        };
        level.clamp(0.0, 1.0)
    }

    /// Target noise volume for the crossfade
    pub fn noise_target(&self, ui_volume: f32) -> f32 {
        self.reference_level(ui_volume) * NOISE_LEVEL_RATIO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_seeds_estimate() {
        let mut est = LoudnessEstimate::default();
        assert_eq!(est.value(), 0.0);
        est.update(0.4);
        assert_eq!(est.value(), 0.4);
    }

    #[test]
    fn test_moving_average() {
        let mut est = LoudnessEstimate::default();
        est.update(0.4);
        est.update(0.1);
        // 0.3 * 0.1 + 0.7 * 0.4
        assert!((est.value() - 0.31).abs() < 1e-6);
        est.update(f32::NAN);
        assert!((est.value() - 0.31).abs() < 1e-6);
    }

    #[test]
    fn test_quiet_estimate_falls_back_to_ui_volume() {
        let mut est = LoudnessEstimate::default();
        est.update(0.02);
        assert!((est.noise_target(0.6) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_meaningful_estimate_wins() {
        let mut est = LoudnessEstimate::default();
        est.update(0.4);
        assert!((est.noise_target(0.9) - 0.2).abs() < 1e-6);

        est.reset();
        assert!((est.noise_target(0.9) - 0.45).abs() < 1e-6);
    }
}
