//! Fade curve implementations for volume ramps
//!
//! Two curve types are used by the playback client:
//! - Ease-in-out: quadratic acceleration then deceleration, the default for
//!   audible volume changes (sleep timer, user fades)
//! - Linear: constant rate, used for short seamless-switch crossfades where
//!   an eased curve would dip perceptibly at the midpoint

use serde::{Deserialize, Serialize};

/// Fade curve types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// Linear: v(p) = p
    Linear,

    /// Quadratic ease-in-out:
    /// v(p) = 2p² for p < 0.5, else 1 - (-2p + 2)² / 2
    #[default]
    EaseInOut,
}

impl FadeCurve {
    /// Shape a normalized progress value.
    ///
    /// # Arguments
    /// * `progress` - Position through the fade (clamped to 0.0..=1.0)
    ///
    /// # Returns
    /// Curve-adjusted progress in 0.0..=1.0
    pub fn apply(&self, progress: f64) -> f64 {
        let p = progress.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => p,
            FadeCurve::EaseInOut => {
                if p < 0.5 {
                    2.0 * p * p
                } else {
                    let inv = -2.0 * p + 2.0;
                    1.0 - (inv * inv) / 2.0
                }
            }
        }
    }

    /// Level reached at `progress` when ramping from `from` to `to`
    pub fn level_at(&self, from: f32, to: f32, progress: f64) -> f32 {
        let shaped = self.apply(progress) as f32;
        from + (to - from) * shaped
    }

    /// Parse curve from string (settings / CLI)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "linear" => Some(FadeCurve::Linear),
            "ease_in_out" | "ease-in-out" | "easeinout" | "eased" => Some(FadeCurve::EaseInOut),
            _ => None,
        }
    }

    /// Get human-readable display name
    pub fn display_name(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "Linear",
            FadeCurve::EaseInOut => "Ease In-Out",
        }
    }
}

impl std::fmt::Display for FadeCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
