//! Automatable node parameters
//!
//! An [`AudioParam`] holds a value that can jump or ramp over the mixer's
//! frame clock. Ramps are evaluated per frame while rendering.

/// Smallest magnitude an exponential ramp may start from or reach
pub const MIN_EXPONENTIAL_VALUE: f32 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq)]
enum RampKind {
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Copy)]
struct Ramp {
    kind: RampKind,
    from: f32,
    to: f32,
    start_frame: u64,
    end_frame: u64,
}

impl Ramp {
    fn value_at(&self, frame: u64) -> f32 {
        if frame >= self.end_frame {
            return self.to;
        }
        let span = (self.end_frame - self.start_frame) as f64;
        let t = (frame.saturating_sub(self.start_frame) as f64 / span) as f32;
        match self.kind {
            RampKind::Linear => self.from + (self.to - self.from) * t,
            RampKind::Exponential => self.from * (self.to / self.from).powf(t),
        }
    }
}

/// Parameter value with optional ramp
#[derive(Debug, Clone)]
pub struct AudioParam {
    value: f32,
    ramp: Option<Ramp>,
}

impl AudioParam {
    pub fn new(value: f32) -> Self {
        Self { value, ramp: None }
    }

    /// Last computed value
    pub fn value(&self) -> f32 {
        self.value
    }

    /// Jump to `value`, cancelling any ramp
    pub fn set_value(&mut self, value: f32) {
        self.value = value;
        self.ramp = None;
    }

    pub fn is_ramping(&self) -> bool {
        self.ramp.is_some()
    }

    /// Linear ramp from the current value to `target` over `frames`
    pub fn linear_ramp_to(&mut self, target: f32, now: u64, frames: u64) {
        self.start_ramp(RampKind::Linear, self.value, target, now, frames);
    }

    /// Exponential ramp from the current value to `target` over `frames`
    ///
    /// Both ends are held away from zero by [`MIN_EXPONENTIAL_VALUE`].
    pub fn exponential_ramp_to(&mut self, target: f32, now: u64, frames: u64) {
        let from = self.value.max(MIN_EXPONENTIAL_VALUE);
        let target = target.max(MIN_EXPONENTIAL_VALUE);
        self.start_ramp(RampKind::Exponential, from, target, now, frames);
    }

    fn start_ramp(&mut self, kind: RampKind, from: f32, to: f32, now: u64, frames: u64) {
        if frames == 0 {
            self.set_value(to);
            return;
        }
        self.value = from;
        self.ramp = Some(Ramp {
            kind,
            from,
            to,
            start_frame: now,
            end_frame: now + frames,
        });
    }

    /// Value at `frame`; finishes the ramp once its end is reached
    pub fn advance(&mut self, frame: u64) -> f32 {
        if let Some(ramp) = self.ramp {
            self.value = ramp.value_at(frame);
            if frame >= ramp.end_frame {
                self.ramp = None;
            }
        }
        self.value
    }
}
