//! Cancellable volume ramps
//!
//! [`fade`] drives a [`VolumeTarget`] from one level to another on a fixed
//! tick, computing progress from elapsed time so a late tick never slows the
//! fade down. Cancelling stops the ramp where it is; the target keeps the last
//! applied level.
//!
//! # Examples
//!
//! ```ignore
//! let handle = fade(element.clone(), 0.8, 0.0, Duration::from_secs(3), FadeCurve::EaseInOut);
//! // ... later
//! handle.cancel();
//! assert_eq!(handle.finished().await, FadeOutcome::Cancelled);
//! ```

use crate::audio::graph::{AudioGraph, NodeId};
use crate::playback::element::MediaElement;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;
use yaytsa_common::FadeCurve;

/// Fade tick (about one display frame)
pub const FADE_TICK: Duration = Duration::from_millis(16);

/// Anything with a volume in [0, 1]
pub trait VolumeTarget: Send + Sync + 'static {
    fn volume(&self) -> f32;
    fn set_volume(&self, volume: f32);
}

impl VolumeTarget for MediaElement {
    fn volume(&self) -> f32 {
        MediaElement::volume(self)
    }

    fn set_volume(&self, volume: f32) {
        MediaElement::set_volume(self, volume)
    }
}

/// A gain node used as a volume
#[derive(Debug, Clone)]
pub struct GainTarget {
    graph: AudioGraph,
    node: NodeId,
}

impl GainTarget {
    pub fn new(graph: AudioGraph, node: NodeId) -> Self {
        Self { graph, node }
    }
}

impl VolumeTarget for GainTarget {
    fn volume(&self) -> f32 {
        self.graph.gain(self.node).unwrap_or(0.0)
    }

    fn set_volume(&self, volume: f32) {
        if let Err(e) = self.graph.set_gain(self.node, volume.clamp(0.0, 1.0)) {
            // Node already torn down
            debug!("Gain update skipped: {}", e);
        }
    }
}

/// How a fade ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeOutcome {
    Completed,
    Cancelled,
}

struct FadeControl {
    cancelled: AtomicBool,
    /// Held while a level is applied, so nothing is applied after `cancel`
    apply: Mutex<()>,
    done: watch::Sender<Option<FadeOutcome>>,
}

impl FadeControl {
    fn finish(&self, outcome: FadeOutcome) {
        self.done.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(outcome);
                true
            } else {
                false
            }
        });
    }
}

/// Handle to a running fade
#[derive(Clone)]
pub struct FadeHandle {
    control: Arc<FadeControl>,
    done: watch::Receiver<Option<FadeOutcome>>,
}

impl std::fmt::Debug for FadeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FadeHandle")
            .field("outcome", &self.outcome())
            .finish()
    }
}

impl FadeHandle {
    fn new() -> Self {
        let (done, rx) = watch::channel(None);
        Self {
            control: Arc::new(FadeControl {
                cancelled: AtomicBool::new(false),
                apply: Mutex::new(()),
                done,
            }),
            done: rx,
        }
    }

    /// Stop the fade at its current level; no-op once finished
    pub fn cancel(&self) {
        let _guard = self.control.apply.lock().unwrap_or_else(|e| e.into_inner());
        if self.control.done.borrow().is_some() {
            return;
        }
        self.control.cancelled.store(true, Ordering::SeqCst);
        self.control.finish(FadeOutcome::Cancelled);
    }

    pub fn outcome(&self) -> Option<FadeOutcome> {
        *self.done.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome().is_some()
    }

    /// Wait for completion or cancellation
    pub async fn finished(&self) -> FadeOutcome {
        let mut rx = self.done.clone();
        loop {
            if let Some(outcome) = *rx.borrow_and_update() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return FadeOutcome::Cancelled;
            }
        }
    }
}

fn clamp_level(level: f32) -> f32 {
    if level.is_nan() {
        0.0
    } else {
        level.clamp(0.0, 1.0)
    }
}

/// Ramp `target` from `from` to `to` over `duration`
///
/// `from` is applied before this returns. Must be called inside a tokio
/// runtime.
pub fn fade<T: VolumeTarget>(
    target: T,
    from: f32,
    to: f32,
    duration: Duration,
    curve: FadeCurve,
) -> FadeHandle {
    let from = clamp_level(from);
    let to = clamp_level(to);
    let handle = FadeHandle::new();

    target.set_volume(from);

    if duration.is_zero() {
        target.set_volume(to);
        handle.control.finish(FadeOutcome::Completed);
        return handle;
    }

    let control = Arc::clone(&handle.control);
    tokio::spawn(async move {
        let start = Instant::now();
        let mut ticker = tokio::time::interval(FADE_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let _guard = control.apply.lock().unwrap_or_else(|e| e.into_inner());
            if control.cancelled.load(Ordering::SeqCst) {
                return;
            }

            let progress =
                (start.elapsed().as_secs_f64() / duration.as_secs_f64()).min(1.0);
            target.set_volume(curve.level_at(from, to, progress));

            if progress >= 1.0 {
                control.finish(FadeOutcome::Completed);
                return;
            }
        }
    });

    handle
}

/// Single-owner fade slot: starting a fade cancels the previous one
#[derive(Default)]
pub struct FadeSlot {
    current: Mutex<Option<FadeHandle>>,
}

impl FadeSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start<T: VolumeTarget>(
        &self,
        target: T,
        from: f32,
        to: f32,
        duration: Duration,
        curve: FadeCurve,
    ) -> FadeHandle {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = current.take() {
            previous.cancel();
        }
        let handle = fade(target, from, to, duration, curve);
        *current = Some(handle.clone());
        handle
    }

    pub fn cancel(&self) {
        let previous = self
            .current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    /// True while a fade started here is still running
    pub fn is_active(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map_or(false, |h| !h.is_finished())
    }
}
