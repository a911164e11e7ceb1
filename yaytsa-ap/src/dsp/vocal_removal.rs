//! Karaoke filter: center-channel cancellation with bass preservation
//!
//! Effect routing:
//!
//! ```text
//! input ──► lowpass(cutoff) ───────────────────────────────► output gain ──► output
//!   └─────► highpass(cutoff) ─► splitter ─► L + (-R) ─► merger ─┘
//!                                       └─► R + (-L) ─┘
//! ```
//!
//! Bypass routing connects `input` straight to the output gain. Switching
//! between the two happens behind a short exponential dip of the output gain
//! so the change never clicks.

use crate::audio::biquad::{FilterKind, DEFAULT_Q};
use crate::audio::graph::{AudioGraph, NodeId};
use crate::error::{Error, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const DEFAULT_BASS_CUTOFF_HZ: f64 = 120.0;
pub const MIN_BASS_CUTOFF_HZ: f64 = 50.0;
pub const MAX_BASS_CUTOFF_HZ: f64 = 300.0;

/// Length of each half of a routing transition
pub const TRANSITION_RAMP: Duration = Duration::from_millis(50);

/// Output gain at the bottom of a transition dip
const DIP_LEVEL: f32 = 0.001;

/// Which path currently feeds the output gain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    Bypass,
    Effect,
}

/// Clamp a requested cutoff to the supported range
pub fn clamp_cutoff(hz: f64) -> f64 {
    if hz.is_nan() {
        DEFAULT_BASS_CUTOFF_HZ
    } else {
        hz.clamp(MIN_BASS_CUTOFF_HZ, MAX_BASS_CUTOFF_HZ)
    }
}

#[derive(Debug, Clone, Copy)]
struct Nodes {
    input: NodeId,
    output: NodeId,
    highpass: NodeId,
    lowpass: NodeId,
    splitter: NodeId,
    merger: NodeId,
    invert_left: NodeId,
    invert_right: NodeId,
    output_gain: NodeId,
}

impl Nodes {
    fn internal(&self) -> [NodeId; 7] {
        [
            self.highpass,
            self.lowpass,
            self.splitter,
            self.merger,
            self.invert_left,
            self.invert_right,
            self.output_gain,
        ]
    }
}

#[derive(Debug)]
struct ProcessorState {
    enabled: bool,
    routing: Routing,
    cutoff: f64,
    nodes: Option<Nodes>,
    /// Latest transition; older transitions leave the gain to it
    transition: u64,
    /// Transitions still running
    pending: usize,
}

/// Counts a running transition until dropped
struct PendingTransition(Arc<Mutex<ProcessorState>>);

impl Drop for PendingTransition {
    fn drop(&mut self) {
        let mut st = self.0.lock().unwrap_or_else(|e| e.into_inner());
        st.pending = st.pending.saturating_sub(1);
    }
}

/// Vocal-removal sub-graph inserted between two nodes of a mixer graph
#[derive(Clone)]
pub struct VocalRemovalProcessor {
    graph: AudioGraph,
    state: Arc<Mutex<ProcessorState>>,
}

impl std::fmt::Debug for VocalRemovalProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.lock();
        f.debug_struct("VocalRemovalProcessor")
            .field("enabled", &st.enabled)
            .field("routing", &st.routing)
            .field("cutoff", &st.cutoff)
            .finish()
    }
}

impl VocalRemovalProcessor {
    pub fn new(graph: AudioGraph) -> Self {
        Self {
            graph,
            state: Arc::new(Mutex::new(ProcessorState {
                enabled: false,
                routing: Routing::Bypass,
                cutoff: DEFAULT_BASS_CUTOFF_HZ,
                nodes: None,
                transition: 0,
                pending: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProcessorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Build the sub-graph and route `input` to `output` through it
    ///
    /// The caller removes any direct `input -> output` connection. Starts in
    /// whatever routing matches the enabled flag.
    pub fn connect(&self, input: NodeId, output: NodeId) -> Result<()> {
        let mut st = self.lock();
        if st.nodes.is_some() {
            return Err(Error::InvalidState(
                "vocal removal already connected".to_string(),
            ));
        }

        let graph = &self.graph;
        let nodes = Nodes {
            input,
            output,
            highpass: graph.create_filter(FilterKind::Highpass, st.cutoff, DEFAULT_Q)?,
            lowpass: graph.create_filter(FilterKind::Lowpass, st.cutoff, DEFAULT_Q)?,
            splitter: graph.create_splitter()?,
            merger: graph.create_merger()?,
            invert_left: graph.create_gain(-1.0)?,
            invert_right: graph.create_gain(-1.0)?,
            output_gain: graph.create_gain(1.0)?,
        };

        let wired = (|| -> Result<()> {
            graph.connect(nodes.highpass, nodes.splitter)?;
            // Left out: L - R
            graph.connect_port(nodes.splitter, 0, nodes.merger, 0)?;
            graph.connect_port(nodes.splitter, 1, nodes.invert_right, 0)?;
            graph.connect_port(nodes.invert_right, 0, nodes.merger, 0)?;
            // Right out: R - L
            graph.connect_port(nodes.splitter, 1, nodes.merger, 1)?;
            graph.connect_port(nodes.splitter, 0, nodes.invert_left, 0)?;
            graph.connect_port(nodes.invert_left, 0, nodes.merger, 1)?;
            graph.connect(nodes.output_gain, output)?;
            Ok(())
        })();
        if let Err(e) = wired {
            for node in nodes.internal() {
                graph.remove(node);
            }
            return Err(e);
        }

        let routing = if st.enabled { Routing::Effect } else { Routing::Bypass };
        apply_routing(graph, &nodes, routing)?;
        st.routing = routing;
        st.nodes = Some(nodes);
        debug!("Vocal removal connected ({:?})", routing);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.lock().nodes.is_some()
    }

    /// Request the effect on or off
    ///
    /// The routing switch runs in the background behind a gain dip. When
    /// several requests overlap, the routing ends up matching the last one.
    /// Must be called inside a tokio runtime.
    pub fn set_enabled(&self, enabled: bool) -> JoinHandle<()> {
        let (transition, output_gain) = {
            let mut st = self.lock();
            st.enabled = enabled;
            st.transition += 1;
            let target = if enabled { Routing::Effect } else { Routing::Bypass };
            match st.nodes {
                Some(nodes) if st.routing != target || st.pending > 0 => {
                    st.pending += 1;
                    (st.transition, nodes.output_gain)
                }
                _ => return tokio::spawn(async {}),
            }
        };

        let pending = PendingTransition(Arc::clone(&self.state));
        let this = self.clone();
        tokio::spawn(async move {
            let _pending = pending;
            let graph = &this.graph;
            if let Err(e) =
                graph.ramp_gain_exponential(output_gain, DIP_LEVEL, TRANSITION_RAMP.as_secs_f64())
            {
                debug!("Vocal removal dip skipped: {}", e);
                return;
            }
            tokio::time::sleep(TRANSITION_RAMP).await;

            {
                let mut st = this.lock();
                if st.transition != transition {
                    return;
                }
                let Some(nodes) = st.nodes else {
                    return;
                };
                let target = if st.enabled { Routing::Effect } else { Routing::Bypass };
                if st.routing != target {
                    match apply_routing(graph, &nodes, target) {
                        Ok(()) => {
                            st.routing = target;
                            debug!("Vocal removal routing: {:?}", target);
                        }
                        Err(e) => warn!("Vocal removal routing failed: {}", e),
                    }
                }
                if let Err(e) =
                    graph.ramp_gain_exponential(output_gain, 1.0, TRANSITION_RAMP.as_secs_f64())
                {
                    debug!("Vocal removal ramp-up skipped: {}", e);
                    return;
                }
            }
            tokio::time::sleep(TRANSITION_RAMP).await;
        })
    }

    /// Requested state (the routing may still be switching)
    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    pub fn routing(&self) -> Routing {
        self.lock().routing
    }

    /// Move both crossover filters; clamped to 50-300 Hz
    pub fn set_bass_preservation_cutoff(&self, hz: f64) -> Result<()> {
        let cutoff = clamp_cutoff(hz);
        let mut st = self.lock();
        st.cutoff = cutoff;
        if let Some(nodes) = st.nodes {
            self.graph.set_filter_frequency(nodes.highpass, cutoff)?;
            self.graph.set_filter_frequency(nodes.lowpass, cutoff)?;
        }
        Ok(())
    }

    pub fn bass_preservation_cutoff(&self) -> f64 {
        self.lock().cutoff
    }

    /// Remove every node and reset; safe to call repeatedly
    pub fn dispose(&self) {
        let mut st = self.lock();
        st.transition += 1;
        st.enabled = false;
        st.routing = Routing::Bypass;
        if let Some(nodes) = st.nodes.take() {
            for node in nodes.internal() {
                self.graph.remove(node);
            }
            debug!("Vocal removal disposed");
        }
    }
}

/// Rewire the routing-dependent edges
fn apply_routing(graph: &AudioGraph, nodes: &Nodes, routing: Routing) -> Result<()> {
    graph.disconnect_from(nodes.input, nodes.output_gain);
    graph.disconnect_from(nodes.input, nodes.lowpass);
    graph.disconnect_from(nodes.input, nodes.highpass);
    graph.disconnect_from(nodes.lowpass, nodes.output_gain);
    graph.disconnect_from(nodes.merger, nodes.output_gain);

    match routing {
        Routing::Bypass => graph.connect(nodes.input, nodes.output_gain),
        Routing::Effect => {
            graph.connect(nodes.input, nodes.lowpass)?;
            graph.connect(nodes.input, nodes.highpass)?;
            graph.connect(nodes.lowpass, nodes.output_gain)?;
            graph.connect(nodes.merger, nodes.output_gain)
        }
    }
}
