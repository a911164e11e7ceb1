//! Software mixer graph
//!
//! A pull-rendered node graph: output drivers call [`AudioGraph::render`],
//! which walks the graph from the destination in dependency order, one
//! quantum of up to [`RENDER_QUANTUM`] frames at a time.
//!
//! Channel handling on summing inputs:
//! - all inputs mono: the sum stays mono
//! - any input stereo: mono inputs are added to both channels
//! - merger inputs are mixed down to mono (`0.5 * (L + R)`)
//! - a splitter fed mono puts the signal on output 0 and silence on output 1
//!
//! Lock order is graph, then media element. Nothing holding an element lock
//! may call into the graph.

use crate::audio::biquad::{Biquad, FilterKind};
use crate::audio::param::AudioParam;
use crate::audio::types::DecodedAudio;
use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Frames rendered per graph pass
pub const RENDER_QUANTUM: usize = 128;

/// Blocks averaged by an analyser (about 46 ms at 44.1 kHz)
const ANALYSER_WINDOW_BLOCKS: usize = 16;

/// Node handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

/// Graph run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    Running,
    Suspended,
    Closed,
}

/// Anything that can feed a graph from outside (media elements)
///
/// Called on the render thread with the graph lock held.
pub trait RenderSource: Send + Sync {
    /// Fill `left`/`right` (same length) with the next frames
    fn render(&self, left: &mut [f32], right: &mut [f32], sample_rate: u32);
}

/// Output level published by an analyser node
#[derive(Debug, Clone, Default)]
pub struct LevelMeter(Arc<AtomicU32>);

impl LevelMeter {
    /// RMS over the last analysis window
    pub fn rms(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn publish(&self, rms: f32) {
        self.0.store(rms.to_bits(), Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceState {
    Idle,
    Playing,
    Stopped,
}

enum NodeKind {
    Destination,
    Gain {
        gain: AudioParam,
    },
    Filter {
        filter: Biquad,
    },
    Splitter,
    Merger,
    BufferSource {
        buffer: DecodedAudio,
        looping: bool,
        position: usize,
        state: SourceState,
    },
    Element {
        source: Arc<dyn RenderSource>,
    },
    Analyser {
        meter: LevelMeter,
        window: VecDeque<f32>,
    },
}

impl NodeKind {
    fn inputs(&self) -> usize {
        match self {
            NodeKind::BufferSource { .. } | NodeKind::Element { .. } => 0,
            NodeKind::Merger => 2,
            _ => 1,
        }
    }

    fn outputs(&self) -> usize {
        match self {
            NodeKind::Destination => 0,
            NodeKind::Splitter => 2,
            _ => 1,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            NodeKind::Destination => "destination",
            NodeKind::Gain { .. } => "gain",
            NodeKind::Filter { .. } => "filter",
            NodeKind::Splitter => "splitter",
            NodeKind::Merger => "merger",
            NodeKind::BufferSource { .. } => "buffer source",
            NodeKind::Element { .. } => "element source",
            NodeKind::Analyser { .. } => "analyser",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Connection {
    from: NodeId,
    output: usize,
    to: NodeId,
    input: usize,
}

/// One quantum of one node output
#[derive(Clone)]
struct Bus {
    left: [f32; RENDER_QUANTUM],
    right: [f32; RENDER_QUANTUM],
    mono: bool,
}

impl Bus {
    fn silent_mono() -> Self {
        Self {
            left: [0.0; RENDER_QUANTUM],
            right: [0.0; RENDER_QUANTUM],
            mono: true,
        }
    }

    fn silent_stereo() -> Self {
        Self {
            mono: false,
            ..Self::silent_mono()
        }
    }

    fn upmix(&mut self, frames: usize) {
        if self.mono {
            self.right[..frames].copy_from_slice(&self.left[..frames]);
            self.mono = false;
        }
    }

    fn add(&mut self, other: &Bus, frames: usize) {
        if !other.mono {
            self.upmix(frames);
        }
        for i in 0..frames {
            self.left[i] += other.left[i];
        }
        if !self.mono {
            let right = if other.mono { &other.left } else { &other.right };
            for i in 0..frames {
                self.right[i] += right[i];
            }
        }
    }

    fn downmixed(&self, frames: usize) -> Bus {
        let mut out = Bus::silent_mono();
        if self.mono {
            out.left[..frames].copy_from_slice(&self.left[..frames]);
        } else {
            for i in 0..frames {
                out.left[i] = 0.5 * (self.left[i] + self.right[i]);
            }
        }
        out
    }
}

struct GraphInner {
    sample_rate: u32,
    state: GraphState,
    frame: u64,
    next_id: u64,
    destination: NodeId,
    nodes: HashMap<NodeId, NodeKind>,
    connections: Vec<Connection>,
    order: Option<Vec<NodeId>>,
}

impl GraphInner {
    fn ensure_open(&self) -> Result<()> {
        if self.state == GraphState::Closed {
            return Err(Error::Graph("audio graph is closed".to_string()));
        }
        Ok(())
    }

    fn add_node(&mut self, kind: NodeKind) -> Result<NodeId> {
        self.ensure_open()?;
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, kind);
        Ok(id)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeKind> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| Error::Graph(format!("unknown node {:?}", id)))
    }

    /// True if `target` is reachable from `start` along connections
    fn reaches(&self, start: NodeId, target: NodeId) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if seen.insert(id) {
                stack.extend(
                    self.connections
                        .iter()
                        .filter(|c| c.from == id)
                        .map(|c| c.to),
                );
            }
        }
        false
    }

    /// Dependency order of everything feeding the destination
    fn render_order(&mut self) -> Vec<NodeId> {
        if let Some(order) = &self.order {
            return order.clone();
        }
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited = HashSet::new();
        // Iterative post-order DFS over incoming edges
        let mut stack = vec![(self.destination, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            stack.push((id, true));
            for c in self.connections.iter().filter(|c| c.to == id) {
                if !visited.contains(&c.from) {
                    stack.push((c.from, false));
                }
            }
        }
        self.order = Some(order.clone());
        order
    }

    fn gather_input(
        &self,
        node: NodeId,
        input: usize,
        outputs: &HashMap<NodeId, Vec<Bus>>,
        frames: usize,
    ) -> Bus {
        let mut sum = Bus::silent_mono();
        for c in self
            .connections
            .iter()
            .filter(|c| c.to == node && c.input == input)
        {
            if let Some(bus) = outputs.get(&c.from).and_then(|o| o.get(c.output)) {
                sum.add(bus, frames);
            }
        }
        sum
    }

    fn render_quantum(&mut self, frames: usize) -> Bus {
        let order = self.render_order();
        let mut outputs: HashMap<NodeId, Vec<Bus>> = HashMap::with_capacity(order.len());
        let mut final_mix = Bus::silent_stereo();
        let frame0 = self.frame;
        let sample_rate = self.sample_rate;

        for id in order {
            let input_count = match self.nodes.get(&id) {
                Some(kind) => kind.inputs(),
                None => continue,
            };
            let inputs: Vec<Bus> = (0..input_count)
                .map(|i| self.gather_input(id, i, &outputs, frames))
                .collect();

            let Some(kind) = self.nodes.get_mut(&id) else {
                continue;
            };
            let produced = process_node(kind, inputs, frames, frame0, sample_rate);

            if id == self.destination {
                if let Some(mut mix) = produced.into_iter().next() {
                    mix.upmix(frames);
                    final_mix = mix;
                }
            } else {
                outputs.insert(id, produced);
            }
        }

        self.frame += frames as u64;
        final_mix
    }
}

fn process_node(
    kind: &mut NodeKind,
    mut inputs: Vec<Bus>,
    frames: usize,
    frame0: u64,
    sample_rate: u32,
) -> Vec<Bus> {
    match kind {
        // Destination hands its summed input back to the caller
        NodeKind::Destination => inputs,
        NodeKind::Gain { gain } => {
            let mut bus = inputs.pop().unwrap_or_else(Bus::silent_mono);
            for i in 0..frames {
                let g = gain.advance(frame0 + i as u64);
                bus.left[i] *= g;
                if !bus.mono {
                    bus.right[i] *= g;
                }
            }
            vec![bus]
        }
        NodeKind::Filter { filter } => {
            let mut bus = inputs.pop().unwrap_or_else(Bus::silent_mono);
            for i in 0..frames {
                bus.left[i] = filter.process_sample(0, bus.left[i]);
            }
            if !bus.mono {
                for i in 0..frames {
                    bus.right[i] = filter.process_sample(1, bus.right[i]);
                }
            }
            vec![bus]
        }
        NodeKind::Splitter => {
            let bus = inputs.pop().unwrap_or_else(Bus::silent_mono);
            let mut left = Bus::silent_mono();
            let mut right = Bus::silent_mono();
            left.left[..frames].copy_from_slice(&bus.left[..frames]);
            if !bus.mono {
                right.left[..frames].copy_from_slice(&bus.right[..frames]);
            }
            vec![left, right]
        }
        NodeKind::Merger => {
            let mut out = Bus::silent_stereo();
            if let Some(l) = inputs.first() {
                out.left[..frames].copy_from_slice(&l.downmixed(frames).left[..frames]);
            }
            if let Some(r) = inputs.get(1) {
                out.right[..frames].copy_from_slice(&r.downmixed(frames).left[..frames]);
            }
            vec![out]
        }
        NodeKind::BufferSource {
            buffer,
            looping,
            position,
            state,
        } => {
            let mut out = Bus::silent_stereo();
            if *state == SourceState::Playing {
                let total = buffer.frames();
                for i in 0..frames {
                    if *position >= total {
                        if *looping && total > 0 {
                            *position = 0;
                        } else {
                            *state = SourceState::Stopped;
                            break;
                        }
                    }
                    if let Some(f) = buffer.frame(*position) {
                        out.left[i] = f.left;
                        out.right[i] = f.right;
                    }
                    *position += 1;
                }
            }
            vec![out]
        }
        NodeKind::Element { source } => {
            let mut out = Bus::silent_stereo();
            source.render(&mut out.left[..frames], &mut out.right[..frames], sample_rate);
            vec![out]
        }
        NodeKind::Analyser { meter, window } => {
            let bus = inputs.pop().unwrap_or_else(Bus::silent_mono);
            let mut sum = 0.0f32;
            for i in 0..frames {
                sum += bus.left[i] * bus.left[i];
            }
            let mut count = frames;
            if !bus.mono {
                for i in 0..frames {
                    sum += bus.right[i] * bus.right[i];
                }
                count *= 2;
            }
            if count > 0 {
                window.push_back(sum / count as f32);
                while window.len() > ANALYSER_WINDOW_BLOCKS {
                    window.pop_front();
                }
                let mean = window.iter().sum::<f32>() / window.len() as f32;
                meter.publish(mean.sqrt());
            }
            vec![bus]
        }
    }
}

/// Shared handle to a mixer graph
#[derive(Clone)]
pub struct AudioGraph {
    inner: Arc<Mutex<GraphInner>>,
}

impl std::fmt::Debug for AudioGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("AudioGraph")
            .field("sample_rate", &inner.sample_rate)
            .field("state", &inner.state)
            .field("nodes", &inner.nodes.len())
            .finish()
    }
}

impl AudioGraph {
    /// New graph in the suspended state
    pub fn new(sample_rate: u32) -> Self {
        let destination = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(destination, NodeKind::Destination);
        Self {
            inner: Arc::new(Mutex::new(GraphInner {
                sample_rate,
                state: GraphState::Suspended,
                frame: 0,
                next_id: 1,
                destination,
                nodes,
                connections: Vec::new(),
                order: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GraphInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn sample_rate(&self) -> u32 {
        self.lock().sample_rate
    }

    pub fn state(&self) -> GraphState {
        self.lock().state
    }

    /// Graph clock in seconds
    pub fn current_time(&self) -> f64 {
        let inner = self.lock();
        inner.frame as f64 / inner.sample_rate as f64
    }

    pub fn current_frame(&self) -> u64 {
        self.lock().frame
    }

    pub fn destination(&self) -> NodeId {
        self.lock().destination
    }

    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.lock().nodes.contains_key(&node)
    }

    pub(crate) fn set_running(&self, running: bool) -> Result<()> {
        let mut inner = self.lock();
        inner.ensure_open()?;
        inner.state = if running {
            GraphState::Running
        } else {
            GraphState::Suspended
        };
        Ok(())
    }

    /// Close and drop every node; idempotent
    pub(crate) fn close(&self) {
        let mut inner = self.lock();
        if inner.state == GraphState::Closed {
            return;
        }
        inner.state = GraphState::Closed;
        inner.connections.clear();
        let destination = inner.destination;
        inner.nodes.retain(|id, _| *id == destination);
        inner.order = None;
        debug!("Audio graph closed");
    }

    pub fn create_gain(&self, initial: f32) -> Result<NodeId> {
        self.lock().add_node(NodeKind::Gain {
            gain: AudioParam::new(initial),
        })
    }

    pub fn create_filter(&self, kind: FilterKind, frequency: f64, q: f64) -> Result<NodeId> {
        let mut inner = self.lock();
        let sample_rate = inner.sample_rate;
        inner.add_node(NodeKind::Filter {
            filter: Biquad::new(kind, frequency, q, sample_rate),
        })
    }

    /// 1 stereo input, 2 mono outputs
    pub fn create_splitter(&self) -> Result<NodeId> {
        self.lock().add_node(NodeKind::Splitter)
    }

    /// 2 mono inputs, 1 stereo output
    pub fn create_merger(&self) -> Result<NodeId> {
        self.lock().add_node(NodeKind::Merger)
    }

    /// Buffer player; silent until [`AudioGraph::start_source`]
    pub fn create_buffer_source(&self, buffer: DecodedAudio, looping: bool) -> Result<NodeId> {
        self.lock().add_node(NodeKind::BufferSource {
            buffer,
            looping,
            position: 0,
            state: SourceState::Idle,
        })
    }

    pub fn create_element_source(&self, source: Arc<dyn RenderSource>) -> Result<NodeId> {
        self.lock().add_node(NodeKind::Element { source })
    }

    /// Pass-through node publishing its RMS level
    pub fn create_analyser(&self) -> Result<(NodeId, LevelMeter)> {
        let meter = LevelMeter::default();
        let id = self.lock().add_node(NodeKind::Analyser {
            meter: meter.clone(),
            window: VecDeque::with_capacity(ANALYSER_WINDOW_BLOCKS + 1),
        })?;
        Ok((id, meter))
    }

    /// Connect output 0 of `from` to input 0 of `to`
    pub fn connect(&self, from: NodeId, to: NodeId) -> Result<()> {
        self.connect_port(from, 0, to, 0)
    }

    pub fn connect_port(&self, from: NodeId, output: usize, to: NodeId, input: usize) -> Result<()> {
        let mut inner = self.lock();
        inner.ensure_open()?;

        let outputs = inner
            .nodes
            .get(&from)
            .map(|k| k.outputs())
            .ok_or_else(|| Error::Graph(format!("unknown source node {:?}", from)))?;
        let to_kind = inner
            .nodes
            .get(&to)
            .ok_or_else(|| Error::Graph(format!("unknown target node {:?}", to)))?;
        let inputs = to_kind.inputs();

        if output >= outputs {
            return Err(Error::Graph(format!("{:?} has no output {}", from, output)));
        }
        if input >= inputs {
            return Err(Error::Graph(format!(
                "{} {:?} has no input {}",
                to_kind.name(),
                to,
                input
            )));
        }

        let conn = Connection {
            from,
            output,
            to,
            input,
        };
        if inner.connections.contains(&conn) {
            return Ok(());
        }
        if from == to || inner.reaches(to, from) {
            return Err(Error::Graph("connection would create a cycle".to_string()));
        }

        inner.connections.push(conn);
        inner.order = None;
        Ok(())
    }

    /// Drop every outgoing connection of `node`
    pub fn disconnect(&self, node: NodeId) {
        let mut inner = self.lock();
        inner.connections.retain(|c| c.from != node);
        inner.order = None;
    }

    /// Drop connections from `from` to `to`
    pub fn disconnect_from(&self, from: NodeId, to: NodeId) {
        let mut inner = self.lock();
        inner.connections.retain(|c| !(c.from == from && c.to == to));
        inner.order = None;
    }

    pub fn is_connected(&self, from: NodeId, to: NodeId) -> bool {
        self.lock()
            .connections
            .iter()
            .any(|c| c.from == from && c.to == to)
    }

    /// Remove a node and all its connections; unknown nodes are ignored
    pub fn remove(&self, node: NodeId) {
        let mut inner = self.lock();
        if node == inner.destination {
            return;
        }
        inner.nodes.remove(&node);
        inner.connections.retain(|c| c.from != node && c.to != node);
        inner.order = None;
    }

    pub fn set_gain(&self, node: NodeId, value: f32) -> Result<()> {
        match self.lock().node_mut(node)? {
            NodeKind::Gain { gain } => {
                gain.set_value(value);
                Ok(())
            }
            other => Err(Error::Graph(format!("{} has no gain", other.name()))),
        }
    }

    pub fn gain(&self, node: NodeId) -> Result<f32> {
        match self.lock().node_mut(node)? {
            NodeKind::Gain { gain } => Ok(gain.value()),
            other => Err(Error::Graph(format!("{} has no gain", other.name()))),
        }
    }

    /// Exponential ramp from the current gain to `target` over `seconds`
    pub fn ramp_gain_exponential(&self, node: NodeId, target: f32, seconds: f64) -> Result<()> {
        let mut inner = self.lock();
        let now = inner.frame;
        let frames = (seconds.max(0.0) * inner.sample_rate as f64).round() as u64;
        match inner.node_mut(node)? {
            NodeKind::Gain { gain } => {
                gain.exponential_ramp_to(target, now, frames);
                Ok(())
            }
            other => Err(Error::Graph(format!("{} has no gain", other.name()))),
        }
    }

    pub fn set_filter_frequency(&self, node: NodeId, frequency: f64) -> Result<()> {
        match self.lock().node_mut(node)? {
            NodeKind::Filter { filter } => {
                filter.set_frequency(frequency);
                Ok(())
            }
            other => Err(Error::Graph(format!("{} has no frequency", other.name()))),
        }
    }

    pub fn filter_frequency(&self, node: NodeId) -> Result<f64> {
        match self.lock().node_mut(node)? {
            NodeKind::Filter { filter } => Ok(filter.frequency()),
            other => Err(Error::Graph(format!("{} has no frequency", other.name()))),
        }
    }

    pub fn start_source(&self, node: NodeId) -> Result<()> {
        match self.lock().node_mut(node)? {
            NodeKind::BufferSource { state, .. } => match state {
                SourceState::Idle => {
                    *state = SourceState::Playing;
                    Ok(())
                }
                _ => Err(Error::Graph("buffer source already started".to_string())),
            },
            other => Err(Error::Graph(format!("{} cannot be started", other.name()))),
        }
    }

    /// Stop a buffer source; stopping twice is fine
    pub fn stop_source(&self, node: NodeId) -> Result<()> {
        match self.lock().node_mut(node)? {
            NodeKind::BufferSource { state, .. } => {
                *state = SourceState::Stopped;
                Ok(())
            }
            other => Err(Error::Graph(format!("{} cannot be stopped", other.name()))),
        }
    }

    /// Render interleaved stereo into `out`
    ///
    /// A graph that is not running writes silence and keeps its clock.
    pub fn render(&self, out: &mut [f32]) {
        let mut inner = self.lock();
        if inner.state != GraphState::Running {
            out.fill(0.0);
            return;
        }
        for chunk in out.chunks_mut(RENDER_QUANTUM * 2) {
            let frames = chunk.len() / 2;
            let mix = inner.render_quantum(frames);
            for (i, frame) in chunk.chunks_exact_mut(2).enumerate() {
                frame[0] = mix.left[i];
                frame[1] = mix.right[i];
            }
            if chunk.len() % 2 == 1 {
                if let Some(last) = chunk.last_mut() {
                    *last = 0.0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(sample_rate: u32) -> AudioGraph {
        let graph = AudioGraph::new(sample_rate);
        graph.set_running(true).unwrap();
        graph
    }

    fn dc(left: f32, right: f32, frames: usize) -> DecodedAudio {
        let mut samples = Vec::with_capacity(frames * 2);
        for _ in 0..frames {
            samples.push(left);
            samples.push(right);
        }
        DecodedAudio::new(samples, 44_100)
    }

    #[test]
    fn test_suspended_graph_renders_silence_and_holds_clock() {
        let graph = AudioGraph::new(44_100);
        let src = graph.create_buffer_source(dc(0.5, 0.5, 1_000), true).unwrap();
        graph.connect(src, graph.destination()).unwrap();
        graph.start_source(src).unwrap();

        let mut out = vec![1.0; 256];
        graph.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(graph.current_frame(), 0);
    }

    #[test]
    fn test_gain_scales_source() {
        let graph = running(44_100);
        let src = graph.create_buffer_source(dc(0.5, -0.5, 1_000), true).unwrap();
        let gain = graph.create_gain(0.5).unwrap();
        graph.connect(src, gain).unwrap();
        graph.connect(gain, graph.destination()).unwrap();
        graph.start_source(src).unwrap();

        let mut out = vec![0.0; 64];
        graph.render(&mut out);
        assert!((out[0] - 0.25).abs() < 1e-6);
        assert!((out[1] + 0.25).abs() < 1e-6);
        assert_eq!(graph.current_frame(), 32);
    }

    #[test]
    fn test_split_invert_merge_cancels_center() {
        let graph = running(44_100);
        let src = graph.create_buffer_source(dc(0.8, 0.3, 1_000), true).unwrap();
        let split = graph.create_splitter().unwrap();
        let merge = graph.create_merger().unwrap();
        let inv_l = graph.create_gain(-1.0).unwrap();
        let inv_r = graph.create_gain(-1.0).unwrap();

        graph.connect(src, split).unwrap();
        graph.connect_port(split, 0, merge, 0).unwrap();
        graph.connect_port(split, 1, inv_r, 0).unwrap();
        graph.connect_port(inv_r, 0, merge, 0).unwrap();
        graph.connect_port(split, 1, merge, 1).unwrap();
        graph.connect_port(split, 0, inv_l, 0).unwrap();
        graph.connect_port(inv_l, 0, merge, 1).unwrap();
        graph.connect(merge, graph.destination()).unwrap();
        graph.start_source(src).unwrap();

        let mut out = vec![0.0; 16];
        graph.render(&mut out);
        assert!((out[0] - 0.5).abs() < 1e-6, "L - R, got {}", out[0]);
        assert!((out[1] + 0.5).abs() < 1e-6, "R - L, got {}", out[1]);
    }

    #[test]
    fn test_mono_fan_in_upmixes() {
        let graph = running(44_100);
        let src = graph.create_buffer_source(dc(0.4, 0.2, 1_000), true).unwrap();
        let split = graph.create_splitter().unwrap();
        graph.connect(src, split).unwrap();
        // mono output 0 straight into the stereo destination
        graph.connect_port(split, 0, graph.destination(), 0).unwrap();
        graph.start_source(src).unwrap();

        let mut out = vec![0.0; 8];
        graph.render(&mut out);
        assert!((out[0] - 0.4).abs() < 1e-6);
        assert!((out[1] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_cycle_rejected() {
        let graph = running(44_100);
        let a = graph.create_gain(1.0).unwrap();
        let b = graph.create_gain(1.0).unwrap();
        graph.connect(a, b).unwrap();
        assert!(matches!(graph.connect(b, a), Err(Error::Graph(_))));
        assert!(graph.connect(a, a).is_err());
    }

    #[test]
    fn test_bad_ports_rejected() {
        let graph = running(44_100);
        let gain = graph.create_gain(1.0).unwrap();
        let merge = graph.create_merger().unwrap();
        assert!(graph.connect_port(gain, 1, merge, 0).is_err());
        assert!(graph.connect_port(gain, 0, merge, 2).is_err());
        assert!(graph.connect(graph.destination(), gain).is_err());
    }

    #[test]
    fn test_non_looping_source_stops() {
        let graph = running(44_100);
        let src = graph.create_buffer_source(dc(1.0, 1.0, 10), false).unwrap();
        graph.connect(src, graph.destination()).unwrap();
        graph.start_source(src).unwrap();

        let mut out = vec![0.0; 40];
        graph.render(&mut out);
        assert_eq!(out[18], 1.0);
        assert_eq!(out[20], 0.0);
        // Stopping an ended source is tolerated
        graph.stop_source(src).unwrap();
        graph.stop_source(src).unwrap();
    }

    #[test]
    fn test_analyser_publishes_rms() {
        let graph = running(44_100);
        let src = graph.create_buffer_source(dc(0.5, 0.5, 4_096), true).unwrap();
        let (analyser, meter) = graph.create_analyser().unwrap();
        graph.connect(src, analyser).unwrap();
        graph.connect(analyser, graph.destination()).unwrap();
        graph.start_source(src).unwrap();

        let mut out = vec![0.0; 1_024];
        graph.render(&mut out);
        assert!((meter.rms() - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_exponential_ramp_on_clock() {
        let graph = running(1_000);
        let gain = graph.create_gain(1.0).unwrap();
        graph.connect(gain, graph.destination()).unwrap();
        graph.ramp_gain_exponential(gain, 0.001, 0.05).unwrap();
        let mut out = vec![0.0; 200];
        graph.render(&mut out);
        assert!((graph.gain(gain).unwrap() - 0.001).abs() < 1e-6);
    }

    #[test]
    fn test_close_is_idempotent_and_blocks_creation() {
        let graph = running(44_100);
        graph.create_gain(1.0).unwrap();
        graph.close();
        graph.close();
        assert_eq!(graph.state(), GraphState::Closed);
        assert_eq!(graph.node_count(), 1);
        assert!(graph.create_gain(1.0).is_err());
        assert!(graph.set_running(true).is_err());
    }

    #[test]
    fn test_remove_drops_connections() {
        let graph = running(44_100);
        let gain = graph.create_gain(1.0).unwrap();
        graph.connect(gain, graph.destination()).unwrap();
        graph.remove(gain);
        assert!(!graph.contains(gain));
        assert!(!graph.is_connected(gain, graph.destination()));
        assert!(graph.set_gain(gain, 0.5).is_err());
    }
}
