//! Output backends and the shared mixer
//!
//! A [`Mixer`] is an [`AudioGraph`] plus the driver that pulls audio out of
//! it. Backends decide where rendered audio goes:
//! - [`CpalBackend`](crate::audio::output::CpalBackend): the system output device
//! - [`NullBackend`]: rendered in real time and discarded (headless hosts)
//! - [`OfflineBackend`]: never rendered unless the caller does it (tests)

use crate::audio::graph::{AudioGraph, GraphState, NodeId, RENDER_QUANTUM};
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Pulls rendered audio out of a graph
pub trait OutputDriver: Send {
    fn resume(&mut self) -> Result<()>;
    fn suspend(&mut self) -> Result<()>;
    /// Stop pulling for good; idempotent
    fn close(&mut self);
}

/// Factory for output drivers
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Mixer rate to use when `requested` is wanted
    fn negotiate_sample_rate(&self, requested: u32) -> Result<u32> {
        Ok(requested)
    }

    /// Start a driver pulling from `graph`
    fn open(&self, graph: &AudioGraph) -> Result<Box<dyn OutputDriver>>;
}

/// A graph bound to an output
pub struct Mixer {
    graph: AudioGraph,
    driver: Mutex<Option<Box<dyn OutputDriver>>>,
    backend: &'static str,
}

impl std::fmt::Debug for Mixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mixer")
            .field("backend", &self.backend)
            .field("graph", &self.graph)
            .finish()
    }
}

impl Mixer {
    /// Open a mixer on `backend`; the graph starts suspended
    pub fn open(backend: &dyn AudioBackend, sample_rate: u32) -> Result<Arc<Self>> {
        let rate = backend.negotiate_sample_rate(sample_rate)?;
        if rate != sample_rate {
            info!(
                "{} output runs at {}Hz (requested {}Hz)",
                backend.name(),
                rate,
                sample_rate
            );
        }
        let graph = AudioGraph::new(rate);
        let driver = backend.open(&graph)?;
        debug!("Opened {} mixer at {}Hz", backend.name(), rate);
        Ok(Arc::new(Self {
            graph,
            driver: Mutex::new(Some(driver)),
            backend: backend.name(),
        }))
    }

    pub fn graph(&self) -> &AudioGraph {
        &self.graph
    }

    pub fn destination(&self) -> NodeId {
        self.graph.destination()
    }

    pub fn sample_rate(&self) -> u32 {
        self.graph.sample_rate()
    }

    pub fn state(&self) -> GraphState {
        self.graph.state()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend
    }

    pub fn current_time(&self) -> f64 {
        self.graph.current_time()
    }

    /// Start rendering; no-op when already running
    pub fn resume(&self) -> Result<()> {
        match self.graph.state() {
            GraphState::Running => return Ok(()),
            GraphState::Closed => {
                return Err(Error::AudioOutput("mixer is closed".to_string()));
            }
            GraphState::Suspended => {}
        }
        let mut driver = self.driver.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(driver) = driver.as_mut() {
            driver.resume()?;
        }
        self.graph.set_running(true)?;
        debug!("Mixer resumed");
        Ok(())
    }

    pub fn suspend(&self) -> Result<()> {
        if self.graph.state() != GraphState::Running {
            return Ok(());
        }
        self.graph.set_running(false)?;
        let mut driver = self.driver.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(driver) = driver.as_mut() {
            driver.suspend()?;
        }
        debug!("Mixer suspended");
        Ok(())
    }

    /// Stop the driver and close the graph; idempotent
    pub fn close(&self) {
        let driver = self
            .driver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut driver) = driver {
            driver.close();
        }
        self.graph.close();
    }

    pub fn is_closed(&self) -> bool {
        self.graph.state() == GraphState::Closed
    }
}

impl Drop for Mixer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Real-time rendering into nowhere
#[derive(Debug, Default, Clone)]
pub struct NullBackend;

impl NullBackend {
    pub fn new() -> Self {
        Self
    }
}

struct NullDriver {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AudioBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn open(&self, graph: &AudioGraph) -> Result<Box<dyn OutputDriver>> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let graph = graph.clone();
        let thread = std::thread::Builder::new()
            .name("yaytsa-null-output".to_string())
            .spawn(move || null_render_loop(graph, thread_stop))
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn null output: {}", e)))?;
        Ok(Box::new(NullDriver {
            stop,
            thread: Some(thread),
        }))
    }
}

/// Render one quantum at a time, paced against the wall clock
fn null_render_loop(graph: AudioGraph, stop: Arc<AtomicBool>) {
    let rate = graph.sample_rate().max(1);
    let quantum = Duration::from_secs_f64(RENDER_QUANTUM as f64 / rate as f64);
    let mut scratch = vec![0.0f32; RENDER_QUANTUM * 2];
    let mut deadline = Instant::now();

    while !stop.load(Ordering::Relaxed) {
        graph.render(&mut scratch);
        deadline += quantum;
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        } else if now - deadline > Duration::from_millis(100) {
            // Fell far behind (host suspended); do not try to catch up
            deadline = now;
        }
    }
}

impl OutputDriver for NullDriver {
    fn resume(&mut self) -> Result<()> {
        Ok(())
    }

    fn suspend(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Null output thread panicked");
            }
        }
    }
}

impl Drop for NullDriver {
    fn drop(&mut self) {
        self.close();
    }
}

/// No driver; audio advances only when the caller renders the graph
#[derive(Debug, Default, Clone)]
pub struct OfflineBackend;

impl OfflineBackend {
    pub fn new() -> Self {
        Self
    }
}

struct OfflineDriver;

impl OutputDriver for OfflineDriver {
    fn resume(&mut self) -> Result<()> {
        Ok(())
    }

    fn suspend(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}
}

impl AudioBackend for OfflineBackend {
    fn name(&self) -> &'static str {
        "offline"
    }

    fn open(&self, _graph: &AudioGraph) -> Result<Box<dyn OutputDriver>> {
        Ok(Box::new(OfflineDriver))
    }
}

/// Backend that always fails to open (no audio hardware)
#[derive(Debug, Default, Clone)]
pub struct UnavailableBackend;

impl AudioBackend for UnavailableBackend {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn open(&self, _graph: &AudioGraph) -> Result<Box<dyn OutputDriver>> {
        Err(Error::AudioOutput("no audio output available".to_string()))
    }
}

/// Commands for a driver thread that owns a non-`Send` stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DriverCommand {
    Play,
    Pause,
    Close,
}

/// Driver that forwards commands to a dedicated output thread
pub(crate) struct ThreadDriver {
    pub(crate) commands: mpsc::Sender<DriverCommand>,
    pub(crate) replies: mpsc::Receiver<Result<()>>,
    pub(crate) thread: Option<JoinHandle<()>>,
}

impl ThreadDriver {
    fn send(&mut self, command: DriverCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::AudioOutput("output thread has exited".to_string()))?;
        self.replies
            .recv_timeout(Duration::from_secs(2))
            .map_err(|_| Error::AudioOutput("output thread did not respond".to_string()))?
    }
}

impl OutputDriver for ThreadDriver {
    fn resume(&mut self) -> Result<()> {
        self.send(DriverCommand::Play)
    }

    fn suspend(&mut self) -> Result<()> {
        self.send(DriverCommand::Pause)
    }

    fn close(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.commands.send(DriverCommand::Close);
            if thread.join().is_err() {
                warn!("Output thread panicked");
            }
        }
    }
}

impl Drop for ThreadDriver {
    fn drop(&mut self) {
        self.close();
    }
}
