//! One of the engine's two playback channels
//!
//! A channel is a [`MediaElement`] plus its fade slot and the mixer node the
//! element renders through. The engine owns two of them: the active one the
//! listener hears and a standby one used for preloading.

use crate::audio::graph::{AudioGraph, NodeId};
use crate::error::{Error, Result};
use crate::playback::element::{LoadStatus, MediaElement, ReadyState};
use crate::playback::fader::{FadeHandle, FadeSlot};
use std::time::Duration;
use tokio::sync::watch;
use yaytsa_common::FadeCurve;

pub struct PlaybackChannel {
    element: MediaElement,
    fades: FadeSlot,
    node: Option<NodeId>,
}

impl std::fmt::Debug for PlaybackChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackChannel")
            .field("element", &self.element)
            .field("node", &self.node)
            .finish()
    }
}

impl PlaybackChannel {
    /// Channel that is not attached to any mixer
    pub fn detached(element: MediaElement) -> Self {
        Self {
            element,
            fades: FadeSlot::new(),
            node: None,
        }
    }

    /// Channel rendering into `bus` of `graph`
    pub fn wired(element: MediaElement, graph: &AudioGraph, bus: NodeId) -> Result<Self> {
        let node = graph.create_element_source(element.render_source())?;
        if let Err(e) = graph.connect(node, bus) {
            graph.remove(node);
            return Err(e);
        }
        Ok(Self {
            element,
            fades: FadeSlot::new(),
            node: Some(node),
        })
    }

    pub fn element(&self) -> &MediaElement {
        &self.element
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    /// Fade the element volume, cancelling this channel's previous fade
    pub fn fade(&self, from: f32, to: f32, duration: Duration, curve: FadeCurve) -> FadeHandle {
        self.fades.start(self.element.clone(), from, to, duration, curve)
    }

    pub fn cancel_fade(&self) {
        self.fades.cancel();
    }

    /// True when `url` is the source and it is playable
    pub fn holds(&self, url: &str) -> bool {
        self.element.src().as_deref() == Some(url) && self.element.is_ready()
    }

    /// True when `url` is the source and it has not failed
    pub fn is_loading_or_holds(&self, url: &str) -> bool {
        if self.element.src().as_deref() != Some(url) {
            return false;
        }
        !matches!(
            self.element.load_status().borrow().state,
            ReadyState::Failed(_) | ReadyState::Idle
        )
    }

    /// Wait for the load with sequence number `seq` to settle
    ///
    /// A newer load or a release resolves as [`Error::Cancelled`].
    pub async fn wait_ready(&self, seq: u64) -> Result<()> {
        wait_for_load(self.element.load_status(), seq).await
    }

    /// Stop playback, cancel fades and detach from the graph
    pub fn release(&self, graph: Option<&AudioGraph>) {
        self.fades.cancel();
        self.element.release();
        if let (Some(graph), Some(node)) = (graph, self.node) {
            graph.remove(node);
        }
    }
}

async fn wait_for_load(mut status: watch::Receiver<LoadStatus>, seq: u64) -> Result<()> {
    loop {
        {
            let current = status.borrow_and_update();
            if current.seq != seq {
                return Err(Error::Cancelled);
            }
            match &current.state {
                ReadyState::Ready => return Ok(()),
                ReadyState::Failed(msg) => return Err(Error::Load(msg.clone())),
                ReadyState::Idle => return Err(Error::Cancelled),
                ReadyState::Loading => {}
            }
        }
        if status.changed().await.is_err() {
            return Err(Error::Cancelled);
        }
    }
}
