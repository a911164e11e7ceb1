//! Engine event surface
//!
//! Only the active channel's element events reach subscribers. The
//! forwarder task is re-pointed on every seamless switch. Listener callbacks
//! run on their own task, one event at a time, until unsubscribed or the
//! engine is disposed.

use super::core::{lock, normalize_duration, AudioEngine};
use crate::playback::element::ElementEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use yaytsa_common::{PlaybackState, PlayerEvent};

/// Translate an element event for subscribers
fn to_player_event(event: ElementEvent) -> Option<PlayerEvent> {
    match event {
        ElementEvent::TimeUpdate { position, duration } => Some(PlayerEvent::TimeUpdate {
            position,
            duration: normalize_duration(duration),
        }),
        ElementEvent::Ended => Some(PlayerEvent::Ended),
        ElementEvent::Error(message) => Some(PlayerEvent::Error { message }),
        ElementEvent::Play => Some(PlayerEvent::PlaybackStateChanged {
            state: PlaybackState::Playing,
        }),
        ElementEvent::Pause => Some(PlayerEvent::PlaybackStateChanged {
            state: PlaybackState::Paused,
        }),
        // Loading state is reported by the engine's load itself
        ElementEvent::LoadStart | ElementEvent::CanPlay => None,
    }
}

async fn until_disposed(rx: &mut watch::Receiver<bool>) {
    loop {
        let disposed = *rx.borrow_and_update();
        if disposed || rx.changed().await.is_err() {
            return;
        }
    }
}

/// Registered listener; dropping it leaves the listener running
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    /// Stop receiving events
    pub fn unsubscribe(self) {
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl AudioEngine {
    /// Forward events of the (new) active channel
    pub(super) fn rewire_forwarder(&self) {
        let mut forwarder = lock(&self.inner.forwarder);
        if let Some(task) = forwarder.take() {
            task.abort();
        }
        if self.is_disposed() {
            return;
        }

        let element = self.inner.active().element();
        let mut rx = element.subscribe();
        let events = self.inner.events.clone();
        let name = element.name();
        *forwarder = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Some(event) = to_player_event(event) {
                            let _ = events.send(event);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("{}: {} events dropped", name, skipped);
                    }
                    Err(RecvError::Closed) => return,
                }
            }
        }));
    }

    /// Raw event stream
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.inner.events.subscribe()
    }

    fn listen<F>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(PlayerEvent) + Send + 'static,
    {
        let mut rx = self.inner.events.subscribe();
        let mut disposed = self.inner.disposed.subscribe();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Ok(event) => handler(event),
                        Err(RecvError::Lagged(skipped)) => {
                            debug!("Listener lagged, {} events dropped", skipped);
                        }
                        Err(RecvError::Closed) => return,
                    },
                    _ = until_disposed(&mut disposed) => return,
                }
            }
        });
        Subscription { task }
    }

    /// Called with (position, duration) in seconds
    pub fn on_time_update<F>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(f64, f64) + Send + 'static,
    {
        self.listen(move |event| {
            if let PlayerEvent::TimeUpdate { position, duration } = event {
                handler(position, duration);
            }
        })
    }

    pub fn on_ended<F>(&self, mut handler: F) -> Subscription
    where
        F: FnMut() + Send + 'static,
    {
        self.listen(move |event| {
            if let PlayerEvent::Ended = event {
                handler();
            }
        })
    }

    /// Called with the sanitized error message
    pub fn on_error<F>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(String) + Send + 'static,
    {
        self.listen(move |event| {
            if let PlayerEvent::Error { message } = event {
                handler(message);
            }
        })
    }

    pub fn on_loading_state_changed<F>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(bool) + Send + 'static,
    {
        self.listen(move |event| {
            if let PlayerEvent::LoadingStateChanged { loading } = event {
                handler(loading);
            }
        })
    }

    pub fn on_playback_state_changed<F>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(PlaybackState) + Send + 'static,
    {
        self.listen(move |event| {
            if let PlayerEvent::PlaybackStateChanged { state } = event {
                handler(state);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_events_translate() {
        assert_eq!(
            to_player_event(ElementEvent::TimeUpdate {
                position: 1.0,
                duration: f64::NAN
            }),
            Some(PlayerEvent::TimeUpdate {
                position: 1.0,
                duration: 0.0
            })
        );
        assert_eq!(
            to_player_event(ElementEvent::Pause),
            Some(PlayerEvent::PlaybackStateChanged {
                state: PlaybackState::Paused
            })
        );
        assert_eq!(to_player_event(ElementEvent::CanPlay), None);
    }
}
