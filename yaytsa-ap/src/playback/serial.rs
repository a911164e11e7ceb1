//! Serialized, cancellable async operations
//!
//! An [`OperationQueue`] runs one operation at a time in FIFO order. Each
//! operation carries a generation token; bumping the generation
//! ([`OperationQueue::supersede`] or [`OperationQueue::cancel_all`]) makes
//! every older operation resolve as [`Error::Cancelled`], whether it is still
//! waiting for its turn or already running and awaiting something.

use crate::error::{Error, Result};
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::trace;

/// Generation an operation was issued under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpToken {
    generation: u64,
}

/// Single-worker operation queue
pub struct OperationQueue {
    name: &'static str,
    generation: watch::Sender<u64>,
    turn: Mutex<()>,
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationQueue")
            .field("name", &self.name)
            .field("generation", &*self.generation.borrow())
            .finish()
    }
}

impl OperationQueue {
    pub fn new(name: &'static str) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            name,
            generation,
            turn: Mutex::new(()),
        }
    }

    /// Token for a new operation that invalidates all earlier ones
    pub fn supersede(&self) -> OpToken {
        self.generation.send_modify(|g| *g += 1);
        let generation = *self.generation.borrow();
        trace!("{}: superseded, generation {}", self.name, generation);
        OpToken { generation }
    }

    /// Token for a new operation that queues behind earlier ones
    pub fn ticket(&self) -> OpToken {
        OpToken {
            generation: *self.generation.borrow(),
        }
    }

    /// Invalidate every queued and running operation
    pub fn cancel_all(&self) {
        self.generation.send_modify(|g| *g += 1);
    }

    pub fn is_superseded(&self, token: OpToken) -> bool {
        *self.generation.borrow() != token.generation
    }

    /// Resolves once `token` has been superseded
    pub async fn superseded(&self, token: OpToken) {
        let mut rx = self.generation.subscribe();
        loop {
            if *rx.borrow_and_update() != token.generation {
                return;
            }
            if rx.changed().await.is_err() {
                // Queue dropped; nothing will ever supersede
                std::future::pending::<()>().await;
            }
        }
    }

    /// Wait for this operation's turn
    ///
    /// Fails with [`Error::Cancelled`] if the token is superseded before or
    /// while waiting. The returned guard holds the turn until dropped.
    pub async fn enter(&self, token: OpToken) -> Result<MutexGuard<'_, ()>> {
        if self.is_superseded(token) {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            guard = self.turn.lock() => {
                if self.is_superseded(token) {
                    Err(Error::Cancelled)
                } else {
                    Ok(guard)
                }
            }
            _ = self.superseded(token) => Err(Error::Cancelled),
        }
    }

    /// Run `op` in turn; it is dropped (cancelled) if superseded midway
    pub async fn run<F, T>(&self, token: OpToken, op: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let _turn = self.enter(token).await?;
        tokio::select! {
            result = op => result,
            _ = self.superseded(token) => Err(Error::Cancelled),
        }
    }

    /// Wait until everything queued so far has finished
    pub async fn settle(&self) {
        drop(self.turn.lock().await);
    }
}
