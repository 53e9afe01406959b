// src/engine/control.rs

//! Lifecycle flag and cancellation plumbing shared between a running
//! controller and its [`RunHandle`](super::RunHandle).

use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::debug;

use crate::errors::RunError;
use crate::types::Lifecycle;

/// Internal stop request raised by the stop policy in parallel mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Halt {
    #[default]
    None,
    /// Schedule nothing new; let in-flight steps finish.
    Graceful,
    /// Cancel in-flight steps at their next suspension point.
    Abrupt,
}

#[derive(Debug)]
pub struct RunControl {
    lifecycle: watch::Sender<Lifecycle>,
    halt: watch::Sender<Halt>,
    abort_reason: Mutex<Option<RunError>>,
    pause_announced: AtomicBool,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        Self {
            lifecycle: watch::Sender::new(Lifecycle::Idle),
            halt: watch::Sender::new(Halt::None),
            abort_reason: Mutex::new(None),
            pause_announced: AtomicBool::new(false),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }

    /// Move to `next` if the lifecycle allows it. Returns whether it moved.
    pub fn transition(&self, next: Lifecycle) -> bool {
        let moved = self.lifecycle.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });
        if moved {
            debug!(lifecycle = %next, "run lifecycle changed");
        }
        moved
    }

    pub fn pause(&self) -> bool {
        self.transition(Lifecycle::Paused)
    }

    pub fn resume(&self) -> bool {
        self.transition(Lifecycle::Running)
    }

    /// Request an abort. The first reason given is kept.
    pub fn request_abort(&self, reason: Option<RunError>) -> bool {
        let moved = self.transition(Lifecycle::Aborting);
        if moved && let Some(reason) = reason {
            let mut slot = self.abort_reason.lock().unwrap_or_else(|e| e.into_inner());
            slot.get_or_insert(reason);
        }
        moved
    }

    pub fn take_abort_reason(&self) -> Option<RunError> {
        self.abort_reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    pub fn is_aborting(&self) -> bool {
        self.lifecycle().is_aborting()
    }

    /// Raise a halt; an abrupt halt is never downgraded.
    pub fn halt(&self, halt: Halt) {
        self.halt.send_if_modified(|current| {
            let stronger = matches!(
                (*current, halt),
                (Halt::None, Halt::Graceful | Halt::Abrupt) | (Halt::Graceful, Halt::Abrupt)
            );
            if stronger {
                *current = halt;
            }
            stronger
        });
    }

    pub fn halted(&self) -> Halt {
        *self.halt.borrow()
    }

    /// Whether no further step may start.
    pub fn should_stop(&self) -> bool {
        self.is_aborting() || self.halted() != Halt::None
    }

    /// Resolves once the run is aborting or abruptly halted.
    pub async fn cancelled(&self) {
        let mut lifecycle = self.lifecycle.subscribe();
        let mut halt = self.halt.subscribe();
        // A closed channel never cancels. Read guards must not live across
        // the pending await.
        let closed = tokio::select! {
            res = lifecycle.wait_for(|l| l.is_aborting()) => res.is_err(),
            res = halt.wait_for(|h| *h == Halt::Abrupt) => res.is_err(),
        };
        if closed {
            std::future::pending::<()>().await;
        }
    }

    /// Drive `fut` unless the run is cancelled first. `None` means
    /// cancelled; the future is dropped at its current suspension point.
    pub async fn cancellable<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancelled() => None,
            out = fut => Some(out),
        }
    }

    /// Item-boundary pause point. Returns `true` when this call observed the
    /// start of a pause episode, and `false` otherwise.
    pub fn begin_pause(&self) -> bool {
        self.lifecycle() == Lifecycle::Paused && !self.pause_announced.swap(true, Ordering::SeqCst)
    }

    /// Wait while paused. Returns `true` when this call observed the end of
    /// the pause episode (the run resumed rather than aborted).
    pub async fn wait_while_paused(&self) -> bool {
        let mut lifecycle = self.lifecycle.subscribe();
        let _ = lifecycle.wait_for(|l| *l != Lifecycle::Paused).await;
        let resumed = self.lifecycle() == Lifecycle::Running;
        resumed && self.pause_announced.swap(false, Ordering::SeqCst)
    }
}
