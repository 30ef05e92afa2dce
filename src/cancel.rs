//! Cooperative cancellation.
//!
//! Every public engine operation takes a `Cancel`; CPU-bound loops check
//! it between iterations, blocking waits poll it. A token may carry a
//! deadline so callers can bound per-repository work.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;

/// The operation was cancelled before it completed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Cancellation token.
///
/// Clones share one flag: cancelling any handle cancels them all. A
/// deadline only narrows the handle it was derived on (and its clones).
#[derive(Clone, Debug, Default)]
pub struct Cancel {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation on this token and every clone of it.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::Relaxed) {
            return true;
        }
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// Return an error if cancelled; call between iterations of long loops.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() { Err(Cancelled) } else { Ok(()) }
    }

    /// Derive a handle that additionally expires after `timeout`.
    ///
    /// The derived handle shares the parent's flag; an existing earlier
    /// deadline is kept.
    pub fn with_timeout(&self, timeout: Duration) -> Cancel {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing <= candidate => existing,
            _ => candidate,
        };
        Cancel {
            flag: Arc::clone(&self.flag),
            deadline: Some(deadline),
        }
    }
}
