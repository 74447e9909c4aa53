//! Cooperative cancellation shared by every thread of a run.
//!
//! A token is a flag plus a channel nobody ever sends on. Cancelling drops the only sender, so any
//! `select!` arm receiving from [`CancelToken::receiver`] fires at once in every waiting thread.

use crossbeam_channel::{Receiver, Sender, bounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::MassIndexingError;
use crate::utils::lock_or_recover;

struct Inner {
    cancelled: AtomicBool,
    wake_tx: Mutex<Option<Sender<()>>>,
    children: Mutex<Vec<CancelToken>>,
}

#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
    wake_rx: Receiver<()>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = bounded::<()>(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                wake_tx: Mutex::new(Some(wake_tx)),
                children: Mutex::new(Vec::new()),
            }),
            wake_rx,
        }
    }

    /// Token cancelled together with `self`, but which can also be cancelled on its own
    /// (used to abort a single type group without touching the others).
    pub fn child(&self) -> CancelToken {
        let child = CancelToken::new();
        let mut children = lock_or_recover(&self.inner.children);
        if self.is_cancelled() {
            drop(children);
            child.cancel();
        } else {
            children.push(child.clone());
        }
        child
    }

    /// Idempotent. Wakes every thread blocked in a `select!` on [`Self::receiver`].
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        drop(lock_or_recover(&self.inner.wake_tx).take());
        let children = std::mem::take(&mut *lock_or_recover(&self.inner.children));
        for child in children {
            child.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Disconnects when the token is cancelled. Never yields a message.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.wake_rx
    }

    /// `Err(Cancelled)` naming `stage` when the token has been cancelled.
    pub fn check(&self, stage: &str) -> Result<(), MassIndexingError> {
        if self.is_cancelled() {
            Err(MassIndexingError::cancelled(stage))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::select;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_cancel_wakes_blocked_waiters() {
        let token = CancelToken::new();
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let t = token.clone();
                thread::spawn(move || {
                    select! {
                        recv(t.receiver()) -> msg => msg.is_err(),
                    }
                })
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        for h in handles {
            assert!(h.join().unwrap());
        }
    }

    #[test]
    fn test_child_follows_parent_but_not_reverse() {
        let parent = CancelToken::new();
        let a = parent.child();
        let b = parent.child();
        a.cancel();
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert!(!parent.is_cancelled());
        parent.cancel();
        assert!(b.is_cancelled());
        assert!(parent.child().is_cancelled());
    }

    #[test]
    fn test_check_reports_stage() {
        let token = CancelToken::new();
        assert!(token.check("loading entities").is_ok());
        token.cancel();
        token.cancel();
        let err = token.check("loading entities").unwrap_err();
        assert!(err.is_cancelled());
        assert!(err.to_string().contains("loading entities"));
    }
}
