//! Bounded handoff queue between the identifier loader and the entity-loader pool.
//!
//! One producer, many consumers. `put` blocks while the queue is full, `take` while it is empty;
//! both wake immediately when the run's [`CancelToken`] is cancelled. Dropping (or `complete`-ing)
//! the producer is the "no more identifiers" signal: consumers drain what is left, then see
//! `Ok(None)`.

use crossbeam_channel::{Receiver, Sender, bounded, select};
use thiserror::Error;

use crate::engine::cancel::CancelToken;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("handoff queue cancelled")]
    Cancelled,
    /// Every consumer is gone; nothing will ever take the item.
    #[error("handoff queue has no consumers left")]
    Disconnected,
}

pub struct QueueProducer<T> {
    tx: Sender<T>,
    cancel: CancelToken,
}

#[derive(Clone)]
pub struct QueueConsumer<T> {
    rx: Receiver<T>,
    cancel: CancelToken,
}

pub fn handoff_queue<T>(capacity: usize, cancel: &CancelToken) -> (QueueProducer<T>, QueueConsumer<T>) {
    let (tx, rx) = bounded::<T>(capacity.max(1));
    (
        QueueProducer {
            tx,
            cancel: cancel.clone(),
        },
        QueueConsumer {
            rx,
            cancel: cancel.clone(),
        },
    )
}

impl<T> QueueProducer<T> {
    pub fn put(&self, item: T) -> Result<(), QueueError> {
        if self.cancel.is_cancelled() {
            return Err(QueueError::Cancelled);
        }
        select! {
            send(self.tx, item) -> res => res.map_err(|_| QueueError::Disconnected),
            recv(self.cancel.receiver()) -> _ => Err(QueueError::Cancelled),
        }
    }

    /// Signal that no more batches follow.
    pub fn complete(self) {
        drop(self);
    }
}

impl<T> QueueConsumer<T> {
    /// `Ok(Some(batch))`, or `Ok(None)` once the producer completed and the queue is drained.
    pub fn take(&self) -> Result<Option<T>, QueueError> {
        if self.cancel.is_cancelled() {
            return Err(QueueError::Cancelled);
        }
        select! {
            recv(self.rx) -> msg => Ok(msg.ok()),
            recv(self.cancel.receiver()) -> _ => Err(QueueError::Cancelled),
        }
    }
}
