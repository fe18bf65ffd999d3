//! Bounded queue with a bounded wait on the sending side.
//!
//! Every delivery to a viewer goes through an [`Outbox`]: the broadcaster's
//! per-subscriber queues and each session's output to its client. A full
//! queue makes the sender wait up to the configured timeout, after which the
//! item is dropped for that receiver only.

use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Offer {
    Delivered,
    /// Queue stayed full for the whole timeout; item dropped
    TimedOut,
    /// Receiver is gone; item dropped
    Closed,
}

pub struct Outbox<T> {
    tx: mpsc::Sender<T>,
    timeout: Duration,
}

// Derive would demand `T: Clone`
impl<T> Clone for Outbox<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            timeout: self.timeout,
        }
    }
}

impl<T> std::fmt::Debug for Outbox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("capacity", &self.tx.max_capacity())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Create an outbox holding up to `capacity` items.
pub fn outbox<T>(capacity: usize, timeout: Duration) -> (Outbox<T>, mpsc::Receiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Outbox { tx, timeout }, rx)
}

impl<T> Outbox<T> {
    pub async fn offer(&self, item: T) -> Offer {
        match tokio::time::timeout(self.timeout, self.tx.send(item)).await {
            Ok(Ok(())) => Offer::Delivered,
            Ok(Err(_)) => Offer::Closed,
            Err(_) => Offer::TimedOut,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
