use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

use crate::endpoint::{DeviceStatus, Extension, is_visible};
use crate::frame::format_update;
use crate::normalizer::DeviceUpdate;
use crate::outbox::{Offer, Outbox, outbox};

/// Per-subscriber queue depth
pub const SUBSCRIBER_CAPACITY: usize = 100;

/// How long one publish waits on a full subscriber queue before dropping
pub const DELIVERY_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct SubscriberId(pub u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// What a subscriber receives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusMessage {
    /// Already formatted and filtered; forward verbatim
    Frame(String),
    /// Unfiltered update; the receiver formats it and applies visibility
    Update(DeviceUpdate),
}

/// Outcome of one fan-out pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Skipped by the visibility rule
    pub hidden: usize,
    /// Timed out or receiver already gone
    pub dropped: usize,
}

struct Subscriber {
    outbox: Outbox<StatusMessage>,
    authenticated: bool,
}

type Registry = Arc<RwLock<HashMap<SubscriberId, Subscriber>>>;

/// Fans device updates out to every connected viewer.
///
/// Publishing holds the registry's read lock for the whole pass, so
/// subscribe/unsubscribe may wait up to `subscribers * timeout`.
pub struct Broadcaster {
    subscribers: Registry,
    next_id: AtomicU64,
    capacity: usize,
    timeout: Duration,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::with_limits(SUBSCRIBER_CAPACITY, DELIVERY_TIMEOUT)
    }

    pub fn with_limits(capacity: usize, timeout: Duration) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            capacity,
            timeout,
        }
    }

    /// Register a new subscriber. The returned [`Unsubscribe`] removes it
    /// again, either explicitly or when dropped.
    pub async fn subscribe(
        &self,
        authenticated: bool,
    ) -> (mpsc::Receiver<StatusMessage>, Unsubscribe) {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (outbox, rx) = outbox(self.capacity, self.timeout);

        let count = {
            let mut subscribers = self.subscribers.write().await;
            subscribers.insert(
                id,
                Subscriber {
                    outbox,
                    authenticated,
                },
            );
            subscribers.len()
        };
        debug!(subscriber = %id, authenticated, clients = count, "Subscriber added");

        let unsubscribe = Unsubscribe {
            id,
            subscribers: self.subscribers.clone(),
            done: false,
        };
        (rx, unsubscribe)
    }

    /// Send a formatted update to every subscriber allowed to see `extension`.
    pub async fn publish(&self, extension: &Extension, status: DeviceStatus) -> PublishReport {
        let frame = format_update(extension, status);
        let mut report = PublishReport::default();

        let subscribers = self.subscribers.read().await;
        for (id, subscriber) in subscribers.iter() {
            if !is_visible(extension, subscriber.authenticated) {
                report.hidden += 1;
                continue;
            }
            match subscriber
                .outbox
                .offer(StatusMessage::Frame(frame.clone()))
                .await
            {
                Offer::Delivered => report.delivered += 1,
                Offer::TimedOut => {
                    report.dropped += 1;
                    warn!(
                        subscriber = %id,
                        extension = %extension,
                        status = %status,
                        "Subscriber queue full, dropping update"
                    );
                }
                Offer::Closed => {
                    report.dropped += 1;
                    debug!(subscriber = %id, "Subscriber gone before unsubscribe");
                }
            }
        }
        drop(subscribers);

        debug!(
            extension = %extension,
            status = %status,
            delivered = report.delivered,
            hidden = report.hidden,
            dropped = report.dropped,
            "Published update"
        );
        report
    }

    /// Send a structured update to every subscriber with no filtering.
    /// Receivers are responsible for visibility.
    pub async fn broadcast(&self, update: DeviceUpdate) -> PublishReport {
        let mut report = PublishReport::default();

        let subscribers = self.subscribers.read().await;
        for (id, subscriber) in subscribers.iter() {
            match subscriber
                .outbox
                .offer(StatusMessage::Update(update.clone()))
                .await
            {
                Offer::Delivered => report.delivered += 1,
                Offer::TimedOut => {
                    report.dropped += 1;
                    warn!(subscriber = %id, extension = %update.extension, "Subscriber queue full, dropping broadcast");
                }
                Offer::Closed => report.dropped += 1,
            }
        }
        report
    }

    pub async fn client_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

/// Single-use removal of one subscription.
///
/// Dropping it without calling [`unsubscribe`](Self::unsubscribe) still
/// removes the subscription.
#[must_use = "dropping an Unsubscribe removes the subscription immediately"]
pub struct Unsubscribe {
    id: SubscriberId,
    subscribers: Registry,
    done: bool,
}

impl Unsubscribe {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// If this future is dropped while waiting for the registry, the
    /// removal falls back to `Drop`.
    pub async fn unsubscribe(mut self) {
        let remaining = {
            let mut subscribers = self.subscribers.write().await;
            subscribers.remove(&self.id);
            self.done = true;
            subscribers.len()
        };
        debug!(subscriber = %self.id, clients = remaining, "Subscriber removed");
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Ok(mut subscribers) = self.subscribers.try_write() {
            subscribers.remove(&self.id);
            debug!(subscriber = %self.id, "Subscriber removed on drop");
            return;
        }
        // Lock busy (a publish is in flight): finish the removal on the runtime
        let id = self.id;
        let registry = self.subscribers.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    registry.write().await.remove(&id);
                    debug!(subscriber = %id, "Subscriber removed on drop");
                });
            }
            Err(_) => warn!(subscriber = %id, "No runtime to remove dropped subscriber"),
        }
    }
}
