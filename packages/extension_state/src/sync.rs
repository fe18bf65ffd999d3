//! One-shot startup sync: descriptions, then a bulk device-state listing.

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::broadcaster::Broadcaster;
use crate::error::{BoxError, SyncError};
use crate::normalizer::{EventRecord, Normalized, normalize};
use crate::store::StateStore;

/// Longest the sync waits for the listing to finish
pub const SYNC_CEILING: Duration = Duration::from_secs(10);

/// Extension id → human-readable description.
pub trait DescriptionSource: Send + Sync {
    fn descriptions(&self) -> impl Future<Output = Result<HashMap<String, String>, BoxError>> + Send;
}

/// Asks upstream to emit one device-state event per device followed by the
/// list-complete marker. Results arrive on the event stream, not here.
pub trait DeviceStateLister: Send + Sync {
    fn list_device_states(&self) -> impl Future<Output = Result<(), BoxError>> + Send;
}

/// Used when no descriptor store is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDescriptions;

impl DescriptionSource for NoDescriptions {
    async fn descriptions(&self) -> Result<HashMap<String, String>, BoxError> {
        Ok(HashMap::new())
    }
}

impl DescriptionSource for HashMap<String, String> {
    async fn descriptions(&self) -> Result<HashMap<String, String>, BoxError> {
        Ok(self.clone())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Description entries admitted to the store
    pub preloaded: usize,
    /// Device events applied during collection
    pub applied: usize,
    /// Whether the list-complete marker arrived before the ceiling
    pub completed: bool,
    /// Publish calls made for the final snapshot
    pub published: usize,
}

pub struct SyncCoordinator {
    store: Arc<StateStore>,
    broadcaster: Arc<Broadcaster>,
    ceiling: Duration,
}

impl SyncCoordinator {
    pub fn new(store: Arc<StateStore>, broadcaster: Arc<Broadcaster>) -> Self {
        Self::with_ceiling(store, broadcaster, SYNC_CEILING)
    }

    pub fn with_ceiling(
        store: Arc<StateStore>,
        broadcaster: Arc<Broadcaster>,
        ceiling: Duration,
    ) -> Self {
        Self {
            store,
            broadcaster,
            ceiling,
        }
    }

    /// Run the sync. `events` must be subscribed before this is called so the
    /// listing cannot race past it; it is handed back untouched past the
    /// marker for the steady-state pipeline.
    pub async fn run<D, L, R>(
        &self,
        descriptions: &D,
        lister: &L,
        mut events: broadcast::Receiver<R>,
    ) -> (SyncReport, broadcast::Receiver<R>)
    where
        D: DescriptionSource,
        L: DeviceStateLister,
        R: EventRecord + Clone + Send,
    {
        let mut report = SyncReport::default();

        match descriptions.descriptions().await {
            Ok(map) => {
                report.preloaded = self.store.preload(map).await;
                info!(count = report.preloaded, "Loaded extension descriptions");
            }
            Err(e) => {
                let err = SyncError::Descriptions(e);
                warn!(error = %err, "Continuing without descriptions");
            }
        }

        match lister.list_device_states().await {
            Ok(()) => {
                let (applied, completed) = self.collect(&mut events).await;
                report.applied = applied;
                report.completed = completed;
                if !completed {
                    warn!(
                        applied,
                        ceiling = ?self.ceiling,
                        "Device state list incomplete, continuing with partial data"
                    );
                }
            }
            Err(e) => {
                let err = SyncError::ListRequest(e);
                warn!(error = %err, "Continuing with cached state only");
            }
        }

        for endpoint in self.store.snapshot(|_| true).await {
            self.broadcaster
                .publish(&endpoint.extension, endpoint.status)
                .await;
            report.published += 1;
        }

        info!(
            preloaded = report.preloaded,
            applied = report.applied,
            completed = report.completed,
            published = report.published,
            "Initial sync finished"
        );
        (report, events)
    }

    /// Apply device events until the marker or the ceiling.
    async fn collect<R>(&self, events: &mut broadcast::Receiver<R>) -> (usize, bool)
    where
        R: EventRecord + Clone + Send,
    {
        let deadline = Instant::now() + self.ceiling;
        let mut applied = 0;

        loop {
            let record = match tokio::time::timeout_at(deadline, events.recv()).await {
                Err(_) => return (applied, false),
                Ok(Ok(record)) => record,
                Ok(Err(broadcast::error::RecvError::Lagged(n))) => {
                    warn!(skipped = n, "Sync fell behind the event stream");
                    continue;
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    warn!("Event stream closed during sync");
                    return (applied, false);
                }
            };

            match normalize(&record) {
                Normalized::Device(update) => {
                    self.store.upsert(&update.extension, update.status).await;
                    applied += 1;
                }
                Normalized::ListComplete => {
                    debug!(applied, "Device state list complete");
                    return (applied, true);
                }
                Normalized::Ignored | Normalized::Other { .. } => {}
            }
        }
    }
}
