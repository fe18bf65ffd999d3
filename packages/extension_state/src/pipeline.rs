use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::broadcaster::{Broadcaster, PublishReport};
use crate::normalizer::{EventRecord, Normalized, normalize};
use crate::store::StateStore;

/// Counters for the steady-state event path
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Records received from upstream
    pub events_received: AtomicU64,
    /// Device updates applied and published
    pub device_updates: AtomicU64,
    /// Frames delivered to subscribers
    pub frames_delivered: AtomicU64,
    /// Frames dropped for slow or departed subscribers
    pub frames_dropped: AtomicU64,
    /// Records skipped because the pipeline fell behind upstream
    pub events_lagged: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_publish(&self, report: &PublishReport) {
        self.device_updates.fetch_add(1, Ordering::Relaxed);
        self.frames_delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.frames_dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            device_updates: self.device_updates.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            events_lagged: self.events_lagged.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSnapshot {
    pub events_received: u64,
    pub device_updates: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub events_lagged: u64,
}

/// Steady-state handling: normalize, store, publish.
#[derive(Clone)]
pub struct EventPipeline {
    store: Arc<StateStore>,
    broadcaster: Arc<Broadcaster>,
    stats: Arc<PipelineStats>,
}

impl EventPipeline {
    pub fn new(store: Arc<StateStore>, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            store,
            broadcaster,
            stats: Arc::new(PipelineStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    /// Handle one record. Returns the publish outcome for device updates.
    pub async fn handle<R: EventRecord + ?Sized>(&self, record: &R) -> Option<PublishReport> {
        self.stats.events_received.fetch_add(1, Ordering::Relaxed);

        match normalize(record) {
            Normalized::Device(update) => {
                self.store.upsert(&update.extension, update.status).await;
                info!(extension = %update.extension, status = %update.status, "Device state changed");
                let report = self
                    .broadcaster
                    .publish(&update.extension, update.status)
                    .await;
                self.stats.record_publish(&report);
                Some(report)
            }
            Normalized::Other { event, noisy } => {
                if !noisy {
                    debug!(event = %event, "Unhandled event");
                }
                None
            }
            Normalized::ListComplete | Normalized::Ignored => None,
        }
    }

    /// Consume `events` until the sender side closes.
    pub async fn run<R>(self, mut events: broadcast::Receiver<R>)
    where
        R: EventRecord + Clone + Send,
    {
        info!("Event pipeline started");
        loop {
            match events.recv().await {
                Ok(record) => {
                    self.handle(&record).await;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.stats.events_lagged.fetch_add(n, Ordering::Relaxed);
                    warn!(skipped = n, "Event pipeline lagged behind upstream");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        info!("Event pipeline stopped");
    }
}
