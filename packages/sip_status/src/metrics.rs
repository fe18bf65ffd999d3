//! Server metrics for observability

use extension_state::{PipelineSnapshot, SyncReport};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Currently open event streams
    pub active_connections: AtomicU64,
    /// Event streams opened since server start
    pub total_connections: AtomicU64,

    // Auth metrics
    pub logins_succeeded: AtomicU64,
    pub logins_failed: AtomicU64,

    /// Synthetic updates sent through the debug hook
    pub test_updates: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    // Connection tracking
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn login_attempt(&self, succeeded: bool) {
        if succeeded {
            self.logins_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.logins_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn test_update_sent(&self) {
        self.test_updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of the server's own counters. Pipeline and sync
    /// figures live in `extension_state` and are attached by the caller.
    pub fn snapshot(&self, pipeline: PipelineSnapshot, sync: Option<SyncReport>) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
            },
            logins: LoginMetrics {
                succeeded: self.logins_succeeded.load(Ordering::Relaxed),
                failed: self.logins_failed.load(Ordering::Relaxed),
            },
            test_updates: self.test_updates.load(Ordering::Relaxed),
            pipeline,
            sync,
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub logins: LoginMetrics,
    pub test_updates: u64,
    pub pipeline: PipelineSnapshot,
    /// Absent until the startup sync has finished
    pub sync: Option<SyncReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginMetrics {
    pub succeeded: u64,
    pub failed: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub upstream_connected: bool,
    pub synced: bool,
    pub extensions: usize,
    pub connections: u64,
    pub uptime_secs: u64,
}
