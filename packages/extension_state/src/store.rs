use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::endpoint::{DeviceStatus, Endpoint, Extension, is_visible};

/// Authoritative extension → endpoint map.
///
/// Writers take the lock exclusively for one map operation; snapshots copy
/// out under the shared lock. Entries are never removed.
#[derive(Debug, Default)]
pub struct StateStore {
    endpoints: RwLock<HashMap<Extension, Endpoint>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status of `extension`, creating the entry if needed.
    /// Returns the previous status.
    pub async fn upsert(&self, extension: &Extension, status: DeviceStatus) -> Option<DeviceStatus> {
        let mut endpoints = self.endpoints.write().await;
        match endpoints.get_mut(extension) {
            Some(endpoint) => {
                let previous = endpoint.status;
                debug!(
                    extension = %extension,
                    old_state = %previous,
                    new_state = %status,
                    "Existing endpoint state change"
                );
                endpoint.status = status;
                Some(previous)
            }
            None => {
                debug!(extension = %extension, state = %status, "New endpoint added");
                endpoints.insert(extension.clone(), Endpoint::new(extension.clone(), status));
                None
            }
        }
    }

    pub async fn get(&self, extension: &Extension) -> Option<Endpoint> {
        self.endpoints.read().await.get(extension).cloned()
    }

    /// Copy out every endpoint matching `keep`, sorted by extension.
    pub async fn snapshot<F>(&self, mut keep: F) -> Vec<Endpoint>
    where
        F: FnMut(&Endpoint) -> bool,
    {
        let mut endpoints: Vec<Endpoint> = self
            .endpoints
            .read()
            .await
            .values()
            .filter(|endpoint| keep(endpoint))
            .cloned()
            .collect();
        endpoints.sort_by(|a, b| a.extension.cmp(&b.extension));
        endpoints
    }

    /// Snapshot filtered by the visibility rule for one kind of viewer
    pub async fn visible_snapshot(&self, authenticated: bool) -> Vec<Endpoint> {
        self.snapshot(|endpoint| is_visible(&endpoint.extension, authenticated))
            .await
    }

    /// Seed descriptions. New entries start as `Unavailable`; existing entries
    /// keep their status. Non-numeric ids are skipped. Returns how many ids
    /// were admitted.
    pub async fn preload<I>(&self, descriptions: I) -> usize
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut endpoints = self.endpoints.write().await;
        let mut admitted = 0;
        for (id, description) in descriptions {
            let Some(extension) = Extension::parse(&id) else {
                continue;
            };
            let endpoint = endpoints
                .entry(extension.clone())
                .or_insert_with(|| Endpoint::new(extension, DeviceStatus::Unavailable));
            endpoint.description = Some(description);
            admitted += 1;
        }
        admitted
    }

    pub async fn len(&self) -> usize {
        self.endpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.endpoints.read().await.is_empty()
    }
}
