use thiserror::Error;

/// Boxed error from a collaborator (descriptor source, upstream client).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures during the startup sync. None of them are fatal: the sync logs
/// them and carries on with whatever is cached.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("loading descriptions failed: {0}")]
    Descriptions(#[source] BoxError),

    #[error("device state list request failed: {0}")]
    ListRequest(#[source] BoxError),
}
