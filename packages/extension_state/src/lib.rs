//! Extension State - live PBX extension status for streaming viewers
//!
//! Holds the authoritative extension → status map, turns raw upstream device
//! events into canonical updates, and fans them out to every connected viewer
//! with a bounded wait per viewer. Short extensions are only shown to
//! authenticated viewers.
//!
//! Data flows one way:
//!
//! ```text
//! upstream event → normalize → StateStore::upsert → Broadcaster::publish → StreamSession(s)
//! ```
//!
//! [`SyncCoordinator`] seeds the store once at startup, then hands the event
//! stream to an [`EventPipeline`] for steady state.
//!
//! # Example
//!
//! ```
//! use extension_state::{Broadcaster, EventPipeline, StateStore, StreamSession};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = Arc::new(StateStore::new());
//! let broadcaster = Arc::new(Broadcaster::new());
//! let pipeline = EventPipeline::new(store.clone(), broadcaster.clone());
//!
//! let (mut frames, _session) = StreamSession::new(store, broadcaster, false)
//!     .spawn(CancellationToken::new());
//! assert_eq!(frames.recv().await.as_deref(), Some("data: Connected to updates\n\n"));
//!
//! let event: HashMap<String, String> = [
//!     ("Event", "DeviceStateChange"),
//!     ("Device", "PJSIP/55555"),
//!     ("State", "INUSE"),
//! ]
//! .into_iter()
//! .map(|(k, v)| (k.to_string(), v.to_string()))
//! .collect();
//! pipeline.handle(&event).await;
//!
//! assert_eq!(frames.recv().await.as_deref(), Some("data: 55555 In use\n\n"));
//! # }
//! ```

#[cfg(feature = "ami")]
pub mod ami;
mod broadcaster;
mod endpoint;
mod error;
pub mod frame;
pub mod normalizer;
mod outbox;
mod pipeline;
mod session;
mod store;
mod sync;

pub use broadcaster::{
    Broadcaster, DELIVERY_TIMEOUT, PublishReport, SUBSCRIBER_CAPACITY, StatusMessage, SubscriberId,
    Unsubscribe,
};
pub use endpoint::{DeviceStatus, Endpoint, Extension, SHORT_EXTENSION_MAX_LEN, UnknownStatus, is_visible};
pub use error::{BoxError, SyncError};
pub use frame::{CONNECTED_FRAME, KEEPALIVE_FRAME, format_update};
pub use normalizer::{DeviceUpdate, EventRecord, Normalized, normalize};
pub use outbox::{Offer, Outbox, outbox};
pub use pipeline::{EventPipeline, PipelineSnapshot, PipelineStats};
pub use session::{KEEPALIVE_INTERVAL, SessionConfig, SessionEnd, SessionState, StreamSession};
pub use store::StateStore;
pub use sync::{
    DescriptionSource, DeviceStateLister, NoDescriptions, SYNC_CEILING, SyncCoordinator, SyncReport,
};
