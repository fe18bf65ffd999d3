use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use extension_state::{Broadcaster, PipelineStats, StateStore};

use crate::AppState;
use crate::auth::SessionStore;
use crate::config::{AuthConfig, UiConfig};
use crate::metrics::ServerMetrics;

/// Build a fully-wired `AppState` with no upstream connection.
///
/// The admin password is `letmein`; cookies are not marked `Secure` so they
/// survive plain-HTTP test requests.
pub fn test_app_state() -> AppState {
    AppState {
        store: Arc::new(StateStore::new()),
        broadcaster: Arc::new(Broadcaster::new()),
        sessions: Arc::new(SessionStore::new(Duration::from_secs(3600))),
        auth_config: Arc::new(AuthConfig {
            admin_password: Some("letmein".into()),
            session_ttl: Duration::from_secs(3600),
            secure_cookies: false,
        }),
        ui: Arc::new(UiConfig::default()),
        metrics: Arc::new(ServerMetrics::new()),
        pipeline_stats: Arc::new(PipelineStats::new()),
        sync_report: Arc::new(OnceCell::new()),
        upstream: None,
        shutdown: CancellationToken::new(),
    }
}
