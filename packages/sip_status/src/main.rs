use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use clap::Parser;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

use ami_client::AmiClient;
use extension_state::{
    Broadcaster, EventPipeline, PipelineStats, StateStore, SyncCoordinator, SyncReport,
};

mod auth;
mod config;
mod descriptions;
mod handlers;
mod metrics;
#[cfg(test)]
mod test_helpers;
mod views;

use crate::auth::{SWEEP_INTERVAL, SessionStore};
use crate::config::{AuthConfig, CliOverrides, FileConfig, UiConfig};
use crate::descriptions::Descriptions;
use crate::metrics::ServerMetrics;

/// How long startup waits for the first upstream login before carrying on
const UPSTREAM_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "sip-status")]
#[command(about = "Live SIP extension status board")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Host to bind to
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port for the web server
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging and the /test-update hook
    #[arg(short, long)]
    debug: bool,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub store: Arc<StateStore>,
    pub broadcaster: Arc<Broadcaster>,
    pub sessions: Arc<SessionStore>,
    pub auth_config: Arc<AuthConfig>,
    pub ui: Arc<UiConfig>,
    pub metrics: Arc<ServerMetrics>,
    pub pipeline_stats: Arc<PipelineStats>,
    /// Set once the startup sync has finished
    pub sync_report: Arc<OnceCell<SyncReport>>,
    pub upstream: Option<AmiClient>,
    /// Cancelled on shutdown; every event stream holds a child token
    pub shutdown: CancellationToken,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let overrides = CliOverrides {
        host: cli.host,
        port: cli.port,
        debug: cli.debug,
    };
    let config = FileConfig::load(&cli.config, &overrides)?;

    // Setup logging
    let default_directive = if config.debug {
        "sip_status=debug,extension_state=debug,ami_client=debug,tower_http=debug,info"
    } else {
        "sip_status=info,extension_state=info,ami_client=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting SIP status server");
    run_server(config).await
}

async fn run_server(config: FileConfig) -> Result<()> {
    let auth_config = AuthConfig::from_file(&config.auth);
    if !auth_config.login_enabled() {
        warn!("No admin password configured, login is disabled");
    }

    let store = Arc::new(StateStore::new());
    let broadcaster = Arc::new(Broadcaster::new());
    let pipeline = EventPipeline::new(store.clone(), broadcaster.clone());
    let shutdown = CancellationToken::new();

    // Subscribe before anything is requested so the device list cannot race
    // past us
    let upstream = AmiClient::connect(config.ami.to_settings());
    let events = upstream.subscribe();
    if !upstream.wait_connected(UPSTREAM_READY_TIMEOUT).await {
        warn!(
            addr = %config.ami.to_settings().addr(),
            "Upstream not connected yet, continuing startup"
        );
    }

    let descriptions = Descriptions::from_url(config.database.url.as_deref())
        .context("Invalid database URL")?;

    let sessions = Arc::new(SessionStore::new(auth_config.session_ttl));
    sessions
        .clone()
        .spawn_sweeper(SWEEP_INTERVAL, shutdown.child_token());

    let state = AppState {
        store: store.clone(),
        broadcaster: broadcaster.clone(),
        sessions,
        auth_config: Arc::new(auth_config),
        ui: Arc::new(config.ui.clone()),
        metrics: Arc::new(ServerMetrics::new()),
        pipeline_stats: pipeline.stats(),
        sync_report: Arc::new(OnceCell::new()),
        upstream: Some(upstream.clone()),
        shutdown: shutdown.clone(),
    };

    // Initial sync, then hand the same receiver to the live pipeline
    let sync_report = state.sync_report.clone();
    let lister = upstream.clone();
    tokio::spawn(async move {
        let coordinator = SyncCoordinator::new(store, broadcaster);
        let (report, events) = coordinator.run(&descriptions, &lister, events).await;
        let _ = sync_report.set(report);
        pipeline.run(events).await;
    });

    let app = build_router(state, config.debug);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    info!("SIP status listening on http://{}", actual_addr);
    if config.debug {
        info!("Debug mode: GET /test-update?ext=..&state=.. is enabled");
    }

    // Create shutdown signal handler
    let shutdown_signal = {
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Received shutdown signal, cleaning up...");
            shutdown.cancel();
        }
    };

    // Run server with graceful shutdown
    let server_result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await
    .context("Server error");

    shutdown.cancel();
    upstream.close().await;
    info!("Shutdown complete");

    server_result
}

fn build_router(state: AppState, debug: bool) -> Router {
    let mut app = Router::new()
        .route("/", get(views::index_page))
        .route("/events", get(handlers::events_handler))
        .route("/api/login", post(handlers::login_handler))
        .route("/api/logout", post(handlers::logout_handler))
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler));

    if debug {
        app = app.route("/test-update", get(handlers::test_update_handler));
    }

    app.layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    async fn status_of(app: Router, method: &str, uri: &str) -> StatusCode {
        app.oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
    }

    #[tokio::test]
    async fn test_update_hook_only_routed_in_debug() {
        let state = test_helpers::test_app_state();

        let app = build_router(state.clone(), false);
        assert_eq!(
            status_of(app, "GET", "/test-update").await,
            StatusCode::NOT_FOUND
        );

        let app = build_router(state, true);
        assert_eq!(status_of(app, "GET", "/test-update").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_login_route_is_post_only() {
        let app = build_router(test_helpers::test_app_state(), false);
        assert_eq!(
            status_of(app, "GET", "/api/login").await,
            StatusCode::METHOD_NOT_ALLOWED
        );
    }

    #[tokio::test]
    async fn test_index_renders() {
        let app = build_router(test_helpers::test_app_state(), false);
        assert_eq!(status_of(app, "GET", "/").await, StatusCode::OK);
    }
}
