//! Authentication: one shared admin password, in-memory cookie sessions.
//!
//! Viewers are either anonymous or authenticated; the flag only decides
//! whether short extensions are visible.

use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::AppState;

pub const SESSION_COOKIE: &str = "sip_status_session";

/// How often expired sessions are swept
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

// =============================================================================
// Sessions
// =============================================================================

/// Session token → expiry
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Instant>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn create(&self) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.sessions
            .write()
            .await
            .insert(token.clone(), Instant::now() + self.ttl);
        token
    }

    pub async fn is_valid(&self, token: &str) -> bool {
        self.sessions
            .read()
            .await
            .get(token)
            .is_some_and(|expires| *expires > Instant::now())
    }

    pub async fn revoke(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }

    /// Drop expired sessions; returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, expires| *expires > now);
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Periodically sweep until `cancel` fires.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + every, every);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = self.sweep().await;
                        if removed > 0 {
                            let active = self.len().await;
                            info!(active, "Cleaned up {} expired sessions", removed);
                        }
                    }
                }
            }
        })
    }
}

/// Cookie carrying a freshly created session
pub fn session_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(secure)
        .build()
}

/// Cookie that clears the session cookie in the browser
pub fn removal_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::from(SESSION_COOKIE);
    cookie.set_path("/");
    cookie
}

// =============================================================================
// Auth Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid request")]
    InvalidRequest,
    #[error("Invalid password")]
    InvalidPassword,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::InvalidRequest => StatusCode::BAD_REQUEST,
            AuthError::InvalidPassword => StatusCode::UNAUTHORIZED,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

// =============================================================================
// Axum Extractors
// =============================================================================

/// Whether the caller holds a live session. Never rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer {
    pub authenticated: bool,
}

impl FromRequestParts<AppState> for Viewer {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let authenticated = match jar.get(SESSION_COOKIE) {
            Some(cookie) => state.sessions.is_valid(cookie.value()).await,
            None => false,
        };
        Ok(Viewer { authenticated })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sessions_expire_after_ttl() {
        let store = SessionStore::new(Duration::from_secs(60));
        let token = store.create().await;
        assert!(store.is_valid(&token).await);
        assert!(!store.is_valid("forged").await);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!store.is_valid(&token).await);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.sweep().await, 1);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn revoke_ends_session() {
        let store = SessionStore::new(Duration::from_secs(60));
        let token = store.create().await;
        assert!(store.revoke(&token).await);
        assert!(!store.revoke(&token).await);
        assert!(!store.is_valid(&token).await);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_periodically() {
        let store = Arc::new(SessionStore::new(Duration::from_secs(10)));
        store.create().await;
        let cancel = CancellationToken::new();
        let handle = store
            .clone()
            .spawn_sweeper(Duration::from_secs(30), cancel.clone());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(store.len().await, 0);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn cookie_attributes() {
        let cookie = session_cookie("abc".into(), true);
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.value(), "abc");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
        assert_eq!(cookie.path(), Some("/"));

        let plain = session_cookie("abc".into(), false);
        assert_eq!(plain.secure(), Some(false));
    }

    #[test]
    fn auth_error_statuses() {
        assert_eq!(
            AuthError::InvalidRequest.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuthError::InvalidPassword.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
