use axum::{Json, body::Bytes, extract::State, response::IntoResponse};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use tracing::{info, warn};

use crate::AppState;
use crate::auth::{AuthError, SESSION_COOKIE, removal_cookie, session_cookie};
use crate::handlers::ClientAddr;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

/// `POST /api/login` with `{"password": "..."}`
pub async fn login_handler(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    jar: CookieJar,
    body: Bytes,
) -> Result<impl IntoResponse, AuthError> {
    let request: LoginRequest =
        serde_json::from_slice(&body).map_err(|_| AuthError::InvalidRequest)?;

    let accepted = state.auth_config.password_matches(&request.password);
    state.metrics.login_attempt(accepted);

    if !accepted {
        warn!(client = %client, "Rejected login attempt");
        return Err(AuthError::InvalidPassword);
    }

    let token = state.sessions.create().await;
    info!(client = %client, "Admin logged in");
    Ok((
        jar.add(session_cookie(token, state.auth_config.secure_cookies)),
        Json(serde_json::json!({ "status": "ok" })),
    ))
}

/// `POST /api/logout`
pub async fn logout_handler(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.revoke(cookie.value()).await;
    }
    (
        jar.remove(removal_cookie()),
        Json(serde_json::json!({ "status": "ok" })),
    )
}
