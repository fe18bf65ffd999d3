use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{HeaderMap, HeaderValue, header, request::Parts},
    response::Response,
};
use extension_state::StreamSession;
use futures::stream;
use std::convert::Infallible;
use std::net::SocketAddr;
use tracing::{debug, warn};

use crate::AppState;
use crate::auth::Viewer;

/// Best guess at the client's address, for logs only.
///
/// Proxy headers first (`X-Forwarded-For` first hop, `X-Real-IP`,
/// `CF-Connecting-IP`), then the socket peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddr(pub String);

impl ClientAddr {
    pub fn from_parts(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let from_header = ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"]
            .iter()
            .filter_map(|name| headers.get(*name)?.to_str().ok())
            .map(|value| value.split(',').next().unwrap_or_default().trim())
            .find(|value| !value.is_empty());

        match (from_header, peer) {
            (Some(addr), _) => ClientAddr(addr.to_string()),
            (None, Some(peer)) => ClientAddr(peer.to_string()),
            (None, None) => ClientAddr("unknown".to_string()),
        }
    }
}

impl<S> FromRequestParts<S> for ClientAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(ClientAddr::from_parts(&parts.headers, peer))
    }
}

/// `GET /events` - live status as a text event stream.
///
/// One session per request. The session is cancelled when the client goes
/// away (the body stream is dropped) or the server shuts down.
pub async fn events_handler(
    State(state): State<AppState>,
    viewer: Viewer,
    ClientAddr(client): ClientAddr,
) -> Response {
    debug!(client = %client, authenticated = viewer.authenticated, "New event stream");

    let cancel = state.shutdown.child_token();
    let (frames, session) = StreamSession::new(
        state.store.clone(),
        state.broadcaster.clone(),
        viewer.authenticated,
    )
    .with_label(client.clone())
    .spawn(cancel.clone());

    state.metrics.connection_opened();
    let metrics = state.metrics.clone();
    tokio::spawn(async move {
        match session.await {
            Ok(end) => debug!(client = %client, reason = ?end, "Event stream finished"),
            Err(e) => warn!(client = %client, "Stream session task failed: {}", e),
        }
        metrics.connection_closed();
    });

    // The guard travels with the body; dropping the body cancels the session
    let guard = cancel.drop_guard();
    let body = stream::unfold((frames, guard), |(mut frames, guard)| async move {
        let frame = frames.recv().await?;
        Some((Ok::<_, Infallible>(frame), (frames, guard)))
    });

    let mut response = Response::new(Body::from_stream(body));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::Request, routing::get};
    use extension_state::{DeviceStatus, Extension};
    use futures::StreamExt;
    use tower::ServiceExt;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn client_addr_prefers_first_forwarded_hop() {
        let peer: SocketAddr = "10.0.0.1:5555".parse().unwrap();
        let h = headers(&[
            ("x-forwarded-for", "203.0.113.7, 10.0.0.2"),
            ("x-real-ip", "198.51.100.1"),
        ]);
        assert_eq!(ClientAddr::from_parts(&h, Some(peer)).0, "203.0.113.7");

        let h = headers(&[("x-real-ip", "198.51.100.1")]);
        assert_eq!(ClientAddr::from_parts(&h, Some(peer)).0, "198.51.100.1");

        let h = headers(&[("cf-connecting-ip", "192.0.2.44")]);
        assert_eq!(ClientAddr::from_parts(&h, Some(peer)).0, "192.0.2.44");

        assert_eq!(
            ClientAddr::from_parts(&HeaderMap::new(), Some(peer)).0,
            "10.0.0.1:5555"
        );
        assert_eq!(ClientAddr::from_parts(&HeaderMap::new(), None).0, "unknown");
    }

    async fn next_frame(body: &mut axum::body::BodyDataStream) -> String {
        let chunk = body.next().await.unwrap().unwrap();
        String::from_utf8(chunk.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn stream_sends_snapshot_and_live_updates() {
        let state = crate::test_helpers::test_app_state();
        state
            .store
            .upsert(&Extension::parse("12345").unwrap(), DeviceStatus::Ringing)
            .await;
        state
            .store
            .upsert(&Extension::parse("1234").unwrap(), DeviceStatus::Busy)
            .await;

        let app = Router::new()
            .route("/events", get(events_handler))
            .with_state(state.clone());
        let resp = app
            .oneshot(Request::builder().uri("/events").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.headers()["content-type"], "text/event-stream");
        assert_eq!(resp.headers()["cache-control"], "no-cache");
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
        assert_eq!(resp.headers()["x-accel-buffering"], "no");

        let mut body = resp.into_body().into_data_stream();
        assert_eq!(next_frame(&mut body).await, "data: 12345 Ringing\n\n");
        assert_eq!(next_frame(&mut body).await, "data: Connected to updates\n\n");

        state
            .broadcaster
            .publish(&Extension::parse("55555").unwrap(), DeviceStatus::InUse)
            .await;
        assert_eq!(next_frame(&mut body).await, "data: 55555 In use\n\n");
        assert_eq!(state.broadcaster.client_count().await, 1);

        drop(body);
        // Cancellation runs on the session task
        for _ in 0..50 {
            if state.broadcaster.client_count().await == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(state.broadcaster.client_count().await, 0);
    }

    #[tokio::test]
    async fn logged_in_stream_includes_short_extensions() {
        let state = crate::test_helpers::test_app_state();
        state
            .store
            .upsert(&Extension::parse("1234").unwrap(), DeviceStatus::Busy)
            .await;
        let token = state.sessions.create().await;

        let app = Router::new()
            .route("/events", get(events_handler))
            .with_state(state.clone());
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/events")
                    .header("cookie", format!("{}={}", crate::auth::SESSION_COOKIE, token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let mut body = resp.into_body().into_data_stream();
        assert_eq!(next_frame(&mut body).await, "data: 1234 Busy\n\n");
        assert_eq!(next_frame(&mut body).await, "data: Connected to updates\n\n");
    }

    #[tokio::test]
    async fn shutdown_ends_open_streams() {
        let state = crate::test_helpers::test_app_state();
        let app = Router::new()
            .route("/events", get(events_handler))
            .with_state(state.clone());
        let resp = app
            .oneshot(Request::builder().uri("/events").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let mut body = resp.into_body().into_data_stream();
        assert_eq!(next_frame(&mut body).await, "data: Connected to updates\n\n");

        state.shutdown.cancel();
        assert!(body.next().await.is_none());
    }
}
