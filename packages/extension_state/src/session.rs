//! Per-viewer streaming loop.
//!
//! A session subscribes, sends the visible snapshot followed by the connected
//! marker, then forwards live updates and keep-alives until cancelled. The
//! subscription is released exactly once on every exit path.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcaster::{Broadcaster, DELIVERY_TIMEOUT, SUBSCRIBER_CAPACITY, StatusMessage};
use crate::endpoint::is_visible;
use crate::frame::{CONNECTED_FRAME, KEEPALIVE_FRAME, format_update};
use crate::outbox::{Offer, Outbox, outbox};
use crate::store::StateStore;

pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    /// Idle time before a keep-alive frame is sent
    pub keepalive: Duration,
    /// Frames buffered towards the client
    pub output_capacity: usize,
    /// Wait on a full client buffer before dropping a frame
    pub send_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive: KEEPALIVE_INTERVAL,
            output_capacity: SUBSCRIBER_CAPACITY,
            send_timeout: DELIVERY_TIMEOUT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Streaming,
    Closed,
}

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// The caller's connection-lifetime token fired
    Cancelled,
    /// The client's output stream was dropped
    ClientGone,
    /// The broadcaster stopped delivering to this subscription
    Unsubscribed,
}

pub struct StreamSession {
    store: Arc<StateStore>,
    broadcaster: Arc<Broadcaster>,
    authenticated: bool,
    config: SessionConfig,
    label: String,
    state: SessionState,
}

impl StreamSession {
    pub fn new(store: Arc<StateStore>, broadcaster: Arc<Broadcaster>, authenticated: bool) -> Self {
        Self {
            store,
            broadcaster,
            authenticated,
            config: SessionConfig::default(),
            label: String::from("-"),
            state: SessionState::Connecting,
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Free-form identifier used in logs (usually the client address)
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session on its own task. Frames for the client arrive on the
    /// returned receiver; dropping it ends the session.
    pub fn spawn(self, cancel: CancellationToken) -> (mpsc::Receiver<String>, JoinHandle<SessionEnd>) {
        let (out, rx) = outbox(self.config.output_capacity, self.config.send_timeout);
        let handle = tokio::spawn(async move {
            let mut session = self;
            session.run(out, cancel).await
        });
        (rx, handle)
    }

    pub async fn run(&mut self, out: Outbox<String>, cancel: CancellationToken) -> SessionEnd {
        self.state = SessionState::Connecting;
        let (mut messages, unsubscribe) = self.broadcaster.subscribe(self.authenticated).await;
        info!(
            client = %self.label,
            subscriber = %unsubscribe.id(),
            authenticated = self.authenticated,
            "Client connected"
        );

        let end = self.stream(&out, &mut messages, &cancel).await;

        unsubscribe.unsubscribe().await;
        self.state = SessionState::Closed;
        info!(client = %self.label, reason = ?end, "Client disconnected");
        end
    }

    async fn stream(
        &mut self,
        out: &Outbox<String>,
        messages: &mut mpsc::Receiver<StatusMessage>,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        for endpoint in self.store.visible_snapshot(self.authenticated).await {
            let frame = format_update(&endpoint.extension, endpoint.status);
            if let Some(end) = self.emit(out, frame, cancel).await {
                return end;
            }
        }
        if let Some(end) = self.emit(out, CONNECTED_FRAME.to_string(), cancel).await {
            return end;
        }
        self.state = SessionState::Streaming;

        let period = self.config.keepalive;
        let mut keepalive = interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return SessionEnd::Cancelled,

                message = messages.recv() => {
                    let frame = match message {
                        None => return SessionEnd::Unsubscribed,
                        Some(StatusMessage::Frame(frame)) => frame,
                        Some(StatusMessage::Update(update)) => {
                            if !is_visible(&update.extension, self.authenticated) {
                                continue;
                            }
                            format_update(&update.extension, update.status)
                        }
                    };
                    if let Some(end) = self.emit(out, frame, cancel).await {
                        return end;
                    }
                    keepalive.reset();
                }

                _ = keepalive.tick() => {
                    if let Some(end) = self.emit(out, KEEPALIVE_FRAME.to_string(), cancel).await {
                        return end;
                    }
                }
            }
        }
    }

    /// Hand one frame to the client. Returns `Some` when the session must end.
    async fn emit(
        &self,
        out: &Outbox<String>,
        frame: String,
        cancel: &CancellationToken,
    ) -> Option<SessionEnd> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Some(SessionEnd::Cancelled),
            offer = out.offer(frame) => match offer {
                Offer::Delivered => None,
                Offer::TimedOut => {
                    warn!(client = %self.label, "Client not reading, dropped frame");
                    None
                }
                Offer::Closed => {
                    debug!(client = %self.label, "Client stream closed");
                    Some(SessionEnd::ClientGone)
                }
            },
        }
    }
}
