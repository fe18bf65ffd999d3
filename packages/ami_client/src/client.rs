use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::AmiError;
use crate::framing::{read_banner, read_message, write_action};
use crate::message::{Action, AmiMessage};

const LOGIN_ACTION_ID: &str = "login";

/// Connection settings for the manager interface
#[derive(Clone, Debug)]
pub struct AmiSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: String,
    /// TCP connect + banner deadline
    pub dial_timeout: Duration,
    /// Pause between a lost connection and the next attempt
    pub reconnect_interval: Duration,
    /// How long `action()` waits for the matching response
    pub response_timeout: Duration,
    /// Broadcast capacity for events; slow subscribers past this lag
    pub event_capacity: usize,
}

impl Default for AmiSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5038,
            username: String::new(),
            secret: String::new(),
            dial_timeout: Duration::from_secs(10),
            reconnect_interval: Duration::from_secs(5),
            response_timeout: Duration::from_secs(10),
            event_capacity: 1024,
        }
    }
}

impl AmiSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

type Responder = oneshot::Sender<Result<AmiMessage, AmiError>>;

/// Messages that can be sent to the connection actor
pub(crate) enum ClientCommand {
    Action {
        action: Action,
        action_id: String,
        respond_to: Responder,
    },
    Close {
        respond_to: oneshot::Sender<()>,
    },
}

/// Handle to a manager-interface connection.
///
/// Cloning is cheap; all clones talk to the same connection actor, which keeps
/// reconnecting in the background until [`close`](Self::close) is called.
#[derive(Clone)]
pub struct AmiClient {
    sender: mpsc::Sender<ClientCommand>,
    event_tx: broadcast::Sender<AmiMessage>,
    connected: watch::Receiver<bool>,
    next_action_id: Arc<AtomicU64>,
    response_timeout: Duration,
}

impl AmiClient {
    /// Spawn the connection actor. Must be called inside a tokio runtime.
    pub fn connect(settings: AmiSettings) -> Self {
        let (sender, receiver) = mpsc::channel(32);
        let (event_tx, _) = broadcast::channel(settings.event_capacity.max(1));
        let (connected_tx, connected) = watch::channel(false);
        let response_timeout = settings.response_timeout;

        let actor = ConnectionActor {
            settings,
            receiver,
            event_tx: event_tx.clone(),
            connected_tx,
            pending: HashMap::new(),
        };
        tokio::spawn(actor.run());

        Self {
            sender,
            event_tx,
            connected,
            next_action_id: Arc::new(AtomicU64::new(1)),
            response_timeout,
        }
    }

    /// Subscribe to every event the server sends
    pub fn subscribe(&self) -> broadcast::Receiver<AmiMessage> {
        self.event_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Wait until logged in, or give up after `timeout`.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut connected = self.connected.clone();
        match tokio::time::timeout(timeout, connected.wait_for(|up| *up)).await {
            Ok(result) => result.is_ok(),
            Err(_) => false,
        }
    }

    /// Send an action and wait for its response
    pub async fn action(&self, mut action: Action) -> Result<AmiMessage, AmiError> {
        let action_id = action.ensure_action_id(|| {
            format!("ami-{}", self.next_action_id.fetch_add(1, Ordering::Relaxed))
        });

        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ClientCommand::Action {
                action,
                action_id: action_id.clone(),
                respond_to: tx,
            })
            .await
            .map_err(|_| AmiError::Closed)?;

        let response = match tokio::time::timeout(self.response_timeout, rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(AmiError::Disconnected),
            Err(_) => {
                return Err(AmiError::ResponseTimeout {
                    action_id,
                    timeout: self.response_timeout,
                });
            }
        };

        if response
            .response()
            .is_some_and(|r| r.eq_ignore_ascii_case("Error"))
        {
            return Err(AmiError::ActionFailed(
                response.message().unwrap_or("no message").to_string(),
            ));
        }
        Ok(response)
    }

    /// Log off and stop reconnecting
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(ClientCommand::Close { respond_to: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

/// A logged-in connection. The reader task is aborted when this drops.
struct Connection {
    writer: OwnedWriteHalf,
    inbound: mpsc::Receiver<Result<AmiMessage, AmiError>>,
    reader_task: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

enum Served {
    Closed(Option<oneshot::Sender<()>>),
    Lost(AmiError),
}

enum Idle {
    Retry,
    Close(Option<oneshot::Sender<()>>),
}

/// Owns the socket; runs until closed or every handle is dropped
struct ConnectionActor {
    settings: AmiSettings,
    receiver: mpsc::Receiver<ClientCommand>,
    event_tx: broadcast::Sender<AmiMessage>,
    connected_tx: watch::Sender<bool>,
    pending: HashMap<String, Responder>,
}

impl ConnectionActor {
    async fn run(mut self) {
        let addr = self.settings.addr();

        loop {
            match self.establish().await {
                Ok(conn) => {
                    info!("Connected to manager interface at {}", addr);
                    self.connected_tx.send_replace(true);
                    let served = self.serve(conn).await;
                    self.connected_tx.send_replace(false);
                    self.fail_pending();

                    match served {
                        Served::Closed(ack) => {
                            info!("Manager interface client closed");
                            if let Some(ack) = ack {
                                let _ = ack.send(());
                            }
                            return;
                        }
                        Served::Lost(e) => warn!("Connection to {} lost: {}", addr, e),
                    }
                }
                Err(e) => warn!("Connection to {} failed: {}", addr, e),
            }

            match self.idle(self.settings.reconnect_interval).await {
                Idle::Retry => debug!("Reconnecting to {}", addr),
                Idle::Close(ack) => {
                    info!("Manager interface client closed while disconnected");
                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                    return;
                }
            }
        }
    }

    async fn establish(&mut self) -> Result<Connection, AmiError> {
        let addr = self.settings.addr();
        let dial_timeout = self.settings.dial_timeout;
        let connect_timeout = || AmiError::ConnectTimeout {
            addr: addr.clone(),
            timeout: dial_timeout,
        };

        let stream = tokio::time::timeout(dial_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| connect_timeout())??;
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let banner = tokio::time::timeout(dial_timeout, read_banner(&mut reader))
            .await
            .map_err(|_| connect_timeout())??;
        debug!("Manager interface banner: {}", banner);

        let login = Action::new("Login")
            .header("Username", &self.settings.username)
            .header("Secret", &self.settings.secret)
            .header("ActionID", LOGIN_ACTION_ID);
        write_action(&mut writer, &login).await?;

        // Events may arrive before the login response; forward them as usual
        let event_tx = self.event_tx.clone();
        let reply = tokio::time::timeout(self.settings.response_timeout, async {
            loop {
                match read_message(&mut reader).await? {
                    Some(msg) if msg.is_response() && msg.action_id() == Some(LOGIN_ACTION_ID) => {
                        return Ok::<_, AmiError>(msg);
                    }
                    Some(msg) if msg.is_event() => {
                        let _ = event_tx.send(msg);
                    }
                    Some(_) => {}
                    None => return Err(AmiError::Disconnected),
                }
            }
        })
        .await
        .map_err(|_| AmiError::ResponseTimeout {
            action_id: LOGIN_ACTION_ID.to_string(),
            timeout: self.settings.response_timeout,
        })??;

        if !reply
            .response()
            .is_some_and(|r| r.eq_ignore_ascii_case("Success"))
        {
            return Err(AmiError::LoginFailed(
                reply.message().unwrap_or("no message").to_string(),
            ));
        }

        let (inbound_tx, inbound) = mpsc::channel(256);
        let reader_task = tokio::spawn(read_loop(reader, inbound_tx));

        Ok(Connection {
            writer,
            inbound,
            reader_task,
        })
    }

    async fn serve(&mut self, mut conn: Connection) -> Served {
        loop {
            tokio::select! {
                cmd = self.receiver.recv() => match cmd {
                    Some(ClientCommand::Action { action, action_id, respond_to }) => {
                        if let Err(e) = write_action(&mut conn.writer, &action).await {
                            let _ = respond_to.send(Err(AmiError::Disconnected));
                            return Served::Lost(e);
                        }
                        debug!("Sent action {} ({})", action.name(), action_id);
                        // Callers that timed out leave closed responders behind
                        self.pending.retain(|_, tx| !tx.is_closed());
                        self.pending.insert(action_id, respond_to);
                    }
                    Some(ClientCommand::Close { respond_to }) => {
                        let _ = write_action(&mut conn.writer, &Action::new("Logoff")).await;
                        return Served::Closed(Some(respond_to));
                    }
                    None => return Served::Closed(None),
                },
                inbound = conn.inbound.recv() => match inbound {
                    Some(Ok(msg)) => self.dispatch(msg),
                    Some(Err(e)) => return Served::Lost(e),
                    None => return Served::Lost(AmiError::Disconnected),
                },
            }
        }
    }

    fn dispatch(&mut self, msg: AmiMessage) {
        if msg.is_response() {
            if let Some(tx) = msg.action_id().and_then(|id| self.pending.remove(id)) {
                let _ = tx.send(Ok(msg));
                return;
            }
        }

        if msg.is_event() {
            // No subscribers is fine
            let _ = self.event_tx.send(msg);
        } else {
            debug!("Unsolicited message: {:?}", msg);
        }
    }

    fn fail_pending(&mut self) {
        for (_, tx) in self.pending.drain() {
            let _ = tx.send(Err(AmiError::Disconnected));
        }
    }

    async fn idle(&mut self, wait: Duration) -> Idle {
        let sleep = tokio::time::sleep(wait);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Idle::Retry,
                cmd = self.receiver.recv() => match cmd {
                    Some(ClientCommand::Action { respond_to, .. }) => {
                        let _ = respond_to.send(Err(AmiError::NotConnected));
                    }
                    Some(ClientCommand::Close { respond_to }) => return Idle::Close(Some(respond_to)),
                    None => return Idle::Close(None),
                },
            }
        }
    }
}

async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    tx: mpsc::Sender<Result<AmiMessage, AmiError>>,
) {
    loop {
        let item = match read_message(&mut reader).await {
            Ok(Some(msg)) => Ok(msg),
            Ok(None) => Err(AmiError::Disconnected),
            Err(e) => Err(e),
        };
        let last = item.is_err();
        if tx.send(item).await.is_err() || last {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn settings(port: u16) -> AmiSettings {
        AmiSettings {
            host: "127.0.0.1".into(),
            port,
            username: "admin".into(),
            secret: "secret".into(),
            dial_timeout: Duration::from_secs(2),
            reconnect_interval: Duration::from_millis(50),
            response_timeout: Duration::from_secs(2),
            event_capacity: 64,
        }
    }

    /// Accept one connection, send the banner and answer the login.
    async fn accept_logged_in(
        listener: &TcpListener,
        accept: bool,
    ) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
        let (stream, _) = listener.accept().await.unwrap();
        let (r, mut w) = stream.into_split();
        let mut r = BufReader::new(r);
        w.write_all(b"Asterisk Call Manager/5.0.1\r\n").await.unwrap();

        let login = read_message(&mut r).await.unwrap().unwrap();
        assert_eq!(login.get("Action"), Some("Login"));
        assert_eq!(login.get("Username"), Some("admin"));
        assert_eq!(login.get("Secret"), Some("secret"));
        let id = login.action_id().unwrap().to_string();

        let reply = if accept {
            format!("Response: Success\r\nActionID: {id}\r\nMessage: Authentication accepted\r\n\r\n")
        } else {
            format!("Response: Error\r\nActionID: {id}\r\nMessage: Authentication failed\r\n\r\n")
        };
        w.write_all(reply.as_bytes()).await.unwrap();
        (r, w)
    }

    #[tokio::test]
    async fn logs_in_answers_actions_and_forwards_events() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut r, mut w) = accept_logged_in(&listener, true).await;

            let list = read_message(&mut r).await.unwrap().unwrap();
            assert_eq!(list.get("Action"), Some("DeviceStateList"));
            assert_eq!(list.action_id(), Some("init"));
            w.write_all(
                b"Response: Success\r\nActionID: init\r\nEventList: start\r\n\r\n\
                  Event: DeviceState\r\nActionID: init\r\nDevice: PJSIP/55555\r\nState: INUSE\r\n\r\n\
                  Event: DeviceStateListComplete\r\nActionID: init\r\n\r\n",
            )
            .await
            .unwrap();

            let logoff = read_message(&mut r).await.unwrap().unwrap();
            assert_eq!(logoff.get("Action"), Some("Logoff"));
        });

        let client = AmiClient::connect(settings(port));
        let mut events = client.subscribe();
        assert!(client.wait_connected(Duration::from_secs(5)).await);
        assert!(client.is_connected());

        let response = client
            .action(Action::new("DeviceStateList").header("ActionID", "init"))
            .await
            .unwrap();
        assert_eq!(response.response(), Some("Success"));

        let first = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.event(), Some("DeviceState"));
        assert_eq!(first.get("Device"), Some("PJSIP/55555"));

        let second = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.event(), Some("DeviceStateListComplete"));

        client.close().await;
        server.await.unwrap();
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn error_response_becomes_action_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut r, mut w) = accept_logged_in(&listener, true).await;
            let action = read_message(&mut r).await.unwrap().unwrap();
            let id = action.action_id().unwrap().to_string();
            w.write_all(
                format!("Response: Error\r\nActionID: {id}\r\nMessage: Invalid/unknown command\r\n\r\n")
                    .as_bytes(),
            )
            .await
            .unwrap();
            let _ = read_message(&mut r).await;
        });

        let client = AmiClient::connect(settings(port));
        assert!(client.wait_connected(Duration::from_secs(5)).await);

        let err = client.action(Action::new("Bogus")).await.unwrap_err();
        match err {
            AmiError::ActionFailed(msg) => assert_eq!(msg, "Invalid/unknown command"),
            other => panic!("unexpected error: {other:?}"),
        }

        client.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn rejected_login_leaves_client_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (_r, _w) = accept_logged_in(&listener, false).await;
        });

        let mut s = settings(port);
        s.reconnect_interval = Duration::from_secs(60);
        let client = AmiClient::connect(s);

        assert!(!client.wait_connected(Duration::from_millis(300)).await);
        let err = client.action(Action::new("Ping")).await.unwrap_err();
        assert!(matches!(
            err,
            AmiError::NotConnected | AmiError::Disconnected
        ));

        client.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn reconnects_after_connection_loss() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (dropped_tx, dropped_rx) = oneshot::channel::<()>();

        let server = tokio::spawn(async move {
            // First session: drop right after login
            let conn = accept_logged_in(&listener, true).await;
            drop(conn);
            let _ = dropped_tx.send(());

            // Second session: stay up until logoff
            let (mut r, _w) = accept_logged_in(&listener, true).await;
            let _ = read_message(&mut r).await;
        });

        let client = AmiClient::connect(settings(port));
        assert!(client.wait_connected(Duration::from_secs(5)).await);
        dropped_rx.await.unwrap();

        // Either still up (drop not yet noticed) or back up after reconnect
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(client.wait_connected(Duration::from_secs(5)).await);

        client.close().await;
        server.await.unwrap();
    }
}
