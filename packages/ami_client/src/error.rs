use std::time::Duration;

/// Errors that can occur while talking to the manager interface
#[derive(Debug, thiserror::Error)]
pub enum AmiError {
    /// TCP connect did not finish within the dial timeout
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// Socket-level failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Login was answered with anything but `Response: Success`
    #[error("login rejected: {0}")]
    LoginFailed(String),

    /// The peer sent something that is not a manager-interface message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Action answered with `Response: Error`
    #[error("action failed: {0}")]
    ActionFailed(String),

    /// No response arrived for an action in time
    #[error("no response to action {action_id} within {timeout:?}")]
    ResponseTimeout { action_id: String, timeout: Duration },

    /// No live connection (yet, or any more)
    #[error("not connected")]
    NotConnected,

    /// Connection dropped while the request was in flight
    #[error("connection lost")]
    Disconnected,

    /// The client was closed
    #[error("client closed")]
    Closed,
}
