use thiserror::Error;

/// Errors that terminate a middle-tier session.
///
/// Per-frame decode failures are not represented here: a frame that does not
/// parse is logged and dropped while the session continues.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The upstream WebSocket handshake did not complete.
    #[error("upstream handshake failed: {0}")]
    Handshake(String),

    /// The upstream writer is gone; nothing more can be delivered.
    #[error("upstream connection closed")]
    UpstreamClosed,

    /// The client socket failed mid-session.
    #[error("client connection error: {0}")]
    Client(#[from] axum::Error),

    /// The upstream emitted a function-call event the session state cannot
    /// account for.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The model requested a tool the server never advertised. This is a
    /// server misconfiguration and fatal for the session.
    #[error("model requested unregistered tool '{0}'")]
    UnknownTool(String),
}
