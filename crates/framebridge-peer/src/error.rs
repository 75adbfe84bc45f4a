use std::time::Duration;

/// Errors that can occur while establishing or using a bridge.
///
/// Every handshake-stage error is fatal for the connection attempt. There is
/// no automatic retry: callers restart from navigation.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Bus or window error.
    #[error("transport error: {0}")]
    Transport(#[from] framebridge_transport::TransportError),

    /// Envelope encode/decode error.
    #[error("frame error: {0}")]
    Frame(#[from] framebridge_frame::FrameError),

    /// No mutually supported protocol version.
    #[error("incompatible protocol version: requested {requested}, supported {supported}")]
    IncompatibleVersion { requested: String, supported: String },

    /// Message origin failed the allow-list or the pinned origin.
    ///
    /// Never surfaced from the receive path: such messages are logged and dropped.
    #[error("origin '{0}' rejected")]
    OriginRejected(String),

    /// An inner-side send needed a pinned origin and none is known yet.
    #[error("counterpart origin not pinned yet")]
    OriginNotPinned,

    /// An outer-side send was attempted without an explicit target origin.
    #[error("outer channel requires an explicit target origin")]
    MissingTargetOrigin,

    /// The echoed session id does not match.
    #[error("session mismatch: expected '{expected}', got '{actual}'")]
    SessionMismatch { expected: String, actual: String },

    /// A handshake step did not complete in time.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// The inner window did not finish loading in time.
    #[error("navigation timed out after {0:?}")]
    NavigationTimeout(Duration),

    /// The inner window failed to load.
    #[error("navigation failed: {0}")]
    NavigationFailed(String),

    /// A required permission was not approved.
    #[error("permission '{0}' denied")]
    PermissionDenied(String),

    /// The inner context reported a setup error.
    #[error("setup failed: {0}")]
    SetupFailed(String),

    /// A queue-bypassing send was attempted before the session connected.
    #[error("transport not ready")]
    TransportNotReady,

    /// Too many payloads are waiting for the session to connect.
    #[error("payload queue full ({0} pending)")]
    QueueFull(usize),

    /// The attempt was cancelled through its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// The channel or bridge has been closed.
    #[error("channel closed")]
    Closed,

    /// Invalid configuration or call sequence.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The counterpart sent an envelope that is not valid at this point.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
