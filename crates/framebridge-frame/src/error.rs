/// Errors that can occur while encoding or decoding envelopes.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The value does not carry a recognised envelope discriminator.
    #[error("value is not a framebridge envelope")]
    NotAnEnvelope,

    /// The discriminator was recognised but the body did not decode.
    #[error("malformed {message_type} envelope: {source}")]
    Malformed {
        message_type: String,
        #[source]
        source: serde_json::Error,
    },

    /// A field decoded but violates a protocol limit.
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// A protocol version string is not `<major>.<minor>`.
    #[error("invalid protocol version '{0}'")]
    InvalidVersion(String),

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
