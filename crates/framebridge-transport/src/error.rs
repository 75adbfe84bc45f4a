use crate::traits::WindowId;

/// Errors that can occur in bus and window operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The window is not known to the bus.
    #[error("unknown window {0}")]
    UnknownWindow(WindowId),

    /// The window has been closed.
    #[error("window {0} is closed")]
    WindowClosed(WindowId),

    /// The URL could not be parsed into an origin.
    #[error("invalid url '{0}'")]
    InvalidUrl(String),

    /// The target origin given to `post_message` is malformed.
    #[error("invalid target origin '{0}'")]
    InvalidOrigin(String),

    /// The window failed to load the requested document.
    #[error("navigation to {url} failed: {reason}")]
    NavigationFailed { url: String, reason: String },
}

pub type Result<T> = std::result::Result<T, TransportError>;
