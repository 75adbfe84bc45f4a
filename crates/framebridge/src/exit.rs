use std::fmt;
use std::io;

use framebridge_frame::FrameError;
use framebridge_peer::BridgeError;
use framebridge_transport::TransportError;

// Exit code constants aligned with rsfulmen/DDR-0002 semantics.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::InvalidData => DATA_INVALID,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    let code = match err {
        TransportError::InvalidUrl(_) | TransportError::InvalidOrigin(_) => USAGE,
        TransportError::UnknownWindow(_)
        | TransportError::WindowClosed(_)
        | TransportError::NavigationFailed { .. } => TRANSPORT_ERROR,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn bridge_error(context: &str, err: BridgeError) -> CliError {
    match err {
        BridgeError::Transport(err) => transport_error(context, err),
        BridgeError::Frame(err) => frame_error(context, err),
        BridgeError::HandshakeTimeout(_) | BridgeError::NavigationTimeout(_) => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        BridgeError::NavigationFailed(_) => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        BridgeError::PermissionDenied(_)
        | BridgeError::OriginRejected(_)
        | BridgeError::OriginNotPinned => {
            CliError::new(PERMISSION_DENIED, format!("{context}: {err}"))
        }
        BridgeError::IncompatibleVersion { .. }
        | BridgeError::SessionMismatch { .. }
        | BridgeError::Protocol(_)
        | BridgeError::Json(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        BridgeError::InvalidConfig(_) | BridgeError::MissingTargetOrigin => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        BridgeError::SetupFailed(_)
        | BridgeError::TransportNotReady
        | BridgeError::QueueFull(_)
        | BridgeError::Cancelled
        | BridgeError::Closed => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}
