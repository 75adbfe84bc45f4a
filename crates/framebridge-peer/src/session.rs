use std::fmt;

use framebridge_frame::ProtocolVersion;

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    Idle,
    Setup,
    Transport,
    Closed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Setup => "setup",
            SessionPhase::Transport => "transport",
            SessionPhase::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// State of one outer/inner pairing.
///
/// `session_id` is assigned by the outer context during setup and must be
/// echoed unchanged through the transport handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub negotiated_version: ProtocolVersion,
    pub pinned_origin: Option<String>,
    pub phase: SessionPhase,
}

impl Session {
    pub fn new(session_id: impl Into<String>, negotiated_version: ProtocolVersion) -> Self {
        Self {
            session_id: session_id.into(),
            negotiated_version,
            pinned_origin: None,
            phase: SessionPhase::Idle,
        }
    }

    /// Move to `phase`. `Closed` is terminal.
    pub fn advance(&mut self, phase: SessionPhase) {
        if self.phase != SessionPhase::Closed {
            self.phase = phase;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.phase == SessionPhase::Closed
    }
}
