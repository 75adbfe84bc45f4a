//! Transport handshake: a three-way exchange that binds a fresh channel to
//! the session id negotiated during setup.
//!
//! ```text
//! inner                                   outer
//!   | -- TRANSPORT_HANDSHAKE ------------>  |  pin origin, check version
//!   | <-- TRANSPORT_HANDSHAKE_REPLY ------  |  (setup session id)
//!   | -- TRANSPORT_ACCEPTED ------------->  |  echoed id must match
//! ```

use std::time::Duration;

use framebridge_frame::{
    Envelope, MessageFamily, ProtocolVersion, TransportAccepted, TransportHandshake,
    TransportHandshakeReply, PROTOCOL_VERSION_1_0, SUPPORTED_VERSIONS,
};
use tracing::{debug, info, warn};

use crate::channel::ChannelControl;
use crate::deadline::Deadline;
use crate::error::{BridgeError, Result};
use crate::inbox::Inbox;
use crate::setup::DEFAULT_HANDSHAKE_TIMEOUT;

/// Progress of the exchange, read the same way on both sides.
///
/// `HandshakeSent` means `TRANSPORT_HANDSHAKE` is on the wire,
/// `ReplyReceived` means the reply is, and `Connected` means the session id
/// was echoed back correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    HandshakeSent,
    ReplyReceived,
    Connected,
    Failed,
}

/// Configuration for the transport handshake.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Time allowed for the whole three-way exchange.
    pub handshake_timeout: Duration,
    /// Versions the outer side accepts.
    pub supported_versions: Vec<ProtocolVersion>,
    /// Version the inner side proposes.
    pub protocol_version: ProtocolVersion,
    /// Session id the inner side expects, when it ran setup in the same run.
    pub expected_session_id: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            supported_versions: SUPPORTED_VERSIONS.to_vec(),
            protocol_version: PROTOCOL_VERSION_1_0,
            expected_session_id: None,
        }
    }
}

/// Result of a successful transport handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    pub session_id: String,
    pub protocol_version: ProtocolVersion,
    /// Origin pinned on the transport channel.
    pub origin: String,
}

/// Outer side of the transport handshake.
#[derive(Debug)]
pub struct OuterHandshake {
    session_id: String,
    config: TransportConfig,
    state: TransportState,
}

impl OuterHandshake {
    /// Handshake that continues the setup session `session_id`.
    pub fn new(session_id: impl Into<String>, config: TransportConfig) -> Self {
        Self {
            session_id: session_id.into(),
            config,
            state: TransportState::Idle,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Answer the inner context's handshake and wait for its acceptance.
    ///
    /// `inbox` must have been subscribed to `channel` before navigation.
    pub async fn run<C>(
        &mut self,
        channel: &C,
        inbox: &mut Inbox,
        deadline: &Deadline,
    ) -> Result<HandshakeResult>
    where
        C: ChannelControl + ?Sized,
    {
        let deadline = deadline.child(self.config.handshake_timeout);
        let result = self.drive(channel, inbox, &deadline).await;
        match &result {
            Ok(done) => {
                self.state = TransportState::Connected;
                info!(session_id = %done.session_id, origin = %done.origin, "transport connected");
            }
            Err(err) => {
                self.state = TransportState::Failed;
                warn!(session_id = %self.session_id, "transport handshake failed: {err}");
            }
        }
        result
    }

    async fn drive<C>(
        &mut self,
        channel: &C,
        inbox: &mut Inbox,
        deadline: &Deadline,
    ) -> Result<HandshakeResult>
    where
        C: ChannelControl + ?Sized,
    {
        if self.session_id.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "transport handshake needs the setup session id".to_string(),
            ));
        }

        let handshake = loop {
            match inbox.next_envelope(MessageFamily::Transport, deadline).await? {
                Envelope::TransportHandshake(handshake) => break handshake,
                other => debug!("ignoring {} before handshake", other.message_type()),
            }
        };
        self.state = TransportState::HandshakeSent;

        let version: ProtocolVersion = handshake.protocol_version.parse()?;
        if !self.config.supported_versions.contains(&version) {
            warn!(%version, "unsupported transport version, withholding reply");
            return Err(BridgeError::IncompatibleVersion {
                requested: version.to_string(),
                supported: self
                    .config
                    .supported_versions
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }

        let origin = channel.pinned_origin().ok_or_else(|| {
            BridgeError::Protocol("transport handshake accepted without a pinned origin".to_string())
        })?;
        channel.post_message(
            &Envelope::TransportHandshakeReply(TransportHandshakeReply {
                protocol_version: version.to_string(),
                session_id: self.session_id.clone(),
            }),
            Some(&origin),
        )?;
        self.state = TransportState::ReplyReceived;

        let accepted = loop {
            match inbox.next_envelope(MessageFamily::Transport, deadline).await? {
                Envelope::TransportAccepted(accepted) => break accepted,
                other => debug!("ignoring {} while awaiting acceptance", other.message_type()),
            }
        };

        if accepted.session_id != self.session_id {
            return Err(BridgeError::SessionMismatch {
                expected: self.session_id.clone(),
                actual: accepted.session_id,
            });
        }

        Ok(HandshakeResult {
            session_id: accepted.session_id,
            protocol_version: version,
            origin,
        })
    }
}

/// Inner side of the transport handshake.
#[derive(Debug)]
pub struct InnerHandshake {
    config: TransportConfig,
    state: TransportState,
}

impl InnerHandshake {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            state: TransportState::Idle,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Open the handshake and accept the outer context's reply.
    pub async fn run<C>(
        &mut self,
        channel: &C,
        inbox: &mut Inbox,
        deadline: &Deadline,
    ) -> Result<HandshakeResult>
    where
        C: ChannelControl + ?Sized,
    {
        let deadline = deadline.child(self.config.handshake_timeout);
        let result = self.drive(channel, inbox, &deadline).await;
        match &result {
            Ok(done) => {
                self.state = TransportState::Connected;
                info!(session_id = %done.session_id, origin = %done.origin, "transport connected");
            }
            Err(err) => {
                self.state = TransportState::Failed;
                warn!("transport handshake failed: {err}");
            }
        }
        result
    }

    async fn drive<C>(
        &mut self,
        channel: &C,
        inbox: &mut Inbox,
        deadline: &Deadline,
    ) -> Result<HandshakeResult>
    where
        C: ChannelControl + ?Sized,
    {
        let proposed = self.config.protocol_version;
        channel.post_message(
            &Envelope::TransportHandshake(TransportHandshake {
                protocol_version: proposed.to_string(),
            }),
            None,
        )?;
        self.state = TransportState::HandshakeSent;

        let reply = loop {
            match inbox.next_envelope(MessageFamily::Transport, deadline).await? {
                Envelope::TransportHandshakeReply(reply) => break reply,
                other => debug!("ignoring {} while awaiting reply", other.message_type()),
            }
        };
        self.state = TransportState::ReplyReceived;

        let version: ProtocolVersion = reply.protocol_version.parse()?;
        if version != proposed {
            return Err(BridgeError::IncompatibleVersion {
                requested: proposed.to_string(),
                supported: version.to_string(),
            });
        }

        if let Some(expected) = &self.config.expected_session_id {
            if &reply.session_id != expected {
                return Err(BridgeError::SessionMismatch {
                    expected: expected.clone(),
                    actual: reply.session_id,
                });
            }
        }

        channel.post_message(
            &Envelope::TransportAccepted(TransportAccepted {
                session_id: reply.session_id.clone(),
            }),
            None,
        )?;

        let origin = channel.pinned_origin().ok_or_else(|| {
            BridgeError::Protocol("transport reply accepted without a pinned origin".to_string())
        })?;
        Ok(HandshakeResult {
            session_id: reply.session_id,
            protocol_version: version,
            origin,
        })
    }
}
