//! Setup handshake: version and permission negotiation, then a single
//! user-paced completion message.
//!
//! ```text
//! inner                                   outer
//!   | -- SETUP_HANDSHAKE (to "*") ------->  |  pin origin, negotiate version,
//!   |                                       |  resolve + apply permissions
//!   | <------ SETUP_HANDSHAKE_REPLY ------  |  (session id assigned here)
//!   |   ... user configures the tool ...    |
//!   | -- SETUP_COMPLETE ----------------->  |  settle setup(), destroy channel
//! ```
//!
//! When no common version exists the outer side withholds its reply and
//! fails locally with `IncompatibleVersion`; the inner side observes a
//! handshake timeout.

use std::fmt;
use std::time::Duration;

use framebridge_frame::{
    negotiate_version, Envelope, MessageFamily, PermissionRequirement, Phase, ProtocolVersion,
    SetupComplete, SetupHandshake, SetupHandshakeReply, SetupStatus, TransportVisibility,
    VisibilityRequirement, PROTOCOL_VERSION_1_0, SUPPORTED_VERSIONS,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::{ChannelControl, InnerChannel, OuterChannel};
use crate::deadline::Deadline;
use crate::error::{BridgeError, Result};
use crate::inbox::Inbox;
use crate::permission::{resolve_permissions, PermissionApprover};

/// Default time allowed for each handshake exchange.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
/// Default time allowed for the whole, user-paced setup.
pub const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Progress of a setup attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupState {
    Idle,
    AwaitingReply,
    Negotiating,
    Complete,
    Failed,
}

/// Outer-side setup configuration.
#[derive(Debug, Clone)]
pub struct SetupConfig {
    /// Time allowed for `SETUP_HANDSHAKE` to arrive after navigation.
    pub handshake_timeout: Duration,
    /// Time allowed for the whole setup, including user interaction.
    pub setup_timeout: Duration,
    /// Versions the outer side speaks.
    pub supported_versions: Vec<ProtocolVersion>,
    /// Fixed session id. A random UUID is generated when unset.
    pub session_id: Option<String>,
    /// Hide the inner window again once setup ends, if it was shown.
    pub hide_after_setup: bool,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            setup_timeout: DEFAULT_SETUP_TIMEOUT,
            supported_versions: SUPPORTED_VERSIONS.to_vec(),
            session_id: None,
            hide_after_setup: true,
        }
    }
}

/// Successful setup as seen by the outer context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupResult {
    pub success: bool,
    pub session_id: String,
    pub protocol_version: ProtocolVersion,
    pub display_name: String,
    pub transport_visibility: TransportVisibility,
    pub ephemeral_message: Option<String>,
    pub granted_permissions: Vec<String>,
    /// Origin pinned during setup.
    pub origin: String,
}

/// One outer-side setup attempt over a fresh channel.
pub struct OuterSetup {
    channel: OuterChannel,
    inbox: Inbox,
    config: SetupConfig,
    state: SetupState,
    shown: bool,
}

impl fmt::Debug for OuterSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OuterSetup")
            .field("state", &self.state)
            .field("config", &self.config)
            .finish()
    }
}

impl OuterSetup {
    /// Subscribe to `channel`. Call before navigating so no handshake is missed.
    pub fn new(channel: &OuterChannel, config: SetupConfig) -> Result<Self> {
        if config.supported_versions.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "supported_versions must not be empty".to_string(),
            ));
        }
        let inbox = Inbox::subscribe(channel)?;
        Ok(Self {
            channel: channel.clone(),
            inbox,
            config,
            state: SetupState::Idle,
            shown: false,
        })
    }

    pub fn state(&self) -> SetupState {
        self.state
    }

    /// Run the attempt to completion. The channel is destroyed afterwards
    /// whatever the outcome.
    pub async fn run(
        &mut self,
        approver: &dyn PermissionApprover,
        deadline: &Deadline,
    ) -> Result<SetupResult> {
        if self.state != SetupState::Idle {
            return Err(BridgeError::InvalidConfig(
                "setup attempt already used".to_string(),
            ));
        }

        let result = self.drive(approver, deadline).await;
        match &result {
            Ok(outcome) => {
                self.state = SetupState::Complete;
                info!(
                    session_id = %outcome.session_id,
                    display_name = %outcome.display_name,
                    "setup complete"
                );
            }
            Err(err) => {
                self.state = SetupState::Failed;
                warn!("setup failed: {err}");
                if self.shown {
                    let _ = self.channel.set_visible(false);
                }
            }
        }
        self.channel.destroy();
        result
    }

    async fn drive(
        &mut self,
        approver: &dyn PermissionApprover,
        deadline: &Deadline,
    ) -> Result<SetupResult> {
        let overall = deadline.child(self.config.setup_timeout);
        let handshake_deadline = overall.child(self.config.handshake_timeout);

        self.state = SetupState::AwaitingReply;
        let handshake = match self
            .inbox
            .next_envelope(MessageFamily::Setup, &handshake_deadline)
            .await?
        {
            Envelope::SetupHandshake(handshake) => handshake,
            other => {
                return Err(BridgeError::Protocol(format!(
                    "expected SETUP_HANDSHAKE, got {}",
                    other.message_type()
                )))
            }
        };

        self.state = SetupState::Negotiating;
        let origin = self.channel.pinned_origin().ok_or_else(|| {
            BridgeError::Protocol("setup handshake accepted without a pinned origin".to_string())
        })?;

        let version = negotiate_version(
            &handshake.min_protocol_version,
            &handshake.max_protocol_version,
            &self.config.supported_versions,
        )
        .ok_or_else(|| {
            warn!(
                origin = %origin,
                min = %handshake.min_protocol_version,
                max = %handshake.max_protocol_version,
                "no common protocol version, withholding reply"
            );
            BridgeError::IncompatibleVersion {
                requested: format!(
                    "{}..{}",
                    handshake.min_protocol_version, handshake.max_protocol_version
                ),
                supported: join_versions(&self.config.supported_versions),
            }
        })?;

        let decision = resolve_permissions(&handshake.requested_permissions, approver, &origin)?;
        if !handshake.requested_permissions.is_empty() {
            self.channel.apply_permissions(&decision.granted)?;
        }

        let session_id = self
            .config
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.channel.post_message(
            &Envelope::SetupHandshakeReply(SetupHandshakeReply {
                protocol_version: version.to_string(),
                session_id: session_id.clone(),
            }),
            Some(&origin),
        )?;
        info!(origin = %origin, session_id = %session_id, %version, "setup handshake accepted");

        if handshake.requires_visible_setup {
            self.channel.set_visible(true)?;
            self.shown = true;
        }

        let complete = loop {
            match self
                .inbox
                .next_envelope(MessageFamily::Setup, &overall)
                .await?
            {
                Envelope::SetupComplete(complete) => break complete,
                other => debug!("ignoring {} while awaiting completion", other.message_type()),
            }
        };

        if self.shown && self.config.hide_after_setup {
            self.channel.set_visible(false)?;
            self.shown = false;
        }

        match complete.status {
            SetupStatus::Success => Ok(SetupResult {
                success: true,
                session_id,
                protocol_version: version,
                display_name: complete.display_name.unwrap_or_default(),
                transport_visibility: complete
                    .transport_visibility
                    .unwrap_or(TransportVisibility::new(VisibilityRequirement::Optional)),
                ephemeral_message: complete.ephemeral_message,
                granted_permissions: decision.granted,
                origin,
            }),
            SetupStatus::Error => Err(BridgeError::SetupFailed(
                complete
                    .error
                    .unwrap_or_else(|| "unspecified setup error".to_string()),
            )),
        }
    }
}

/// Navigate `channel` to `url` with the setup marker and run setup.
pub async fn perform_setup(
    channel: &OuterChannel,
    url: &str,
    config: SetupConfig,
    approver: &dyn PermissionApprover,
    deadline: &Deadline,
) -> Result<SetupResult> {
    let mut setup = OuterSetup::new(channel, config)?;
    let url = Phase::Setup.apply_to(url);
    if let Err(err) = channel.navigate_with(&url, deadline).await {
        channel.destroy();
        return Err(err);
    }
    setup.run(approver, deadline).await
}

fn join_versions(versions: &[ProtocolVersion]) -> String {
    versions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// What the inner context advertises when it opens setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupRequest {
    pub min_protocol_version: ProtocolVersion,
    pub max_protocol_version: ProtocolVersion,
    pub requires_visible_setup: bool,
    pub requested_permissions: Vec<PermissionRequirement>,
}

impl Default for SetupRequest {
    fn default() -> Self {
        Self {
            min_protocol_version: PROTOCOL_VERSION_1_0,
            max_protocol_version: PROTOCOL_VERSION_1_0,
            requires_visible_setup: false,
            requested_permissions: Vec::new(),
        }
    }
}

/// Inner side of an accepted setup handshake.
///
/// Finish it with [`SetupSession::complete`] or [`SetupSession::fail`];
/// dropping it unfinished just tears the channel down.
pub struct SetupSession {
    channel: InnerChannel,
    session_id: String,
    protocol_version: ProtocolVersion,
    origin: String,
}

impl fmt::Debug for SetupSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetupSession")
            .field("session_id", &self.session_id)
            .field("protocol_version", &self.protocol_version)
            .field("origin", &self.origin)
            .finish()
    }
}

impl SetupSession {
    /// Send `SETUP_HANDSHAKE` and wait for the reply within `deadline`.
    pub async fn begin(
        channel: &InnerChannel,
        request: &SetupRequest,
        deadline: &Deadline,
    ) -> Result<Self> {
        let result = Self::handshake(channel, request, deadline).await;
        if let Err(err) = &result {
            warn!("setup handshake failed: {err}");
            channel.destroy();
        }
        result
    }

    async fn handshake(
        channel: &InnerChannel,
        request: &SetupRequest,
        deadline: &Deadline,
    ) -> Result<Self> {
        if request.min_protocol_version > request.max_protocol_version {
            return Err(BridgeError::InvalidConfig(format!(
                "min version {} above max version {}",
                request.min_protocol_version, request.max_protocol_version
            )));
        }

        let mut inbox = Inbox::subscribe(channel)?;
        channel.post_message(
            &Envelope::SetupHandshake(SetupHandshake {
                min_protocol_version: request.min_protocol_version.to_string(),
                max_protocol_version: request.max_protocol_version.to_string(),
                requires_visible_setup: request.requires_visible_setup,
                requested_permissions: request.requested_permissions.clone(),
            }),
            None,
        )?;

        let reply = loop {
            match inbox.next_envelope(MessageFamily::Setup, deadline).await? {
                Envelope::SetupHandshakeReply(reply) => break reply,
                other => debug!("ignoring {} while awaiting reply", other.message_type()),
            }
        };

        let version: ProtocolVersion = reply.protocol_version.parse()?;
        if version < request.min_protocol_version || version > request.max_protocol_version {
            return Err(BridgeError::IncompatibleVersion {
                requested: format!(
                    "{}..{}",
                    request.min_protocol_version, request.max_protocol_version
                ),
                supported: version.to_string(),
            });
        }

        let origin = channel.pinned_origin().ok_or_else(|| {
            BridgeError::Protocol("setup reply accepted without a pinned origin".to_string())
        })?;
        info!(origin = %origin, session_id = %reply.session_id, %version, "setup session opened");

        Ok(Self {
            channel: channel.clone(),
            session_id: reply.session_id,
            protocol_version: version,
            origin,
        })
    }

    /// Session id assigned by the outer context.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    /// Origin of the outer context.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Report successful configuration and end the setup connection.
    pub fn complete(
        self,
        display_name: impl Into<String>,
        transport_visibility: TransportVisibility,
        ephemeral_message: Option<String>,
    ) -> Result<()> {
        self.finish(SetupComplete::success(
            display_name,
            transport_visibility,
            ephemeral_message,
        ))
    }

    /// Report a configuration error and end the setup connection.
    pub fn fail(self, error: impl Into<String>) -> Result<()> {
        self.finish(SetupComplete::error(error))
    }

    fn finish(self, complete: SetupComplete) -> Result<()> {
        self.channel
            .post_message(&Envelope::SetupComplete(complete), None)
    }
}

impl Drop for SetupSession {
    fn drop(&mut self) {
        self.channel.destroy();
    }
}
