//! Outer facade: the only surface a host application needs.
//!
//! `setup` → `prepare_to_connect` → `start`, then `send` and the message
//! callback until `close`.

use std::fmt;
use std::sync::Arc;

use framebridge_frame::{Phase, VisibilityRequirement};
use framebridge_transport::{strip_fragment, MessageBus, WindowHost, WindowId};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::channel::{ChannelConfig, ChannelControl, OuterChannel};
use crate::deadline::Deadline;
use crate::error::{BridgeError, Result};
use crate::handshake::{HandshakeResult, OuterHandshake, TransportConfig};
use crate::inbox::Inbox;
use crate::permission::{PermissionApprover, SafeListApprover};
use crate::relay::{FramedRelay, RelayHooks};
use crate::session::{Session, SessionPhase};
use crate::setup::{perform_setup, SetupConfig, SetupResult};

/// Configuration for [`OuterBridge`].
#[derive(Debug, Clone)]
pub struct OuterBridgeConfig {
    pub channel: ChannelConfig,
    pub setup: SetupConfig,
    pub transport: TransportConfig,
}

impl OuterBridgeConfig {
    /// Defaults with the given origin allow-list.
    pub fn new(channel: ChannelConfig) -> Self {
        Self {
            channel,
            setup: SetupConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

struct PendingTransport {
    relay: FramedRelay<OuterChannel>,
    inbox: Option<Inbox>,
}

/// Host-side bridge to one owned inner window.
pub struct OuterBridge<B> {
    bus: Arc<B>,
    local: WindowId,
    frame: WindowId,
    config: OuterBridgeConfig,
    approver: Arc<dyn PermissionApprover>,
    token: CancellationToken,
    server_url: Option<String>,
    setup: Option<SetupResult>,
    session: Option<Session>,
    transport: Option<PendingTransport>,
    hooks: RelayHooks,
}

impl<B> fmt::Debug for OuterBridge<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OuterBridge")
            .field("frame", &self.frame)
            .field("server_url", &self.server_url)
            .field("session", &self.session)
            .field("closed", &self.hooks.is_closed())
            .finish()
    }
}

impl<B> OuterBridge<B>
where
    B: MessageBus + WindowHost + 'static,
{
    /// Bridge from the host window `local` to the owned window `frame`.
    pub fn new(bus: Arc<B>, local: WindowId, frame: WindowId, config: OuterBridgeConfig) -> Self {
        Self {
            bus,
            local,
            frame,
            config,
            approver: Arc::new(SafeListApprover::default()),
            token: CancellationToken::new(),
            server_url: None,
            setup: None,
            session: None,
            transport: None,
            hooks: RelayHooks::default(),
        }
    }

    /// Replace the permission approver (defaults to [`SafeListApprover`]).
    pub fn with_approver(mut self, approver: impl PermissionApprover + 'static) -> Self {
        self.approver = Arc::new(approver);
        self
    }

    /// Run the setup phase against `server_url`.
    ///
    /// May be repeated after a failure; each attempt uses a fresh channel.
    pub async fn setup(&mut self, server_url: &str) -> Result<SetupResult> {
        self.ensure_open()?;
        if self.transport.is_some() {
            return Err(BridgeError::InvalidConfig(
                "setup after the transport phase began".to_string(),
            ));
        }

        let channel = self.channel()?;
        let deadline = Deadline::with_token(
            self.config.channel.navigation_timeout + self.config.setup.setup_timeout,
            self.token.child_token(),
        );
        let result = perform_setup(
            &channel,
            server_url,
            self.config.setup.clone(),
            self.approver.as_ref(),
            &deadline,
        )
        .await?;

        let mut session = Session::new(result.session_id.clone(), result.protocol_version);
        session.pinned_origin = Some(result.origin.clone());
        session.advance(SessionPhase::Setup);

        self.server_url = Some(strip_fragment(server_url).to_string());
        self.session = Some(session);
        self.setup = Some(result.clone());
        Ok(result)
    }

    /// Navigate the inner window for the transport phase.
    ///
    /// The relay is subscribed before navigation, so payloads sent now are
    /// queued and flushed once [`start`](Self::start) connects.
    pub async fn prepare_to_connect(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.transport.is_some() {
            return Err(BridgeError::InvalidConfig(
                "transport already prepared".to_string(),
            ));
        }
        let (url, setup) = match (&self.server_url, &self.setup) {
            (Some(url), Some(setup)) => (url.clone(), setup.clone()),
            _ => {
                return Err(BridgeError::InvalidConfig(
                    "setup must complete before connecting".to_string(),
                ))
            }
        };

        let channel = self.channel()?;
        let inbox = Inbox::subscribe(&channel)?;
        let relay = FramedRelay::new(channel.clone())?;

        let prepared = async {
            if !setup.granted_permissions.is_empty() {
                channel.apply_permissions(&setup.granted_permissions)?;
            }
            let deadline = Deadline::with_token(
                self.config.channel.navigation_timeout,
                self.token.child_token(),
            );
            channel
                .navigate_with(&Phase::Transport.apply_to(&url), &deadline)
                .await?;
            match setup.transport_visibility.requirement {
                VisibilityRequirement::Required => channel.set_visible(true),
                VisibilityRequirement::Hidden => channel.set_visible(false),
                VisibilityRequirement::Optional => Ok(()),
            }
        }
        .await;

        if let Err(err) = prepared {
            relay.close();
            return Err(err);
        }

        self.hooks.attach(&relay)?;
        debug!(url = %url, "transport channel prepared");
        self.transport = Some(PendingTransport {
            relay,
            inbox: Some(inbox),
        });
        Ok(())
    }

    /// Run the transport handshake and connect the relay.
    ///
    /// A failed handshake closes the transport channel; call
    /// [`prepare_to_connect`](Self::prepare_to_connect) again to retry.
    /// Payloads still queued carry over to the retry.
    pub async fn start(&mut self) -> Result<HandshakeResult> {
        self.ensure_open()?;
        let session_id = self
            .session
            .as_ref()
            .map(|session| session.session_id.clone())
            .ok_or_else(|| {
                BridgeError::InvalidConfig("setup must complete before start".to_string())
            })?;
        let transport = self.transport.as_mut().ok_or_else(|| {
            BridgeError::InvalidConfig("prepare_to_connect must run before start".to_string())
        })?;
        let mut inbox = transport
            .inbox
            .take()
            .ok_or_else(|| BridgeError::InvalidConfig("transport already started".to_string()))?;
        let relay = transport.relay.clone();

        let deadline = Deadline::with_token(
            self.config.transport.handshake_timeout,
            self.token.child_token(),
        );
        let mut handshake = OuterHandshake::new(session_id, self.config.transport.clone());
        let outcome = handshake.run(relay.channel(), &mut inbox, &deadline).await;
        drop(inbox);

        let result = match outcome.and_then(|result| relay.connect().map(|()| result)) {
            Ok(result) => result,
            Err(err) => {
                self.hooks.detach(&relay);
                self.transport = None;
                return Err(err);
            }
        };

        if let Some(session) = self.session.as_mut() {
            session.pinned_origin = Some(result.origin.clone());
            session.advance(SessionPhase::Transport);
        }
        info!(session_id = %result.session_id, "outer bridge connected");
        Ok(result)
    }

    /// Send an application payload. Payloads sent before the session is
    /// connected are queued in order.
    pub fn send(&mut self, payload: Value) -> Result<()> {
        let relay = self.transport.as_ref().map(|t| &t.relay);
        self.hooks.send(relay, payload)
    }

    /// Send without queueing; fails with `TransportNotReady` before connection.
    pub fn send_now(&self, payload: Value) -> Result<()> {
        let relay = self.transport.as_ref().map(|t| &t.relay);
        self.hooks.send_now(relay, payload)
    }

    /// Register the single callback for inbound payloads.
    pub fn set_on_message(&mut self, handler: impl Fn(Value) + Send + Sync + 'static) {
        let relay = self.transport.as_ref().map(|t| &t.relay);
        self.hooks.set_on_message(relay, Arc::new(handler));
    }

    /// Register the close callback. It runs at most once.
    pub fn set_on_close(&mut self, handler: impl FnOnce() + Send + 'static) {
        self.hooks.set_on_close(handler);
    }

    /// Tear everything down. Safe to call more than once.
    pub fn close(&mut self) {
        if self.hooks.is_closed() {
            return;
        }
        self.token.cancel();
        if let Some(transport) = self.transport.take() {
            transport.relay.close();
        }
        if let Some(session) = self.session.as_mut() {
            session.advance(SessionPhase::Closed);
        }
        self.hooks.close();
        info!(frame = %self.frame, "outer bridge closed");
    }

    /// Token that aborts any in-flight navigation or handshake when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Result of the last successful setup.
    pub fn setup_result(&self) -> Option<&SetupResult> {
        self.setup.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.transport
            .as_ref()
            .is_some_and(|transport| transport.relay.is_connected())
    }

    pub fn is_closed(&self) -> bool {
        self.hooks.is_closed()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.hooks.is_closed() {
            return Err(BridgeError::Closed);
        }
        Ok(())
    }

    fn channel(&self) -> Result<OuterChannel> {
        OuterChannel::new(
            Arc::clone(&self.bus),
            self.local,
            self.frame,
            &self.config.channel,
        )
    }
}
