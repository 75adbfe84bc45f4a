//! Inner facade, used by the document loaded into the owned window.
//!
//! The document derives its [`Phase`](framebridge_frame::Phase) from its own
//! URL once, then either calls [`InnerBridge::begin_setup`] or
//! [`InnerBridge::start`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use framebridge_transport::{MessageBus, WindowId};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::channel::{ChannelConfig, InnerChannel};
use crate::deadline::Deadline;
use crate::error::{BridgeError, Result};
use crate::handshake::{HandshakeResult, InnerHandshake, TransportConfig};
use crate::inbox::Inbox;
use crate::relay::{FramedRelay, RelayHooks};
use crate::session::{Session, SessionPhase};
use crate::setup::{SetupRequest, SetupSession, DEFAULT_HANDSHAKE_TIMEOUT};

/// Configuration for [`InnerBridge`].
#[derive(Debug, Clone)]
pub struct InnerBridgeConfig {
    /// Parent origins that may be pinned. Permissive by default.
    pub channel: ChannelConfig,
    /// Time allowed for `SETUP_HANDSHAKE_REPLY` to arrive.
    pub setup_handshake_timeout: Duration,
    pub transport: TransportConfig,
}

impl Default for InnerBridgeConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::permissive(),
            setup_handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            transport: TransportConfig::default(),
        }
    }
}

/// Tool-side bridge to the parent or opener window.
pub struct InnerBridge {
    bus: Arc<dyn MessageBus>,
    local: WindowId,
    parent: WindowId,
    config: InnerBridgeConfig,
    token: CancellationToken,
    expected_session: Option<String>,
    session: Option<Session>,
    relay: Option<FramedRelay<InnerChannel>>,
    hooks: RelayHooks,
}

impl fmt::Debug for InnerBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InnerBridge")
            .field("local", &self.local)
            .field("parent", &self.parent)
            .field("session", &self.session)
            .field("closed", &self.hooks.is_closed())
            .finish()
    }
}

impl InnerBridge {
    /// Bridge from this document's window `local` to `parent`.
    pub fn new(
        bus: Arc<dyn MessageBus>,
        local: WindowId,
        parent: WindowId,
        config: InnerBridgeConfig,
    ) -> Self {
        Self {
            bus,
            local,
            parent,
            config,
            token: CancellationToken::new(),
            expected_session: None,
            session: None,
            relay: None,
            hooks: RelayHooks::default(),
        }
    }

    /// Open the setup phase. Finish the returned session once the user is
    /// done configuring.
    ///
    /// The assigned session id is remembered and checked during a later
    /// [`start`](Self::start) on this bridge.
    pub async fn begin_setup(&mut self, request: &SetupRequest) -> Result<SetupSession> {
        self.ensure_open()?;
        let channel = self.channel()?;
        let deadline =
            Deadline::with_token(self.config.setup_handshake_timeout, self.token.child_token());
        let session = SetupSession::begin(&channel, request, &deadline).await?;

        self.expected_session = Some(session.session_id().to_string());
        let mut state = Session::new(session.session_id(), session.protocol_version());
        state.pinned_origin = Some(session.origin().to_string());
        state.advance(SessionPhase::Setup);
        self.session = Some(state);
        Ok(session)
    }

    /// Run the transport handshake and connect the relay.
    pub async fn start(&mut self) -> Result<HandshakeResult> {
        self.ensure_open()?;
        if self.relay.is_some() {
            return Err(BridgeError::InvalidConfig(
                "transport already started".to_string(),
            ));
        }

        let channel = self.channel()?;
        let relay = FramedRelay::new(channel.clone())?;
        let mut inbox = Inbox::subscribe(&channel)?;
        self.hooks.attach(&relay)?;

        let mut config = self.config.transport.clone();
        if config.expected_session_id.is_none() {
            config.expected_session_id = self.expected_session.clone();
        }
        let deadline = Deadline::with_token(config.handshake_timeout, self.token.child_token());
        let mut handshake = InnerHandshake::new(config);
        let outcome = handshake.run(&channel, &mut inbox, &deadline).await;
        drop(inbox);

        let result = match outcome.and_then(|result| relay.connect().map(|()| result)) {
            Ok(result) => result,
            Err(err) => {
                self.hooks.detach(&relay);
                return Err(err);
            }
        };

        let mut session = Session::new(result.session_id.clone(), result.protocol_version);
        session.pinned_origin = Some(result.origin.clone());
        session.advance(SessionPhase::Transport);
        self.session = Some(session);
        self.relay = Some(relay);
        info!(session_id = %result.session_id, "inner bridge connected");
        Ok(result)
    }

    /// Send an application payload, queued until connected.
    pub fn send(&mut self, payload: Value) -> Result<()> {
        self.hooks.send(self.relay.as_ref(), payload)
    }

    /// Send without queueing; fails with `TransportNotReady` before connection.
    pub fn send_now(&self, payload: Value) -> Result<()> {
        self.hooks.send_now(self.relay.as_ref(), payload)
    }

    pub fn set_on_message(&mut self, handler: impl Fn(Value) + Send + Sync + 'static) {
        self.hooks
            .set_on_message(self.relay.as_ref(), Arc::new(handler));
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
        if let Some(relay) = self.relay.take() {
            relay.close();
        }
        if let Some(session) = self.session.as_mut() {
            session.advance(SessionPhase::Closed);
        }
        self.hooks.close();
        info!(window = %self.local, "inner bridge closed");
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.relay.as_ref().is_some_and(FramedRelay::is_connected)
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

    fn channel(&self) -> Result<InnerChannel> {
        InnerChannel::new(
            Arc::clone(&self.bus),
            self.local,
            self.parent,
            &self.config.channel,
        )
    }
}

#[cfg(test)]
mod tests {
    use framebridge_transport::{MemoryBus, WindowHost};
    use serde_json::json;

    use super::*;

    async fn bridge() -> (Arc<MemoryBus>, InnerBridge) {
        let bus = Arc::new(MemoryBus::new());
        let host = bus.open_window("https://host.example/chat").unwrap();
        let frame = bus.open_frame();
        bus.navigate(frame, "https://tool.example/pi")
            .unwrap()
            .wait()
            .await
            .unwrap();
        let bridge = InnerBridge::new(bus.clone(), frame, host, InnerBridgeConfig::default());
        (bus, bridge)
    }

    #[tokio::test(start_paused = true)]
    async fn start_times_out_and_releases_listeners() {
        let (bus, mut bridge) = bridge().await;
        let result = bridge.start().await;
        assert!(matches!(
            result,
            Err(BridgeError::HandshakeTimeout(d)) if d == DEFAULT_HANDSHAKE_TIMEOUT
        ));
        assert_eq!(bus.listener_count(bridge.local), 0);
        assert!(!bridge.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn begin_setup_times_out_without_parent() {
        let (bus, mut bridge) = bridge().await;
        let result = bridge.begin_setup(&SetupRequest::default()).await;
        assert!(matches!(result, Err(BridgeError::HandshakeTimeout(_))));
        assert_eq!(bus.listener_count(bridge.local), 0);
        assert!(bridge.session().is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (_bus, mut bridge) = bridge().await;
        let closes = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&closes);
        bridge.set_on_close(move || {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        bridge.close();
        bridge.close();
        assert_eq!(closes.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(matches!(bridge.send(json!(1)), Err(BridgeError::Closed)));
        assert!(matches!(bridge.start().await, Err(BridgeError::Closed)));
    }
}
