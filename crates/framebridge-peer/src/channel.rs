//! Channel Control: the per-connection-attempt wrapper around the raw bus.
//!
//! A channel knows exactly one counterpart window. Inbound events are
//! accepted only when `event.source` is that window and `event.origin`
//! passes the [`OriginGuard`]. Any number of logical subscribers share a
//! single low-level bus listener, which is attached with the first
//! subscriber and detached with the last.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use framebridge_frame::{encode_envelope, Envelope};
use framebridge_transport::{
    ListenerId, MessageBus, MessageEvent, TransportError, WindowHost, WindowId, WILDCARD_ORIGIN,
};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::deadline::Deadline;
use crate::error::{BridgeError, Result};
use crate::origin::{Admission, OriginGuard, OriginPolicy};

/// Default time allowed for the inner window to load.
pub const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration shared by both channel directions.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Origins that may be pinned. `"*"` accepts the first sender.
    pub allowed_origins: Vec<String>,
    /// Time allowed for `navigate` to settle (outer only).
    pub navigation_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
        }
    }
}

impl ChannelConfig {
    /// Accept exactly the given origins.
    pub fn allowing<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_origins: origins.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Accept whichever origin speaks first.
    pub fn permissive() -> Self {
        Self::allowing([WILDCARD_ORIGIN])
    }

    fn policy(&self) -> Result<OriginPolicy> {
        if self.allowed_origins.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "allowed_origins must not be empty".to_string(),
            ));
        }
        if self.allowed_origins.iter().any(String::is_empty) {
            return Err(BridgeError::InvalidConfig(
                "allowed_origins must not contain empty entries".to_string(),
            ));
        }
        Ok(OriginPolicy::new(self.allowed_origins.iter().cloned()))
    }
}

/// A message that passed window identity and origin checks.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Origin of the sender (always the pinned origin).
    pub origin: String,
    /// Raw message data, not yet classified.
    pub data: Value,
}

/// Logical subscriber callback.
pub type MessageHandler = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// Behaviour shared by the outer and inner channel.
pub trait ChannelControl: Send + Sync {
    /// Post an envelope to the counterpart.
    ///
    /// The outer direction requires `Some(target_origin)`. The inner
    /// direction falls back to the pinned origin, or to `*` for the very
    /// first outbound message only.
    fn post_message(&self, envelope: &Envelope, target_origin: Option<&str>) -> Result<()>;

    /// Register a logical subscriber.
    fn on_message(&self, handler: MessageHandler) -> Result<Subscription>;

    /// Origin pinned by the first accepted message.
    fn pinned_origin(&self) -> Option<String>;

    /// Tear down every listener and release the counterpart. Idempotent.
    fn destroy(&self);

    fn is_destroyed(&self) -> bool;
}

/// Handle for a logical subscriber. Unsubscribes on drop.
pub struct Subscription {
    core: Weak<ChannelCore>,
    id: u64,
    active: bool,
}

impl Subscription {
    /// Remove this subscriber. Siblings keep receiving.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        if let Some(core) = self.core.upgrade() {
            core.unsubscribe(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

struct ChannelCore {
    bus: Arc<dyn MessageBus>,
    local: WindowId,
    counterpart: WindowId,
    role: &'static str,
    state: Mutex<CoreState>,
}

struct CoreState {
    guard: OriginGuard,
    handlers: BTreeMap<u64, MessageHandler>,
    next_handler: u64,
    listener: Option<ListenerId>,
    destroyed: bool,
}

impl ChannelCore {
    fn new(
        bus: Arc<dyn MessageBus>,
        local: WindowId,
        counterpart: WindowId,
        role: &'static str,
        policy: OriginPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            local,
            counterpart,
            role,
            state: Mutex::new(CoreState {
                guard: OriginGuard::new(policy),
                handlers: BTreeMap::new(),
                next_handler: 1,
                listener: None,
                destroyed: false,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribe(self: &Arc<Self>, handler: MessageHandler) -> Result<Subscription> {
        let mut state = self.lock();
        if state.destroyed {
            return Err(BridgeError::Closed);
        }

        if state.listener.is_none() {
            let weak = Arc::downgrade(self);
            let listener = self.bus.add_listener(
                self.local,
                Arc::new(move |event: &MessageEvent| {
                    if let Some(core) = weak.upgrade() {
                        core.dispatch(event);
                    }
                }),
            )?;
            state.listener = Some(listener);
            debug!(role = self.role, window = %self.local, "attached bus listener");
        }

        let id = state.next_handler;
        state.next_handler += 1;
        state.handlers.insert(id, handler);

        Ok(Subscription {
            core: Arc::downgrade(self),
            id,
            active: true,
        })
    }

    fn unsubscribe(&self, id: u64) {
        let mut state = self.lock();
        state.handlers.remove(&id);
        if state.handlers.is_empty() {
            if let Some(listener) = state.listener.take() {
                self.bus.remove_listener(self.local, listener);
                debug!(role = self.role, window = %self.local, "detached bus listener");
            }
        }
    }

    fn dispatch(&self, event: &MessageEvent) {
        let handlers: Vec<MessageHandler> = {
            let mut state = self.lock();
            if state.destroyed {
                return;
            }
            if event.source != self.counterpart {
                trace!(
                    role = self.role,
                    source = %event.source,
                    expected = %self.counterpart,
                    "message from unrelated window ignored"
                );
                return;
            }
            match state.guard.admit(&event.origin) {
                Ok(Admission::Pinned) => {
                    debug!(role = self.role, origin = %event.origin, "pinned counterpart origin");
                }
                Ok(Admission::Matched) => {}
                Err(err) => {
                    warn!(role = self.role, origin = %event.origin, "dropping message: {err}");
                    return;
                }
            }
            state.handlers.values().cloned().collect()
        };

        let inbound = InboundMessage {
            origin: event.origin.clone(),
            data: event.data.clone(),
        };
        for handler in handlers {
            handler(&inbound);
        }
    }

    fn post(&self, envelope: &Envelope, target_origin: &str) -> Result<()> {
        if self.lock().destroyed {
            return Err(BridgeError::Closed);
        }
        let value = encode_envelope(envelope)?;
        debug!(
            role = self.role,
            message_type = envelope.message_type(),
            target_origin,
            "posting envelope"
        );
        self.bus
            .post_message(self.local, self.counterpart, value, target_origin)?;
        Ok(())
    }

    fn pinned_origin(&self) -> Option<String> {
        self.lock().guard.pinned().map(str::to_string)
    }

    fn destroy(&self) {
        let mut state = self.lock();
        if std::mem::replace(&mut state.destroyed, true) {
            return;
        }
        state.handlers.clear();
        if let Some(listener) = state.listener.take() {
            self.bus.remove_listener(self.local, listener);
        }
        debug!(role = self.role, window = %self.local, "channel destroyed");
    }

    fn is_destroyed(&self) -> bool {
        self.lock().destroyed
    }
}

impl Drop for ChannelCore {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(listener) = state.listener.take() {
            self.bus.remove_listener(self.local, listener);
        }
    }
}

/// Channel held by the outer context: it owns the inner window.
#[derive(Clone)]
pub struct OuterChannel {
    core: Arc<ChannelCore>,
    host: Arc<dyn WindowHost>,
    navigation_timeout: Duration,
}

impl OuterChannel {
    /// Create a channel from `local` (the host page) to `inner` (the owned window).
    pub fn new<B>(bus: Arc<B>, local: WindowId, inner: WindowId, config: &ChannelConfig) -> Result<Self>
    where
        B: MessageBus + WindowHost + 'static,
    {
        let policy = config.policy()?;
        let host: Arc<dyn WindowHost> = bus.clone();
        Ok(Self {
            core: ChannelCore::new(bus, local, inner, "outer", policy),
            host,
            navigation_timeout: config.navigation_timeout,
        })
    }

    /// Navigate the inner window and wait for it to load.
    pub async fn navigate(&self, url: &str) -> Result<()> {
        self.navigate_with(url, &Deadline::after(self.navigation_timeout))
            .await
    }

    /// Navigate bounded by an explicit deadline.
    pub async fn navigate_with(&self, url: &str, deadline: &Deadline) -> Result<()> {
        if self.core.is_destroyed() {
            return Err(BridgeError::Closed);
        }
        let deadline = deadline.child(self.navigation_timeout);
        debug!(window = %self.core.counterpart, url, "navigating inner window");
        let navigation = self.host.navigate(self.core.counterpart, url)?;

        let loaded = deadline
            .run(async {
                navigation.wait().await.map_err(|err| match err {
                    TransportError::NavigationFailed { reason, .. } => {
                        BridgeError::NavigationFailed(reason)
                    }
                    other => BridgeError::Transport(other),
                })
            })
            .await;

        match loaded {
            Err(BridgeError::HandshakeTimeout(timeout)) => {
                warn!(url, "navigation timed out after {timeout:?}");
                Err(BridgeError::NavigationTimeout(timeout))
            }
            other => other,
        }
    }

    /// Show or hide the inner window. The message channel is unaffected.
    pub fn set_visible(&self, visible: bool) -> Result<()> {
        if self.core.is_destroyed() {
            return Err(BridgeError::Closed);
        }
        self.host.set_visible(self.core.counterpart, visible)?;
        Ok(())
    }

    /// Replace the capability allow-list of the inner window.
    pub fn apply_permissions(&self, capabilities: &[String]) -> Result<()> {
        if self.core.is_destroyed() {
            return Err(BridgeError::Closed);
        }
        self.host
            .set_capabilities(self.core.counterpart, capabilities)?;
        Ok(())
    }

    /// The owned inner window.
    pub fn inner_window(&self) -> WindowId {
        self.core.counterpart
    }
}

impl ChannelControl for OuterChannel {
    fn post_message(&self, envelope: &Envelope, target_origin: Option<&str>) -> Result<()> {
        let target_origin = target_origin.ok_or(BridgeError::MissingTargetOrigin)?;
        self.core.post(envelope, target_origin)
    }

    fn on_message(&self, handler: MessageHandler) -> Result<Subscription> {
        self.core.subscribe(handler)
    }

    fn pinned_origin(&self) -> Option<String> {
        self.core.pinned_origin()
    }

    fn destroy(&self) {
        self.core.destroy();
    }

    fn is_destroyed(&self) -> bool {
        self.core.is_destroyed()
    }
}

/// Channel held by the inner context: it can only message its parent/opener.
#[derive(Clone)]
pub struct InnerChannel {
    core: Arc<ChannelCore>,
    sent_unpinned: Arc<AtomicBool>,
}

impl InnerChannel {
    /// Create a channel from `local` (this document's window) to `parent`.
    pub fn new(
        bus: Arc<dyn MessageBus>,
        local: WindowId,
        parent: WindowId,
        config: &ChannelConfig,
    ) -> Result<Self> {
        let policy = config.policy()?;
        Ok(Self {
            core: ChannelCore::new(bus, local, parent, "inner", policy),
            sent_unpinned: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The parent/opener window.
    pub fn parent_window(&self) -> WindowId {
        self.core.counterpart
    }
}

impl ChannelControl for InnerChannel {
    fn post_message(&self, envelope: &Envelope, target_origin: Option<&str>) -> Result<()> {
        if let Some(target_origin) = target_origin {
            return self.core.post(envelope, target_origin);
        }
        match self.core.pinned_origin() {
            Some(pinned) => self.core.post(envelope, &pinned),
            None => {
                if self.sent_unpinned.swap(true, Ordering::SeqCst) {
                    return Err(BridgeError::OriginNotPinned);
                }
                self.core.post(envelope, WILDCARD_ORIGIN)
            }
        }
    }

    fn on_message(&self, handler: MessageHandler) -> Result<Subscription> {
        self.core.subscribe(handler)
    }

    fn pinned_origin(&self) -> Option<String> {
        self.core.pinned_origin()
    }

    fn destroy(&self) {
        self.core.destroy();
    }

    fn is_destroyed(&self) -> bool {
        self.core.is_destroyed()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use framebridge_frame::{TransportHandshake, PROTOCOL_VERSION_1_0};
    use framebridge_transport::{MemoryBus, NavigationRule};
    use serde_json::json;

    use super::*;

    const HOST_URL: &str = "https://host.example/chat";
    const TOOL_URL: &str = "https://tool.example/app";

    struct Fixture {
        bus: Arc<MemoryBus>,
        host: WindowId,
        frame: WindowId,
    }

    async fn fixture() -> Fixture {
        let bus = Arc::new(MemoryBus::new());
        let host = bus.open_window(HOST_URL).unwrap();
        let frame = bus.open_frame();
        bus.navigate(frame, TOOL_URL).unwrap().wait().await.unwrap();
        Fixture { bus, host, frame }
    }

    fn collector() -> (MessageHandler, Arc<Mutex<Vec<InboundMessage>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: MessageHandler =
            Arc::new(move |msg: &InboundMessage| sink.lock().unwrap().push(msg.clone()));
        (handler, seen)
    }

    fn handshake() -> Envelope {
        Envelope::TransportHandshake(TransportHandshake {
            protocol_version: PROTOCOL_VERSION_1_0.to_string(),
        })
    }

    #[tokio::test]
    async fn accepts_counterpart_and_pins_origin() {
        let f = fixture().await;
        let channel = OuterChannel::new(
            f.bus.clone(),
            f.host,
            f.frame,
            &ChannelConfig::permissive(),
        )
        .unwrap();
        let (handler, seen) = collector();
        let _sub = channel.on_message(handler).unwrap();

        f.bus
            .post_message(f.frame, f.host, json!({"n": 1}), "*")
            .unwrap();

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(
            channel.pinned_origin().as_deref(),
            Some("https://tool.example")
        );
    }

    #[tokio::test]
    async fn ignores_unrelated_windows() {
        let f = fixture().await;
        let stranger = f.bus.open_window("https://tool.example/other").unwrap();
        let channel = OuterChannel::new(
            f.bus.clone(),
            f.host,
            f.frame,
            &ChannelConfig::permissive(),
        )
        .unwrap();
        let (handler, seen) = collector();
        let _sub = channel.on_message(handler).unwrap();

        f.bus
            .post_message(stranger, f.host, json!({"spoof": true}), "*")
            .unwrap();

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(channel.pinned_origin(), None);
    }

    #[tokio::test]
    async fn later_origin_change_is_dropped() {
        let f = fixture().await;
        let channel = OuterChannel::new(
            f.bus.clone(),
            f.host,
            f.frame,
            &ChannelConfig::allowing(["https://tool.example", "https://cdn.example"]),
        )
        .unwrap();
        let (handler, seen) = collector();
        let _sub = channel.on_message(handler).unwrap();

        f.bus.post_message(f.frame, f.host, json!(1), "*").unwrap();
        f.bus.set_origin(f.frame, "https://cdn.example").unwrap();
        f.bus.post_message(f.frame, f.host, json!(2), "*").unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].data, json!(1));
        assert_eq!(
            channel.pinned_origin().as_deref(),
            Some("https://tool.example")
        );
    }

    #[tokio::test]
    async fn disallowed_origin_never_delivered() {
        let f = fixture().await;
        let channel = OuterChannel::new(
            f.bus.clone(),
            f.host,
            f.frame,
            &ChannelConfig::allowing(["https://trusted.example"]),
        )
        .unwrap();
        let (handler, seen) = collector();
        let _sub = channel.on_message(handler).unwrap();

        f.bus.post_message(f.frame, f.host, json!(1), "*").unwrap();
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(channel.pinned_origin(), None);
    }

    #[tokio::test]
    async fn subscribers_share_one_listener() {
        let f = fixture().await;
        let channel = OuterChannel::new(
            f.bus.clone(),
            f.host,
            f.frame,
            &ChannelConfig::permissive(),
        )
        .unwrap();
        let (first_handler, first) = collector();
        let (second_handler, second) = collector();

        let first_sub = channel.on_message(first_handler).unwrap();
        let second_sub = channel.on_message(second_handler).unwrap();
        assert_eq!(f.bus.listener_count(f.host), 1);

        first_sub.unsubscribe();
        assert_eq!(f.bus.listener_count(f.host), 1);

        f.bus.post_message(f.frame, f.host, json!(1), "*").unwrap();
        assert!(first.lock().unwrap().is_empty());
        assert_eq!(second.lock().unwrap().len(), 1);

        drop(second_sub);
        assert_eq!(f.bus.listener_count(f.host), 0);
    }

    #[tokio::test]
    async fn destroy_is_idempotent_and_detaches() {
        let f = fixture().await;
        let channel = OuterChannel::new(
            f.bus.clone(),
            f.host,
            f.frame,
            &ChannelConfig::permissive(),
        )
        .unwrap();
        channel.destroy();
        channel.destroy();
        assert!(channel.is_destroyed());

        let fresh = OuterChannel::new(
            f.bus.clone(),
            f.host,
            f.frame,
            &ChannelConfig::permissive(),
        )
        .unwrap();
        let (handler, _) = collector();
        let sub = fresh.on_message(handler).unwrap();
        assert_eq!(f.bus.listener_count(f.host), 1);
        fresh.destroy();
        fresh.destroy();
        assert_eq!(f.bus.listener_count(f.host), 0);
        drop(sub);

        assert!(matches!(
            fresh.post_message(&handshake(), Some("*")),
            Err(BridgeError::Closed)
        ));
        let (handler, _) = collector();
        assert!(matches!(fresh.on_message(handler), Err(BridgeError::Closed)));
    }

    #[tokio::test]
    async fn outer_requires_target_origin() {
        let f = fixture().await;
        let channel = OuterChannel::new(
            f.bus.clone(),
            f.host,
            f.frame,
            &ChannelConfig::permissive(),
        )
        .unwrap();
        assert!(matches!(
            channel.post_message(&handshake(), None),
            Err(BridgeError::MissingTargetOrigin)
        ));
        channel
            .post_message(&handshake(), Some("https://tool.example"))
            .unwrap();
    }

    #[tokio::test]
    async fn inner_uses_wildcard_once_then_pinned() {
        let f = fixture().await;
        let inner = InnerChannel::new(
            f.bus.clone(),
            f.frame,
            f.host,
            &ChannelConfig::permissive(),
        )
        .unwrap();
        let (handler, _) = collector();
        let _sub = inner.on_message(handler).unwrap();

        inner.post_message(&handshake(), None).unwrap();
        assert!(matches!(
            inner.post_message(&handshake(), None),
            Err(BridgeError::OriginNotPinned)
        ));

        f.bus.post_message(f.host, f.frame, json!({}), "*").unwrap();
        assert_eq!(
            inner.pinned_origin().as_deref(),
            Some("https://host.example")
        );
        inner.post_message(&handshake(), None).unwrap();
    }

    #[tokio::test]
    async fn empty_allow_list_is_invalid() {
        let f = fixture().await;
        let result = OuterChannel::new(f.bus.clone(), f.host, f.frame, &ChannelConfig::default());
        assert!(matches!(result, Err(BridgeError::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn navigate_reports_timeout_and_failure() {
        let f = fixture().await;
        let config = ChannelConfig {
            navigation_timeout: Duration::from_secs(2),
            ..ChannelConfig::permissive()
        };
        let channel = OuterChannel::new(f.bus.clone(), f.host, f.frame, &config).unwrap();

        f.bus
            .set_navigation_rule("https://slow.example/app", NavigationRule::Stall);
        assert!(matches!(
            channel.navigate("https://slow.example/app").await,
            Err(BridgeError::NavigationTimeout(d)) if d == Duration::from_secs(2)
        ));

        f.bus.set_navigation_rule(
            "https://broken.example/app",
            NavigationRule::Fail("net::ERR_CONNECTION_REFUSED".to_string()),
        );
        assert!(matches!(
            channel.navigate("https://broken.example/app").await,
            Err(BridgeError::NavigationFailed(reason)) if reason == "net::ERR_CONNECTION_REFUSED"
        ));

        channel.navigate(TOOL_URL).await.unwrap();
        assert_eq!(f.bus.current_url(f.frame).as_deref(), Some(TOOL_URL));
    }

    #[tokio::test]
    async fn visibility_and_permissions_reach_window() {
        let f = fixture().await;
        let channel = OuterChannel::new(
            f.bus.clone(),
            f.host,
            f.frame,
            &ChannelConfig::permissive(),
        )
        .unwrap();
        channel.set_visible(true).unwrap();
        assert!(f.bus.is_visible(f.frame));
        channel.set_visible(false).unwrap();
        assert!(!f.bus.is_visible(f.frame));

        channel
            .apply_permissions(&["clipboard-write".to_string()])
            .unwrap();
        assert_eq!(f.bus.capabilities(f.frame), vec!["clipboard-write"]);
    }
}
