//! Framed Message Relay: wraps application payloads in `MESSAGE` envelopes
//! once the transport session is connected.
//!
//! Outbound payloads sent before [`FramedRelay::connect`] are queued in FIFO
//! order and flushed on connect. Inbound payloads that arrive before connect,
//! or before a handler is registered, are held until both are in place.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use framebridge_frame::{classify, decode_envelope, Envelope, MessageFamily};
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::channel::{ChannelControl, InboundMessage, Subscription};
use crate::error::{BridgeError, Result};

/// Maximum payloads held in either direction while the session is not
/// connected or no handler is registered.
pub const MAX_QUEUED_PAYLOADS: usize = 256;

/// Receives unwrapped application payloads.
pub type PayloadHandler = Arc<dyn Fn(Value) + Send + Sync>;

type CloseHandler = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayPhase {
    Pending,
    Flushing,
    Connected,
    Closed,
}

struct RelayState {
    phase: RelayPhase,
    outbound: VecDeque<Value>,
    inbound: VecDeque<Value>,
    on_message: Option<PayloadHandler>,
    on_close: Option<CloseHandler>,
    subscription: Option<Subscription>,
}

type SharedState = Arc<Mutex<RelayState>>;

fn lock(state: &Mutex<RelayState>) -> MutexGuard<'_, RelayState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Payload relay over one channel.
#[derive(Clone)]
pub struct FramedRelay<C: ChannelControl> {
    // Dropped before `channel` so the subscription can still reach its core.
    state: SharedState,
    channel: C,
}

impl<C: ChannelControl> fmt::Debug for FramedRelay<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("FramedRelay")
            .field("phase", &state.phase)
            .field("queued", &state.outbound.len())
            .field("backlog", &state.inbound.len())
            .finish()
    }
}

impl<C: ChannelControl> FramedRelay<C> {
    /// Subscribe to `channel` right away so that no payload is missed
    /// between the handshake and [`connect`](Self::connect).
    pub fn new(channel: C) -> Result<Self> {
        let state: SharedState = Arc::new(Mutex::new(RelayState {
            phase: RelayPhase::Pending,
            outbound: VecDeque::new(),
            inbound: VecDeque::new(),
            on_message: None,
            on_close: None,
            subscription: None,
        }));

        let weak: Weak<Mutex<RelayState>> = Arc::downgrade(&state);
        let subscription = channel.on_message(Arc::new(move |msg: &InboundMessage| {
            if let Some(state) = weak.upgrade() {
                receive(&state, msg);
            }
        }))?;
        lock(&state).subscription = Some(subscription);

        Ok(Self { state, channel })
    }

    /// Register the single payload callback, replacing any previous one.
    pub fn set_on_message(&self, handler: PayloadHandler) {
        lock(&self.state).on_message = Some(handler);
        drain_inbound(&self.state);
    }

    /// Register the close callback. It runs at most once.
    pub fn set_on_close(&self, handler: impl FnOnce() + Send + 'static) {
        let mut state = lock(&self.state);
        if state.phase != RelayPhase::Closed {
            state.on_close = Some(Box::new(handler));
        }
    }

    /// Send a payload, queueing it until the relay is connected.
    pub fn send(&self, payload: Value) -> Result<()> {
        {
            let mut state = lock(&self.state);
            match state.phase {
                RelayPhase::Closed => return Err(BridgeError::Closed),
                RelayPhase::Pending | RelayPhase::Flushing => {
                    if state.outbound.len() >= MAX_QUEUED_PAYLOADS {
                        return Err(BridgeError::QueueFull(MAX_QUEUED_PAYLOADS));
                    }
                    state.outbound.push_back(payload);
                    trace!(queued = state.outbound.len(), "payload queued until connected");
                    return Ok(());
                }
                RelayPhase::Connected => {}
            }
        }
        self.post(payload)
    }

    /// Send a payload without queueing.
    ///
    /// Fails with [`BridgeError::TransportNotReady`] before the relay is connected.
    pub fn send_now(&self, payload: Value) -> Result<()> {
        match lock(&self.state).phase {
            RelayPhase::Closed => return Err(BridgeError::Closed),
            RelayPhase::Pending | RelayPhase::Flushing => {
                return Err(BridgeError::TransportNotReady)
            }
            RelayPhase::Connected => {}
        }
        self.post(payload)
    }

    /// Mark the session connected: flush queued payloads, then deliver any
    /// inbound backlog.
    ///
    /// If a post fails mid-flush, the unsent payload goes back to the front of
    /// the queue and the relay returns to pending.
    pub fn connect(&self) -> Result<()> {
        {
            let mut state = lock(&self.state);
            match state.phase {
                RelayPhase::Closed => return Err(BridgeError::Closed),
                RelayPhase::Connected => return Ok(()),
                RelayPhase::Pending | RelayPhase::Flushing => state.phase = RelayPhase::Flushing,
            }
        }

        let mut flushed = 0usize;
        loop {
            let next = {
                let mut state = lock(&self.state);
                if state.phase == RelayPhase::Closed {
                    return Err(BridgeError::Closed);
                }
                match state.outbound.pop_front() {
                    Some(payload) => payload,
                    None => {
                        state.phase = RelayPhase::Connected;
                        break;
                    }
                }
            };
            if let Err(err) = self.post(next.clone()) {
                let mut state = lock(&self.state);
                if state.phase == RelayPhase::Flushing {
                    state.outbound.push_front(next);
                    state.phase = RelayPhase::Pending;
                }
                return Err(err);
            }
            flushed += 1;
        }

        info!(flushed, "relay connected");
        drain_inbound(&self.state);
        Ok(())
    }

    /// Close the relay and destroy its channel. Safe to call repeatedly.
    pub fn close(&self) {
        let (subscription, on_close) = {
            let mut state = lock(&self.state);
            if state.phase == RelayPhase::Closed {
                return;
            }
            state.phase = RelayPhase::Closed;
            state.outbound.clear();
            state.inbound.clear();
            state.on_message = None;
            (state.subscription.take(), state.on_close.take())
        };
        drop(subscription);
        self.channel.destroy();
        debug!("relay closed");
        if let Some(on_close) = on_close {
            on_close();
        }
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).phase == RelayPhase::Connected
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).phase == RelayPhase::Closed
    }

    /// Number of outbound payloads waiting for connect.
    pub fn queued(&self) -> usize {
        lock(&self.state).outbound.len()
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Remove and return unsent outbound payloads. Empty once connected.
    pub(crate) fn take_queued(&self) -> Vec<Value> {
        lock(&self.state).outbound.drain(..).collect()
    }

    /// Put payloads back in front of anything already queued.
    fn requeue(&self, payloads: Vec<Value>) -> Result<()> {
        let mut state = lock(&self.state);
        match state.phase {
            RelayPhase::Closed => Err(BridgeError::Closed),
            RelayPhase::Connected => Err(BridgeError::InvalidConfig(
                "requeue after connect".to_string(),
            )),
            RelayPhase::Pending | RelayPhase::Flushing => {
                for payload in payloads.into_iter().rev() {
                    state.outbound.push_front(payload);
                }
                Ok(())
            }
        }
    }

    fn post(&self, payload: Value) -> Result<()> {
        let target = self
            .channel
            .pinned_origin()
            .ok_or(BridgeError::OriginNotPinned)?;
        self.channel
            .post_message(&Envelope::message(payload), Some(&target))
    }
}

/// Handlers and payloads registered on a facade before its relay exists.
#[derive(Default)]
pub(crate) struct RelayHooks {
    backlog: Vec<Value>,
    on_message: Option<PayloadHandler>,
    on_close: Option<CloseHandler>,
    closed: bool,
}

impl RelayHooks {
    /// Hand the payload handler and any early payloads to a new relay.
    pub(crate) fn attach<C: ChannelControl>(&mut self, relay: &FramedRelay<C>) -> Result<()> {
        relay.requeue(std::mem::take(&mut self.backlog))?;
        if let Some(handler) = &self.on_message {
            relay.set_on_message(Arc::clone(handler));
        }
        Ok(())
    }

    /// Close a relay whose session never connected, keeping its unsent
    /// payloads for the next relay.
    pub(crate) fn detach<C: ChannelControl>(&mut self, relay: &FramedRelay<C>) {
        let mut queued = relay.take_queued();
        if !queued.is_empty() {
            debug!(kept = queued.len(), "keeping unsent payloads for the next attempt");
            queued.append(&mut self.backlog);
            self.backlog = queued;
        }
        relay.close();
    }

    pub(crate) fn send<C: ChannelControl>(
        &mut self,
        relay: Option<&FramedRelay<C>>,
        payload: Value,
    ) -> Result<()> {
        if self.closed {
            return Err(BridgeError::Closed);
        }
        match relay {
            Some(relay) => relay.send(payload),
            None => {
                if self.backlog.len() >= MAX_QUEUED_PAYLOADS {
                    return Err(BridgeError::QueueFull(MAX_QUEUED_PAYLOADS));
                }
                self.backlog.push(payload);
                Ok(())
            }
        }
    }

    pub(crate) fn send_now<C: ChannelControl>(
        &self,
        relay: Option<&FramedRelay<C>>,
        payload: Value,
    ) -> Result<()> {
        if self.closed {
            return Err(BridgeError::Closed);
        }
        relay
            .ok_or(BridgeError::TransportNotReady)?
            .send_now(payload)
    }

    pub(crate) fn set_on_message<C: ChannelControl>(
        &mut self,
        relay: Option<&FramedRelay<C>>,
        handler: PayloadHandler,
    ) {
        if let Some(relay) = relay {
            relay.set_on_message(Arc::clone(&handler));
        }
        self.on_message = Some(handler);
    }

    pub(crate) fn set_on_close(&mut self, handler: impl FnOnce() + Send + 'static) {
        if !self.closed {
            self.on_close = Some(Box::new(handler));
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Mark closed and run the close handler. Returns `false` when already closed.
    pub(crate) fn close(&mut self) -> bool {
        if std::mem::replace(&mut self.closed, true) {
            return false;
        }
        self.backlog.clear();
        self.on_message = None;
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
        true
    }
}

fn receive(state: &SharedState, msg: &InboundMessage) {
    if classify(&msg.data) != Some(MessageFamily::Payload) {
        return;
    }
    let payload = match decode_envelope(&msg.data) {
        Ok(Envelope::Message(message)) => message.payload,
        Ok(_) => return,
        Err(err) => {
            debug!(origin = %msg.origin, "dropping malformed payload: {err}");
            return;
        }
    };

    {
        let mut guard = lock(state);
        if guard.phase == RelayPhase::Closed {
            return;
        }
        if guard.inbound.len() >= MAX_QUEUED_PAYLOADS {
            warn!(held = guard.inbound.len(), "inbound backlog full, dropping payload");
            return;
        }
        guard.inbound.push_back(payload);
    }
    drain_inbound(state);
}

/// Deliver held inbound payloads one at a time, outside the lock.
fn drain_inbound(state: &SharedState) {
    loop {
        let (handler, payload) = {
            let mut guard = lock(state);
            if guard.phase != RelayPhase::Connected {
                return;
            }
            let Some(handler) = guard.on_message.clone() else {
                return;
            };
            let Some(payload) = guard.inbound.pop_front() else {
                return;
            };
            (handler, payload)
        };
        handler(payload);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use framebridge_frame::{TransportHandshake, PROTOCOL_VERSION_1_0};
    use framebridge_transport::{MemoryBus, MessageBus, WindowHost, WindowId};
    use serde_json::json;

    use super::*;
    use crate::channel::{ChannelConfig, InnerChannel, OuterChannel};

    struct Pair {
        bus: Arc<MemoryBus>,
        host: WindowId,
        frame: WindowId,
        outer: FramedRelay<OuterChannel>,
        inner: FramedRelay<InnerChannel>,
    }

    /// Two relays over a pair of channels whose origins are already pinned
    /// on the outer side.
    async fn pair() -> Pair {
        let bus = Arc::new(MemoryBus::new());
        let host = bus.open_window("https://host.example/chat").unwrap();
        let frame = bus.open_frame();
        bus.navigate(frame, "https://tool.example/pi")
            .unwrap()
            .wait()
            .await
            .unwrap();

        let outer_channel =
            OuterChannel::new(bus.clone(), host, frame, &ChannelConfig::permissive()).unwrap();
        let inner_channel =
            InnerChannel::new(bus.clone(), frame, host, &ChannelConfig::permissive()).unwrap();
        let outer = FramedRelay::new(outer_channel).unwrap();
        let inner = FramedRelay::new(inner_channel.clone()).unwrap();

        inner_channel
            .post_message(
                &Envelope::TransportHandshake(TransportHandshake {
                    protocol_version: PROTOCOL_VERSION_1_0.to_string(),
                }),
                None,
            )
            .unwrap();
        assert_eq!(
            outer.channel().pinned_origin().as_deref(),
            Some("https://tool.example")
        );

        Pair {
            bus,
            host,
            frame,
            outer,
            inner,
        }
    }

    fn collect(relay: &FramedRelay<impl ChannelControl>) -> Arc<Mutex<Vec<Value>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        relay.set_on_message(Arc::new(move |payload| sink.lock().unwrap().push(payload)));
        seen
    }

    #[tokio::test]
    async fn queued_payloads_flush_in_order() {
        let p = pair().await;
        let received = collect(&p.inner);
        p.inner.connect().unwrap();

        p.outer.send(json!({"id": 1})).unwrap();
        p.outer.send(json!({"id": 2})).unwrap();
        assert_eq!(p.outer.queued(), 2);
        assert!(received.lock().unwrap().is_empty());

        p.outer.connect().unwrap();
        p.outer.send(json!({"id": 3})).unwrap();

        assert_eq!(p.outer.queued(), 0);
        assert_eq!(
            received.lock().unwrap().as_slice(),
            &[json!({"id": 1}), json!({"id": 2}), json!({"id": 3})]
        );
    }

    #[tokio::test]
    async fn send_now_requires_connection() {
        let p = pair().await;
        assert!(matches!(
            p.outer.send_now(json!(1)),
            Err(BridgeError::TransportNotReady)
        ));
        p.outer.connect().unwrap();
        p.outer.send_now(json!(1)).unwrap();
    }

    #[tokio::test]
    async fn inbound_held_until_connected_and_handled() {
        let p = pair().await;
        p.outer.connect().unwrap();
        p.outer.send(json!("early")).unwrap();

        p.inner.connect().unwrap();
        let received = collect(&p.inner);
        assert_eq!(received.lock().unwrap().as_slice(), &[json!("early")]);

        // The inner side learned the host origin from that payload.
        let outer_seen = collect(&p.outer);
        p.inner.send(json!("reply")).unwrap();
        assert_eq!(outer_seen.lock().unwrap().as_slice(), &[json!("reply")]);
    }

    #[tokio::test]
    async fn non_payload_traffic_is_ignored() {
        let p = pair().await;
        let received = collect(&p.outer);
        p.outer.connect().unwrap();

        for noise in [
            json!({"type": "TRANSPORT_ACCEPTED", "sessionId": "s1"}),
            json!({"type": "MESSAGE"}),
            json!({"jsonrpc": "2.0", "method": "ping"}),
        ] {
            p.bus.post_message(p.frame, p.host, noise, "*").unwrap();
        }
        p.bus
            .post_message(
                p.frame,
                p.host,
                json!({"type": "MESSAGE", "payload": {"jsonrpc": "2.0", "id": 1}}),
                "*",
            )
            .unwrap();

        assert_eq!(
            received.lock().unwrap().as_slice(),
            &[json!({"jsonrpc": "2.0", "id": 1})]
        );
    }

    #[tokio::test]
    async fn close_is_idempotent_and_fires_once() {
        let p = pair().await;
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closes);
        p.outer.set_on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        p.outer.send(json!("dropped")).unwrap();

        p.outer.close();
        p.outer.close();

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(p.outer.is_closed());
        assert!(p.outer.channel().is_destroyed());
        assert_eq!(p.bus.listener_count(p.host), 0);
        assert!(matches!(p.outer.send(json!(1)), Err(BridgeError::Closed)));
        assert!(matches!(p.outer.connect(), Err(BridgeError::Closed)));
    }

    #[tokio::test]
    async fn failed_flush_keeps_payloads_queued() {
        let bus = Arc::new(MemoryBus::new());
        let host = bus.open_window("https://host.example/chat").unwrap();
        let frame = bus.open_frame();
        bus.navigate(frame, "https://tool.example/pi")
            .unwrap()
            .wait()
            .await
            .unwrap();
        let outer = FramedRelay::new(
            OuterChannel::new(bus.clone(), host, frame, &ChannelConfig::permissive()).unwrap(),
        )
        .unwrap();
        let inner_channel =
            InnerChannel::new(bus.clone(), frame, host, &ChannelConfig::permissive()).unwrap();
        let inner = FramedRelay::new(inner_channel.clone()).unwrap();
        let received = collect(&inner);
        inner.connect().unwrap();

        outer.send(json!({"id": 1})).unwrap();
        outer.send(json!({"id": 2})).unwrap();

        // Nothing has pinned the tool origin yet, so the first post fails.
        assert!(matches!(outer.connect(), Err(BridgeError::OriginNotPinned)));
        assert!(!outer.is_connected());
        assert_eq!(outer.queued(), 2);
        assert!(matches!(
            outer.send_now(json!(0)),
            Err(BridgeError::TransportNotReady)
        ));

        inner_channel
            .post_message(
                &Envelope::TransportHandshake(TransportHandshake {
                    protocol_version: PROTOCOL_VERSION_1_0.to_string(),
                }),
                None,
            )
            .unwrap();
        outer.connect().unwrap();

        assert!(outer.is_connected());
        assert_eq!(
            received.lock().unwrap().as_slice(),
            &[json!({"id": 1}), json!({"id": 2})]
        );
    }

    #[tokio::test]
    async fn pending_queues_are_bounded() {
        let p = pair().await;
        for id in 0..MAX_QUEUED_PAYLOADS {
            p.outer.send(json!({ "id": id })).unwrap();
        }
        assert!(matches!(
            p.outer.send(json!("one too many")),
            Err(BridgeError::QueueFull(MAX_QUEUED_PAYLOADS))
        ));

        // The inner side has neither connected nor registered a handler.
        p.outer.connect().unwrap();
        p.outer.send(json!("overflow")).unwrap();
        p.inner.connect().unwrap();
        let received = collect(&p.inner);

        let received = received.lock().unwrap();
        assert_eq!(received.len(), MAX_QUEUED_PAYLOADS);
        assert_eq!(received[0], json!({"id": 0}));
        assert!(!received.contains(&json!("overflow")));
    }

    #[tokio::test]
    async fn hooks_carry_unsent_payloads_across_relays() {
        let p = pair().await;
        let relay = || {
            let channel =
                OuterChannel::new(p.bus.clone(), p.host, p.frame, &ChannelConfig::permissive())
                    .unwrap();
            FramedRelay::new(channel).unwrap()
        };
        let mut hooks = RelayHooks::default();
        hooks.send(None::<&FramedRelay<OuterChannel>>, json!(1)).unwrap();

        let first = relay();
        hooks.attach(&first).unwrap();
        hooks.send(Some(&first), json!(2)).unwrap();
        hooks.detach(&first);
        assert!(first.is_closed());
        hooks.send(None::<&FramedRelay<OuterChannel>>, json!(3)).unwrap();

        let second = relay();
        hooks.attach(&second).unwrap();
        assert_eq!(second.take_queued(), vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn dropping_relay_releases_listener() {
        let p = pair().await;
        assert_eq!(p.bus.listener_count(p.frame), 1);
        drop(p.inner);
        assert_eq!(p.bus.listener_count(p.frame), 0);
    }
}
