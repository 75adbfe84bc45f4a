use std::sync::Arc;

use framebridge_frame::{classify, decode_envelope, Envelope, FrameError, MessageFamily};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::channel::{ChannelControl, InboundMessage, Subscription};
use crate::deadline::Deadline;
use crate::error::{BridgeError, Result};

/// Queue of accepted messages for a handshake in progress.
///
/// Subscribe before triggering the counterpart (navigation or first send)
/// so that no reply can slip past. Dropping the inbox unsubscribes.
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<InboundMessage>,
    _subscription: Subscription,
}

impl Inbox {
    /// Subscribe to `channel`.
    pub fn subscribe<C: ChannelControl + ?Sized>(channel: &C) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = channel.on_message(Arc::new(move |msg: &InboundMessage| {
            let _ = tx.send(msg.clone());
        }))?;
        Ok(Self {
            rx,
            _subscription: subscription,
        })
    }

    /// Wait for the next well-formed envelope of `family`.
    ///
    /// Foreign traffic, envelopes of other families and envelopes that fail
    /// to decode are skipped.
    pub async fn next_envelope(
        &mut self,
        family: MessageFamily,
        deadline: &Deadline,
    ) -> Result<Envelope> {
        deadline
            .run(async {
                loop {
                    let msg = self.rx.recv().await.ok_or(BridgeError::Closed)?;
                    match classify(&msg.data) {
                        Some(found) if found == family => {}
                        Some(other) => {
                            trace!(?other, expected = ?family, "skipping envelope of other family");
                            continue;
                        }
                        None => {
                            trace!(origin = %msg.origin, "skipping foreign message");
                            continue;
                        }
                    }
                    match decode_envelope(&msg.data) {
                        Ok(envelope) => return Ok(envelope),
                        Err(FrameError::NotAnEnvelope) => continue,
                        Err(err) => {
                            debug!(origin = %msg.origin, "skipping malformed envelope: {err}");
                            continue;
                        }
                    }
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use framebridge_transport::{MemoryBus, MessageBus, WindowHost};
    use serde_json::json;

    use super::*;
    use crate::channel::{ChannelConfig, OuterChannel};

    #[tokio::test(start_paused = true)]
    async fn skips_noise_and_returns_family_match() {
        let bus = Arc::new(MemoryBus::new());
        let host = bus.open_window("https://host.example").unwrap();
        let frame = bus.open_frame();
        bus.navigate(frame, "https://tool.example/").unwrap().wait().await.unwrap();

        let channel =
            OuterChannel::new(bus.clone(), host, frame, &ChannelConfig::permissive()).unwrap();
        let mut inbox = Inbox::subscribe(&channel).unwrap();

        for noise in [
            json!({"type": "webpackOk"}),
            json!({"type": "MESSAGE", "payload": 1}),
            json!({"type": "TRANSPORT_HANDSHAKE", "protocolVersion": "not-a-version"}),
        ] {
            bus.post_message(frame, host, noise, "*").unwrap();
        }
        bus.post_message(
            frame,
            host,
            json!({"type": "TRANSPORT_HANDSHAKE", "protocolVersion": "1.0"}),
            "*",
        )
        .unwrap();

        let deadline = Deadline::after(Duration::from_secs(1));
        let envelope = inbox
            .next_envelope(MessageFamily::Transport, &deadline)
            .await
            .unwrap();
        assert!(matches!(envelope, Envelope::TransportHandshake(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_and_unsubscribes_on_drop() {
        let bus = Arc::new(MemoryBus::new());
        let host = bus.open_window("https://host.example").unwrap();
        let frame = bus.open_frame();
        let channel =
            OuterChannel::new(bus.clone(), host, frame, &ChannelConfig::permissive()).unwrap();

        let mut inbox = Inbox::subscribe(&channel).unwrap();
        assert_eq!(bus.listener_count(host), 1);

        let deadline = Deadline::after(Duration::from_millis(500));
        let result = inbox.next_envelope(MessageFamily::Setup, &deadline).await;
        assert!(matches!(result, Err(BridgeError::HandshakeTimeout(_))));

        drop(inbox);
        assert_eq!(bus.listener_count(host), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn destroyed_channel_closes_inbox() {
        let bus = Arc::new(MemoryBus::new());
        let host = bus.open_window("https://host.example").unwrap();
        let frame = bus.open_frame();
        let channel =
            OuterChannel::new(bus.clone(), host, frame, &ChannelConfig::permissive()).unwrap();
        let mut inbox = Inbox::subscribe(&channel).unwrap();
        channel.destroy();

        let deadline = Deadline::after(Duration::from_secs(1));
        assert!(matches!(
            inbox.next_envelope(MessageFamily::Setup, &deadline).await,
            Err(BridgeError::Closed)
        ));
    }
}
