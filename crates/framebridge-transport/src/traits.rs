use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{Result, TransportError};

/// Target origin that matches any receiving document.
pub const WILDCARD_ORIGIN: &str = "*";

/// Identity of a browsing context (top-level window, iframe or popup).
///
/// This is what a browser exposes as `event.source`: it cannot be forged by
/// the sender, so it is the first thing a receiver checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(u64);

impl WindowId {
    /// Wrap a raw window identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw identifier value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window-{}", self.0)
    }
}

/// A delivered `message` event.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    /// Window that posted the message.
    pub source: WindowId,
    /// Origin of the document that posted the message, as observed by the bus.
    pub origin: String,
    /// Structured-clone of the posted value.
    pub data: Value,
}

/// Handle for a registered low-level listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Wrap a raw listener identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Callback invoked for every `message` event delivered to a window.
pub type MessageListener = Arc<dyn Fn(&MessageEvent) + Send + Sync>;

/// The shared, untrusted message bus.
///
/// Every window on the bus can post to every other window it holds a
/// reference to. Receivers see all traffic addressed to them, including
/// traffic unrelated to any protocol they speak.
pub trait MessageBus: Send + Sync {
    /// Post `data` from `source` to `target`.
    ///
    /// Mirrors `window.postMessage(data, targetOrigin)`: when `target_origin`
    /// is not `*` and does not equal the target's current origin the message
    /// is silently discarded and `Ok(())` is still returned.
    fn post_message(
        &self,
        source: WindowId,
        target: WindowId,
        data: Value,
        target_origin: &str,
    ) -> Result<()>;

    /// Register a `message` listener on `window`.
    fn add_listener(&self, window: WindowId, listener: MessageListener) -> Result<ListenerId>;

    /// Remove a listener. Returns `false` if it was not registered.
    fn remove_listener(&self, window: WindowId, id: ListenerId) -> bool;
}

/// Window management available to the context that owns a subordinate window.
pub trait WindowHost: Send + Sync {
    /// Start loading `url` in `window`.
    ///
    /// The returned [`Navigation`] settles once the document has loaded or
    /// failed to load. Timeouts are the caller's concern.
    fn navigate(&self, window: WindowId, url: &str) -> Result<Navigation>;

    /// Show or hide `window` without affecting its message channel.
    fn set_visible(&self, window: WindowId, visible: bool) -> Result<()>;

    /// Replace the capability allow-list (sandbox / permission policy) of `window`.
    fn set_capabilities(&self, window: WindowId, capabilities: &[String]) -> Result<()>;
}

/// Load signal for an in-flight navigation.
#[derive(Debug)]
pub struct Navigation {
    url: String,
    loaded: oneshot::Receiver<std::result::Result<(), String>>,
}

impl Navigation {
    /// Create a pending navigation and the sender that settles it.
    pub fn pending(
        url: impl Into<String>,
    ) -> (oneshot::Sender<std::result::Result<(), String>>, Self) {
        let (tx, rx) = oneshot::channel();
        (
            tx,
            Self {
                url: url.into(),
                loaded: rx,
            },
        )
    }

    /// URL being loaded.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Wait for the load to settle.
    ///
    /// A dropped sender counts as a failed load.
    pub async fn wait(self) -> Result<()> {
        match self.loaded.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(TransportError::NavigationFailed {
                url: self.url,
                reason,
            }),
            Err(_) => Err(TransportError::NavigationFailed {
                url: self.url,
                reason: "navigation abandoned".to_string(),
            }),
        }
    }
}
