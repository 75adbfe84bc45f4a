use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::traits::{
    ListenerId, MessageBus, MessageEvent, MessageListener, Navigation, WindowHost, WindowId,
    WILDCARD_ORIGIN,
};
use crate::url::{origin_of, strip_fragment};

/// Origin reported by a window that has not loaded a document yet.
pub const OPAQUE_ORIGIN: &str = "null";

/// What happens when a window is navigated to a given URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationRule {
    /// The document loads immediately.
    Load,
    /// The load fails with the given reason.
    Fail(String),
    /// The load never settles.
    Stall,
}

type NavigationObserver = Arc<dyn Fn(WindowId, &str) + Send + Sync>;

/// In-process message bus with browser delivery semantics.
///
/// - `event.origin` is the origin of the document currently loaded in the
///   sending window (`"null"` before the first navigation).
/// - A non-wildcard `target_origin` that does not match the receiving
///   window's origin silently discards the message.
/// - Listeners are invoked synchronously, in registration order, outside of
///   the bus lock, so a listener may post or (un)register listeners.
pub struct MemoryBus {
    state: Mutex<BusState>,
    next_listener: AtomicU64,
}

#[derive(Default)]
struct BusState {
    next_window: u64,
    windows: HashMap<WindowId, WindowState>,
    rules: HashMap<String, NavigationRule>,
    stalled: Vec<oneshot::Sender<std::result::Result<(), String>>>,
    observer: Option<NavigationObserver>,
}

struct WindowState {
    origin: String,
    url: Option<String>,
    history: Vec<String>,
    visible: bool,
    capabilities: Vec<String>,
    listeners: Vec<(ListenerId, MessageListener)>,
    closed: bool,
}

impl WindowState {
    fn new(origin: String, url: Option<String>) -> Self {
        Self {
            origin,
            url,
            history: Vec::new(),
            visible: false,
            capabilities: Vec::new(),
            listeners: Vec::new(),
            closed: false,
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Open a top-level window that already shows a document at `url`.
    pub fn open_window(&self, url: &str) -> Result<WindowId> {
        let origin = origin_of(url)?;
        let mut state = self.lock();
        let id = state.allocate_window();
        let mut window = WindowState::new(origin, Some(url.to_string()));
        window.visible = true;
        state.windows.insert(id, window);
        debug!(window = %id, url, "opened window");
        Ok(id)
    }

    /// Open a blank subordinate window (iframe or popup) with an opaque origin.
    pub fn open_frame(&self) -> WindowId {
        let mut state = self.lock();
        let id = state.allocate_window();
        state
            .windows
            .insert(id, WindowState::new(OPAQUE_ORIGIN.to_string(), None));
        debug!(window = %id, "opened frame");
        id
    }

    /// Close a window. Later posts to or from it fail with `WindowClosed`.
    pub fn close_window(&self, window: WindowId) -> Result<()> {
        let mut state = self.lock();
        let entry = state.window_mut(window)?;
        entry.closed = true;
        entry.listeners.clear();
        Ok(())
    }

    /// Configure how navigations to `url` (fragment ignored) behave.
    pub fn set_navigation_rule(&self, url: &str, rule: NavigationRule) {
        self.lock()
            .rules
            .insert(strip_fragment(url).to_string(), rule);
    }

    /// Register a callback invoked after every navigation has been committed.
    ///
    /// Used to boot the document that lives inside a navigated window.
    pub fn set_navigation_observer(
        &self,
        observer: impl Fn(WindowId, &str) + Send + Sync + 'static,
    ) {
        self.lock().observer = Some(Arc::new(observer));
    }

    /// Force the origin a window reports, e.g. after a cross-origin redirect.
    pub fn set_origin(&self, window: WindowId, origin: &str) -> Result<()> {
        self.lock().window_mut(window)?.origin = origin.to_string();
        Ok(())
    }

    /// Origin currently reported by `window`.
    pub fn origin(&self, window: WindowId) -> Option<String> {
        self.lock().windows.get(&window).map(|w| w.origin.clone())
    }

    /// URL currently loaded in `window`.
    pub fn current_url(&self, window: WindowId) -> Option<String> {
        self.lock().windows.get(&window).and_then(|w| w.url.clone())
    }

    /// Every URL `window` has been navigated to, oldest first.
    pub fn navigation_history(&self, window: WindowId) -> Vec<String> {
        self.lock()
            .windows
            .get(&window)
            .map(|w| w.history.clone())
            .unwrap_or_default()
    }

    /// Whether `window` is currently shown.
    pub fn is_visible(&self, window: WindowId) -> bool {
        self.lock().windows.get(&window).is_some_and(|w| w.visible)
    }

    /// Capability allow-list currently applied to `window`.
    pub fn capabilities(&self, window: WindowId) -> Vec<String> {
        self.lock()
            .windows
            .get(&window)
            .map(|w| w.capabilities.clone())
            .unwrap_or_default()
    }

    /// Number of low-level listeners registered on `window`.
    pub fn listener_count(&self, window: WindowId) -> usize {
        self.lock()
            .windows
            .get(&window)
            .map_or(0, |w| w.listeners.len())
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BusState {
    fn allocate_window(&mut self) -> WindowId {
        self.next_window += 1;
        WindowId::new(self.next_window)
    }

    fn window(&self, id: WindowId) -> Result<&WindowState> {
        let window = self
            .windows
            .get(&id)
            .ok_or(TransportError::UnknownWindow(id))?;
        if window.closed {
            return Err(TransportError::WindowClosed(id));
        }
        Ok(window)
    }

    fn window_mut(&mut self, id: WindowId) -> Result<&mut WindowState> {
        let window = self
            .windows
            .get_mut(&id)
            .ok_or(TransportError::UnknownWindow(id))?;
        if window.closed {
            return Err(TransportError::WindowClosed(id));
        }
        Ok(window)
    }
}

impl MessageBus for MemoryBus {
    fn post_message(
        &self,
        source: WindowId,
        target: WindowId,
        data: Value,
        target_origin: &str,
    ) -> Result<()> {
        if target_origin.is_empty() {
            return Err(TransportError::InvalidOrigin(target_origin.to_string()));
        }

        let (event, listeners) = {
            let state = self.lock();
            let origin = state.window(source)?.origin.clone();
            let receiver = state.window(target)?;

            if target_origin != WILDCARD_ORIGIN && target_origin != receiver.origin {
                trace!(
                    source = %source,
                    target = %target,
                    target_origin,
                    actual_origin = %receiver.origin,
                    "target origin mismatch, message discarded"
                );
                return Ok(());
            }

            let listeners: Vec<MessageListener> = receiver
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect();
            (
                MessageEvent {
                    source,
                    origin,
                    data,
                },
                listeners,
            )
        };

        for listener in listeners {
            listener(&event);
        }
        Ok(())
    }

    fn add_listener(&self, window: WindowId, listener: MessageListener) -> Result<ListenerId> {
        let id = ListenerId::new(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.lock().window_mut(window)?.listeners.push((id, listener));
        Ok(id)
    }

    fn remove_listener(&self, window: WindowId, id: ListenerId) -> bool {
        let mut state = self.lock();
        let Some(entry) = state.windows.get_mut(&window) else {
            return false;
        };
        let before = entry.listeners.len();
        entry.listeners.retain(|(existing, _)| *existing != id);
        entry.listeners.len() != before
    }
}

impl WindowHost for MemoryBus {
    fn navigate(&self, window: WindowId, url: &str) -> Result<Navigation> {
        let origin = origin_of(url)?;
        let (tx, navigation) = Navigation::pending(url);

        let observer = {
            let mut state = self.lock();
            let rule = state
                .rules
                .get(strip_fragment(url))
                .cloned()
                .unwrap_or(NavigationRule::Load);

            let entry = state.window_mut(window)?;
            match rule {
                NavigationRule::Load => {
                    entry.origin = origin;
                    entry.url = Some(url.to_string());
                    entry.history.push(url.to_string());
                    let _ = tx.send(Ok(()));
                }
                NavigationRule::Fail(reason) => {
                    entry.history.push(url.to_string());
                    let _ = tx.send(Err(reason));
                    return Ok(navigation);
                }
                NavigationRule::Stall => {
                    entry.history.push(url.to_string());
                    state.stalled.push(tx);
                    return Ok(navigation);
                }
            }
            state.observer.clone()
        };

        debug!(window = %window, url, "navigation committed");
        if let Some(observer) = observer {
            observer(window, url);
        }
        Ok(navigation)
    }

    fn set_visible(&self, window: WindowId, visible: bool) -> Result<()> {
        self.lock().window_mut(window)?.visible = visible;
        Ok(())
    }

    fn set_capabilities(&self, window: WindowId, capabilities: &[String]) -> Result<()> {
        self.lock().window_mut(window)?.capabilities = capabilities.to_vec();
        Ok(())
    }
}
