//! Window message bus abstraction.
//!
//! Models the small part of a browser that a cross-window protocol touches:
//! - `postMessage` delivery with `event.source` / `event.origin`
//! - window-level `message` listeners
//! - navigation, visibility and the capability allow-list of a subordinate window
//!
//! This is the lowest layer of framebridge. Everything else builds on top of
//! the [`MessageBus`] and [`WindowHost`] traits provided here. [`MemoryBus`]
//! is a complete in-process implementation with browser delivery semantics.

pub mod error;
pub mod memory;
pub mod traits;
pub mod url;

pub use error::{Result, TransportError};
pub use memory::{MemoryBus, NavigationRule};
pub use traits::{
    ListenerId, MessageBus, MessageEvent, MessageListener, Navigation, WindowHost, WindowId,
    WILDCARD_ORIGIN,
};
pub use url::{origin_of, split_fragment, strip_fragment, with_fragment};
