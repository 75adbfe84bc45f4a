//! Origin-pinned, versioned message channel between two browsing contexts.
//!
//! An outer context (a host page owning a window handle) navigates an inner
//! context, negotiates protocol version and permissions during a setup
//! phase, then reconnects for a transport phase that carries framed JSON-RPC
//! payloads under the same session id.
//!
//! # Crate Structure
//!
//! - [`transport`]: Message bus and window host abstraction, URL helpers, in-memory bus
//! - [`frame`]: Envelope types, guards, codec, version negotiation, phase marker
//! - [`peer`]: Channel control, handshakes, relay and facades (behind `peer` feature)
//! - [`loopback`]: In-process echo tool for demos and tests (behind `loopback` feature)

/// Re-export transport types.
pub mod transport {
    pub use framebridge_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use framebridge_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use framebridge_peer::*;
}

#[cfg(feature = "loopback")]
pub mod loopback;
