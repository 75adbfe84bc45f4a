//! Origin-pinned channel between an outer and an inner window.
//!
//! This is the "just works" layer. The outer context navigates a
//! subordinate window, runs the setup handshake (version and permission
//! negotiation), navigates again for the transport handshake, and from then
//! on exchanges framed JSON-RPC payloads with the inner context.

pub mod channel;
pub mod deadline;
pub mod error;
pub mod handshake;
pub mod inbox;
pub mod inner;
pub mod origin;
pub mod outer;
pub mod permission;
pub mod relay;
pub mod session;
pub mod setup;

pub use channel::{
    ChannelConfig, ChannelControl, InboundMessage, InnerChannel, MessageHandler, OuterChannel,
    Subscription, DEFAULT_NAVIGATION_TIMEOUT,
};
pub use deadline::Deadline;
pub use error::{BridgeError, Result};
pub use handshake::{
    HandshakeResult, InnerHandshake, OuterHandshake, TransportConfig, TransportState,
};
pub use inbox::Inbox;
pub use inner::{InnerBridge, InnerBridgeConfig};
pub use origin::{Admission, OriginGuard, OriginPolicy};
pub use outer::{OuterBridge, OuterBridgeConfig};
pub use permission::{
    resolve_permissions, PermissionApprover, PermissionDecision, SafeListApprover,
    DEFAULT_SAFE_PERMISSIONS,
};
pub use relay::{FramedRelay, PayloadHandler, MAX_QUEUED_PAYLOADS};
pub use session::{Session, SessionPhase};
pub use setup::{
    perform_setup, OuterSetup, SetupConfig, SetupRequest, SetupResult, SetupSession, SetupState,
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_SETUP_TIMEOUT,
};
