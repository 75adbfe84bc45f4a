//! Envelope wire types and classification for framebridge.
//!
//! Every message exchanged between the outer and inner context is a JSON
//! object carrying a `type` discriminator:
//! - setup family: `SETUP_HANDSHAKE`, `SETUP_HANDSHAKE_REPLY`, `SETUP_COMPLETE`
//! - transport family: `TRANSPORT_HANDSHAKE`, `TRANSPORT_HANDSHAKE_REPLY`, `TRANSPORT_ACCEPTED`
//! - payload carrier: `MESSAGE` wrapping an opaque JSON-RPC value
//!
//! The bus is shared with unrelated traffic, so classification never fails
//! loudly: anything that is not recognisably ours is reported as `None`.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod guards;
pub mod phase;
pub mod version;

pub use codec::{
    decode_envelope, encode_envelope, MAX_DISPLAY_NAME_LEN, MAX_PERMISSIONS, MAX_PERMISSION_NAME_LEN,
    MAX_SESSION_ID_LEN,
};
pub use envelope::{
    Envelope, PayloadMessage, PermissionPhase, PermissionRequirement, SetupComplete,
    SetupHandshake, SetupHandshakeReply, SetupStatus, TransportAccepted, TransportHandshake,
    TransportHandshakeReply, TransportVisibility, VisibilityRequirement,
};
pub use error::{FrameError, Result};
pub use guards::{
    classify, is_payload_message, is_setup_message, is_transport_message, message_type,
    MessageFamily,
};
pub use phase::{Phase, SETUP_MARKER};
pub use version::{
    is_supported, negotiate_version, ProtocolVersion, MAX_VERSION_LEN, PROTOCOL_VERSION_1_0,
    SUPPORTED_VERSIONS,
};
