//! Runtime guards for values arriving from the shared bus.
//!
//! Guards look at an arbitrary JSON value and decide whether it belongs to
//! one of our sub-protocols. They never panic and never allocate errors:
//! foreign traffic is simply `None`.

use serde_json::Value;

use crate::envelope::{
    MESSAGE, SETUP_COMPLETE, SETUP_HANDSHAKE, SETUP_HANDSHAKE_REPLY, TRANSPORT_ACCEPTED,
    TRANSPORT_HANDSHAKE, TRANSPORT_HANDSHAKE_REPLY,
};

/// Sub-protocol an envelope belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageFamily {
    Setup,
    Transport,
    Payload,
}

/// The `type` discriminator of `value`, if it is an object with a string `type`.
pub fn message_type(value: &Value) -> Option<&str> {
    value.as_object()?.get("type")?.as_str()
}

/// Classify `value` by discriminator and version-tagged fields.
///
/// Handshake envelopes must carry their protocol version fields as strings;
/// the payload carrier must carry a `payload` key.
pub fn classify(value: &Value) -> Option<MessageFamily> {
    let object = value.as_object()?;
    let has_string = |field: &str| object.get(field).is_some_and(Value::is_string);

    match object.get("type")?.as_str()? {
        SETUP_HANDSHAKE => (has_string("minProtocolVersion") && has_string("maxProtocolVersion"))
            .then_some(MessageFamily::Setup),
        SETUP_HANDSHAKE_REPLY => (has_string("protocolVersion") && has_string("sessionId"))
            .then_some(MessageFamily::Setup),
        SETUP_COMPLETE => has_string("status").then_some(MessageFamily::Setup),
        TRANSPORT_HANDSHAKE => has_string("protocolVersion").then_some(MessageFamily::Transport),
        TRANSPORT_HANDSHAKE_REPLY => (has_string("protocolVersion") && has_string("sessionId"))
            .then_some(MessageFamily::Transport),
        TRANSPORT_ACCEPTED => has_string("sessionId").then_some(MessageFamily::Transport),
        MESSAGE => object
            .contains_key("payload")
            .then_some(MessageFamily::Payload),
        _ => None,
    }
}

/// Whether `value` is a setup-phase envelope.
pub fn is_setup_message(value: &Value) -> bool {
    classify(value) == Some(MessageFamily::Setup)
}

/// Whether `value` is a transport-phase envelope.
pub fn is_transport_message(value: &Value) -> bool {
    classify(value) == Some(MessageFamily::Transport)
}

/// Whether `value` is a payload carrier.
pub fn is_payload_message(value: &Value) -> bool {
    classify(value) == Some(MessageFamily::Payload)
}
