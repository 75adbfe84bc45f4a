use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::guards::MessageFamily;

/// Wire discriminator: inner → outer, opens the setup phase.
pub const SETUP_HANDSHAKE: &str = "SETUP_HANDSHAKE";
/// Wire discriminator: outer → inner, answers the setup handshake.
pub const SETUP_HANDSHAKE_REPLY: &str = "SETUP_HANDSHAKE_REPLY";
/// Wire discriminator: inner → outer, ends the setup phase.
pub const SETUP_COMPLETE: &str = "SETUP_COMPLETE";
/// Wire discriminator: inner → outer, opens the transport phase.
pub const TRANSPORT_HANDSHAKE: &str = "TRANSPORT_HANDSHAKE";
/// Wire discriminator: outer → inner, echoes the setup session id.
pub const TRANSPORT_HANDSHAKE_REPLY: &str = "TRANSPORT_HANDSHAKE_REPLY";
/// Wire discriminator: inner → outer, confirms the session.
pub const TRANSPORT_ACCEPTED: &str = "TRANSPORT_ACCEPTED";
/// Wire discriminator: steady-state payload carrier.
pub const MESSAGE: &str = "MESSAGE";

/// A protocol envelope.
///
/// Closed set: anything else on the bus is foreign traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "SETUP_HANDSHAKE")]
    SetupHandshake(SetupHandshake),
    #[serde(rename = "SETUP_HANDSHAKE_REPLY")]
    SetupHandshakeReply(SetupHandshakeReply),
    #[serde(rename = "SETUP_COMPLETE")]
    SetupComplete(SetupComplete),
    #[serde(rename = "TRANSPORT_HANDSHAKE")]
    TransportHandshake(TransportHandshake),
    #[serde(rename = "TRANSPORT_HANDSHAKE_REPLY")]
    TransportHandshakeReply(TransportHandshakeReply),
    #[serde(rename = "TRANSPORT_ACCEPTED")]
    TransportAccepted(TransportAccepted),
    #[serde(rename = "MESSAGE")]
    Message(PayloadMessage),
}

impl Envelope {
    /// Wire discriminator of this envelope.
    pub fn message_type(&self) -> &'static str {
        match self {
            Envelope::SetupHandshake(_) => SETUP_HANDSHAKE,
            Envelope::SetupHandshakeReply(_) => SETUP_HANDSHAKE_REPLY,
            Envelope::SetupComplete(_) => SETUP_COMPLETE,
            Envelope::TransportHandshake(_) => TRANSPORT_HANDSHAKE,
            Envelope::TransportHandshakeReply(_) => TRANSPORT_HANDSHAKE_REPLY,
            Envelope::TransportAccepted(_) => TRANSPORT_ACCEPTED,
            Envelope::Message(_) => MESSAGE,
        }
    }

    /// Sub-protocol this envelope belongs to.
    pub fn family(&self) -> MessageFamily {
        match self {
            Envelope::SetupHandshake(_)
            | Envelope::SetupHandshakeReply(_)
            | Envelope::SetupComplete(_) => MessageFamily::Setup,
            Envelope::TransportHandshake(_)
            | Envelope::TransportHandshakeReply(_)
            | Envelope::TransportAccepted(_) => MessageFamily::Transport,
            Envelope::Message(_) => MessageFamily::Payload,
        }
    }

    /// Wrap an application payload.
    pub fn message(payload: Value) -> Self {
        Envelope::Message(PayloadMessage { payload })
    }
}

/// Phase in which a requested permission is exercised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionPhase {
    Setup,
    Transport,
}

/// A capability the inner context asks for during setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequirement {
    /// Capability name, e.g. `camera` or `clipboard-write`.
    pub name: String,
    /// Phases in which the capability is needed.
    pub phase: Vec<PermissionPhase>,
    /// Whether setup must fail when the capability is not granted.
    pub required: bool,
    /// Human-readable justification shown to the approver.
    pub purpose: String,
}

impl PermissionRequirement {
    /// Build a requirement that applies to both phases.
    pub fn new(name: impl Into<String>, required: bool, purpose: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: vec![PermissionPhase::Setup, PermissionPhase::Transport],
            required,
            purpose: purpose.into(),
        }
    }
}

/// Whether the transport-phase window needs to be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityRequirement {
    Required,
    Optional,
    Hidden,
}

/// Visibility policy reported by the inner context when setup completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportVisibility {
    pub requirement: VisibilityRequirement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TransportVisibility {
    /// Visibility without a description.
    pub fn new(requirement: VisibilityRequirement) -> Self {
        Self {
            requirement,
            description: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupHandshake {
    pub min_protocol_version: String,
    pub max_protocol_version: String,
    pub requires_visible_setup: bool,
    #[serde(default)]
    pub requested_permissions: Vec<PermissionRequirement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupHandshakeReply {
    pub protocol_version: String,
    pub session_id: String,
}

/// Outcome reported in `SETUP_COMPLETE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetupStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupComplete {
    pub status: SetupStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_visibility: Option<TransportVisibility>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SetupComplete {
    /// Successful completion.
    pub fn success(
        display_name: impl Into<String>,
        transport_visibility: TransportVisibility,
        ephemeral_message: Option<String>,
    ) -> Self {
        Self {
            status: SetupStatus::Success,
            display_name: Some(display_name.into()),
            transport_visibility: Some(transport_visibility),
            ephemeral_message,
            error: None,
        }
    }

    /// Failed completion.
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            status: SetupStatus::Error,
            display_name: None,
            transport_visibility: None,
            ephemeral_message: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportHandshake {
    pub protocol_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportHandshakeReply {
    pub protocol_version: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportAccepted {
    pub session_id: String,
}

/// Carrier for an opaque application payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadMessage {
    pub payload: Value,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn setup_handshake_wire_shape() {
        let env = Envelope::SetupHandshake(SetupHandshake {
            min_protocol_version: "1.0".to_string(),
            max_protocol_version: "1.0".to_string(),
            requires_visible_setup: false,
            requested_permissions: vec![PermissionRequirement::new(
                "camera",
                true,
                "emotion detection",
            )],
        });
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "SETUP_HANDSHAKE",
                "minProtocolVersion": "1.0",
                "maxProtocolVersion": "1.0",
                "requiresVisibleSetup": false,
                "requestedPermissions": [{
                    "name": "camera",
                    "phase": ["setup", "transport"],
                    "required": true,
                    "purpose": "emotion detection"
                }]
            })
        );
    }

    #[test]
    fn setup_complete_omits_absent_fields() {
        let env = Envelope::SetupComplete(SetupComplete::success(
            "Pi Calculator",
            TransportVisibility::new(VisibilityRequirement::Optional),
            Some("ready".to_string()),
        ));
        assert_eq!(
            serde_json::to_value(&env).unwrap(),
            json!({
                "type": "SETUP_COMPLETE",
                "status": "success",
                "displayName": "Pi Calculator",
                "transportVisibility": {"requirement": "optional"},
                "ephemeralMessage": "ready"
            })
        );

        let err = Envelope::SetupComplete(SetupComplete::error("user cancelled"));
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"type": "SETUP_COMPLETE", "status": "error", "error": "user cancelled"})
        );
    }

    #[test]
    fn message_wraps_payload_verbatim() {
        let payload = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"});
        let env = Envelope::message(payload.clone());
        assert_eq!(
            serde_json::to_value(&env).unwrap(),
            json!({"type": "MESSAGE", "payload": payload})
        );
        assert_eq!(env.family(), MessageFamily::Payload);
        assert_eq!(env.message_type(), MESSAGE);
    }

    #[test]
    fn missing_permissions_default_to_empty() {
        let env: Envelope = serde_json::from_value(json!({
            "type": "SETUP_HANDSHAKE",
            "minProtocolVersion": "1.0",
            "maxProtocolVersion": "1.0",
            "requiresVisibleSetup": true
        }))
        .unwrap();
        match env {
            Envelope::SetupHandshake(hs) => assert!(hs.requested_permissions.is_empty()),
            other => panic!("unexpected envelope {other:?}"),
        }
    }

    #[test]
    fn families() {
        let accepted = Envelope::TransportAccepted(TransportAccepted {
            session_id: "s1".to_string(),
        });
        assert_eq!(accepted.family(), MessageFamily::Transport);
        let reply = Envelope::SetupHandshakeReply(SetupHandshakeReply {
            protocol_version: "1.0".to_string(),
            session_id: "s1".to_string(),
        });
        assert_eq!(reply.family(), MessageFamily::Setup);
    }
}
