use serde_json::Value;

use crate::envelope::{Envelope, PermissionRequirement, SetupComplete, SetupStatus};
use crate::error::{FrameError, Result};
use crate::guards::{classify, message_type};
use crate::version::ProtocolVersion;

/// Maximum accepted length of a session id.
pub const MAX_SESSION_ID_LEN: usize = 128;
/// Maximum accepted length of a tool display name.
pub const MAX_DISPLAY_NAME_LEN: usize = 256;
/// Maximum number of permissions in one setup handshake.
pub const MAX_PERMISSIONS: usize = 32;
/// Maximum accepted length of a permission name.
pub const MAX_PERMISSION_NAME_LEN: usize = 64;

/// Decode a bus value into a typed envelope.
///
/// Values that are not recognisably ours return [`FrameError::NotAnEnvelope`];
/// callers on the receive path treat that as foreign traffic, not a failure.
pub fn decode_envelope(value: &Value) -> Result<Envelope> {
    if classify(value).is_none() {
        return Err(FrameError::NotAnEnvelope);
    }

    let envelope: Envelope =
        serde_json::from_value(value.clone()).map_err(|source| FrameError::Malformed {
            message_type: message_type(value).unwrap_or_default().to_string(),
            source,
        })?;
    validate_envelope(&envelope)?;
    Ok(envelope)
}

/// Encode an envelope into a bus value.
pub fn encode_envelope(envelope: &Envelope) -> Result<Value> {
    validate_envelope(envelope)?;
    Ok(serde_json::to_value(envelope)?)
}

fn validate_envelope(envelope: &Envelope) -> Result<()> {
    match envelope {
        Envelope::SetupHandshake(hs) => {
            validate_version(&hs.min_protocol_version)?;
            validate_version(&hs.max_protocol_version)?;
            validate_permissions(&hs.requested_permissions)
        }
        Envelope::SetupHandshakeReply(reply) => {
            validate_version(&reply.protocol_version)?;
            validate_session_id(&reply.session_id)
        }
        Envelope::SetupComplete(complete) => validate_setup_complete(complete),
        Envelope::TransportHandshake(hs) => validate_version(&hs.protocol_version),
        Envelope::TransportHandshakeReply(reply) => {
            validate_version(&reply.protocol_version)?;
            validate_session_id(&reply.session_id)
        }
        Envelope::TransportAccepted(accepted) => validate_session_id(&accepted.session_id),
        Envelope::Message(_) => Ok(()),
    }
}

fn validate_version(version: &str) -> Result<()> {
    version.parse::<ProtocolVersion>().map(|_| ())
}

fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.is_empty() || session_id.len() > MAX_SESSION_ID_LEN {
        return Err(FrameError::InvalidField {
            field: "sessionId",
            reason: format!("length {} (max {})", session_id.len(), MAX_SESSION_ID_LEN),
        });
    }
    Ok(())
}

fn validate_permissions(permissions: &[PermissionRequirement]) -> Result<()> {
    if permissions.len() > MAX_PERMISSIONS {
        return Err(FrameError::InvalidField {
            field: "requestedPermissions",
            reason: format!("{} entries (max {})", permissions.len(), MAX_PERMISSIONS),
        });
    }
    for permission in permissions {
        if permission.name.is_empty() || permission.name.len() > MAX_PERMISSION_NAME_LEN {
            return Err(FrameError::InvalidField {
                field: "requestedPermissions.name",
                reason: format!(
                    "length {} (max {})",
                    permission.name.len(),
                    MAX_PERMISSION_NAME_LEN
                ),
            });
        }
    }
    Ok(())
}

fn validate_setup_complete(complete: &SetupComplete) -> Result<()> {
    match complete.status {
        SetupStatus::Success => {
            let name = complete.display_name.as_deref().unwrap_or_default();
            if name.is_empty() || name.len() > MAX_DISPLAY_NAME_LEN {
                return Err(FrameError::InvalidField {
                    field: "displayName",
                    reason: format!("length {} (max {})", name.len(), MAX_DISPLAY_NAME_LEN),
                });
            }
            if complete.transport_visibility.is_none() {
                return Err(FrameError::InvalidField {
                    field: "transportVisibility",
                    reason: "required when status is success".to_string(),
                });
            }
        }
        SetupStatus::Error => {
            if complete.error.as_deref().is_none_or(str::is_empty) {
                return Err(FrameError::InvalidField {
                    field: "error",
                    reason: "required when status is error".to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::envelope::{
        TransportAccepted, TransportVisibility, VisibilityRequirement,
    };

    #[test]
    fn decodes_transport_reply() {
        let env = decode_envelope(&json!({
            "type": "TRANSPORT_HANDSHAKE_REPLY",
            "protocolVersion": "1.0",
            "sessionId": "s1"
        }))
        .unwrap();
        match env {
            Envelope::TransportHandshakeReply(reply) => {
                assert_eq!(reply.protocol_version, "1.0");
                assert_eq!(reply.session_id, "s1");
            }
            other => panic!("unexpected envelope {other:?}"),
        }
    }

    #[test]
    fn foreign_value_is_not_an_envelope() {
        assert!(matches!(
            decode_envelope(&json!({"type": "webpackHotUpdate"})),
            Err(FrameError::NotAnEnvelope)
        ));
    }

    #[test]
    fn malformed_body_is_reported() {
        let err = decode_envelope(&json!({
            "type": "SETUP_HANDSHAKE",
            "minProtocolVersion": "1.0",
            "maxProtocolVersion": "1.0",
            "requiresVisibleSetup": "yes"
        }))
        .unwrap_err();
        assert!(
            matches!(err, FrameError::Malformed { ref message_type, .. } if message_type == "SETUP_HANDSHAKE")
        );
    }

    #[test]
    fn invalid_version_rejected_on_decode() {
        assert!(matches!(
            decode_envelope(&json!({"type": "TRANSPORT_HANDSHAKE", "protocolVersion": "one"})),
            Err(FrameError::InvalidVersion(_))
        ));
    }

    #[test]
    fn session_id_limits() {
        assert!(matches!(
            decode_envelope(&json!({"type": "TRANSPORT_ACCEPTED", "sessionId": ""})),
            Err(FrameError::InvalidField { field: "sessionId", .. })
        ));
        let long = Envelope::TransportAccepted(TransportAccepted {
            session_id: "x".repeat(MAX_SESSION_ID_LEN + 1),
        });
        assert!(matches!(
            encode_envelope(&long),
            Err(FrameError::InvalidField { field: "sessionId", .. })
        ));
    }

    #[test]
    fn too_many_permissions_rejected() {
        let permissions: Vec<Value> = (0..=MAX_PERMISSIONS)
            .map(|i| json!({"name": format!("p{i}"), "phase": ["setup"], "required": false, "purpose": ""}))
            .collect();
        let err = decode_envelope(&json!({
            "type": "SETUP_HANDSHAKE",
            "minProtocolVersion": "1.0",
            "maxProtocolVersion": "1.0",
            "requiresVisibleSetup": false,
            "requestedPermissions": permissions
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            FrameError::InvalidField {
                field: "requestedPermissions",
                ..
            }
        ));
    }

    #[test]
    fn setup_complete_requires_fields_per_status() {
        assert!(matches!(
            decode_envelope(&json!({"type": "SETUP_COMPLETE", "status": "success"})),
            Err(FrameError::InvalidField { field: "displayName", .. })
        ));
        assert!(matches!(
            decode_envelope(&json!({
                "type": "SETUP_COMPLETE",
                "status": "success",
                "displayName": "Pi Calculator"
            })),
            Err(FrameError::InvalidField { field: "transportVisibility", .. })
        ));
        assert!(matches!(
            decode_envelope(&json!({"type": "SETUP_COMPLETE", "status": "error"})),
            Err(FrameError::InvalidField { field: "error", .. })
        ));
    }

    #[test]
    fn encode_produces_decodable_value() {
        let env = Envelope::SetupComplete(SetupComplete::success(
            "JSON Explorer",
            TransportVisibility {
                requirement: VisibilityRequirement::Required,
                description: Some("shows the tree".to_string()),
            },
            None,
        ));
        let value = encode_envelope(&env).unwrap();
        assert_eq!(decode_envelope(&value).unwrap(), env);
    }
}
