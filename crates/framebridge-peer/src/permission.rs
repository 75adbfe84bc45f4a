use std::collections::BTreeSet;

use framebridge_frame::PermissionRequirement;
use tracing::{info, warn};

use crate::error::{BridgeError, Result};

/// Capabilities granted without asking: none of them exposes devices,
/// location or the ability to navigate the host page.
pub const DEFAULT_SAFE_PERMISSIONS: &[&str] = &[
    "autoplay",
    "clipboard-write",
    "fullscreen",
    "picture-in-picture",
    "web-share",
];

/// Decides whether a capability requested by the inner context is granted.
pub trait PermissionApprover: Send + Sync {
    /// Approve or deny `permission` requested by a document at `origin`.
    fn approve(&self, permission: &PermissionRequirement, origin: &str) -> bool;
}

impl<F> PermissionApprover for F
where
    F: Fn(&PermissionRequirement, &str) -> bool + Send + Sync,
{
    fn approve(&self, permission: &PermissionRequirement, origin: &str) -> bool {
        self(permission, origin)
    }
}

/// Approves names from a fixed allow-list.
#[derive(Debug, Clone)]
pub struct SafeListApprover {
    names: BTreeSet<String>,
}

impl SafeListApprover {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for SafeListApprover {
    fn default() -> Self {
        Self::new(DEFAULT_SAFE_PERMISSIONS.iter().copied())
    }
}

impl PermissionApprover for SafeListApprover {
    fn approve(&self, permission: &PermissionRequirement, _origin: &str) -> bool {
        self.names.contains(&permission.name)
    }
}

/// Result of resolving a permission request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionDecision {
    /// Capabilities to apply to the inner window, in request order.
    pub granted: Vec<String>,
    /// Optional capabilities that were declined.
    pub declined: Vec<String>,
}

/// Resolve every requested permission through `approver`.
///
/// Duplicate names are resolved once. A declined `required` permission is a
/// fatal [`BridgeError::PermissionDenied`].
pub fn resolve_permissions(
    requested: &[PermissionRequirement],
    approver: &dyn PermissionApprover,
    origin: &str,
) -> Result<PermissionDecision> {
    let mut seen = BTreeSet::new();
    let mut decision = PermissionDecision::default();

    for permission in requested {
        if !seen.insert(permission.name.as_str()) {
            continue;
        }
        if approver.approve(permission, origin) {
            info!(origin, permission = %permission.name, "permission granted");
            decision.granted.push(permission.name.clone());
        } else if permission.required {
            warn!(origin, permission = %permission.name, "required permission denied");
            return Err(BridgeError::PermissionDenied(permission.name.clone()));
        } else {
            info!(origin, permission = %permission.name, "optional permission declined");
            decision.declined.push(permission.name.clone());
        }
    }

    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: &str = "https://tool.example";

    #[test]
    fn default_list_grants_safe_names_only() {
        let approver = SafeListApprover::default();
        let requested = vec![
            PermissionRequirement::new("clipboard-write", false, "copy results"),
            PermissionRequirement::new("camera", false, "emotion detection"),
        ];
        let decision = resolve_permissions(&requested, &approver, ORIGIN).unwrap();
        assert_eq!(decision.granted, vec!["clipboard-write"]);
        assert_eq!(decision.declined, vec!["camera"]);
    }

    #[test]
    fn required_denial_is_fatal() {
        let deny_all = |_: &PermissionRequirement, _: &str| false;
        let requested = vec![PermissionRequirement::new("camera", true, "emotion detection")];
        assert!(matches!(
            resolve_permissions(&requested, &deny_all, ORIGIN),
            Err(BridgeError::PermissionDenied(name)) if name == "camera"
        ));
    }

    #[test]
    fn closure_sees_origin_and_dedupes() {
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let approver = |p: &PermissionRequirement, origin: &str| {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            origin == ORIGIN && p.name == "microphone"
        };
        let requested = vec![
            PermissionRequirement::new("microphone", true, "dictation"),
            PermissionRequirement::new("microphone", true, "dictation"),
        ];
        let decision = resolve_permissions(&requested, &approver, ORIGIN).unwrap();
        assert_eq!(decision.granted, vec!["microphone"]);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_request_is_empty_decision() {
        let decision =
            resolve_permissions(&[], &SafeListApprover::default(), ORIGIN).unwrap();
        assert_eq!(decision, PermissionDecision::default());
    }
}
