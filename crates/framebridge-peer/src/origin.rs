//! Trust-on-first-use origin pinning.
//!
//! Before a channel has heard from its counterpart, any origin on the
//! allow-list is acceptable. The first accepted origin is pinned for the
//! lifetime of the channel; after that only an exact match is accepted, no
//! matter how permissive the allow-list is.

use framebridge_transport::WILDCARD_ORIGIN;

use crate::error::{BridgeError, Result};

/// Allow-list of acceptable counterpart origins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginPolicy {
    allowed: Vec<String>,
}

impl OriginPolicy {
    /// Policy accepting exactly `allowed` (`"*"` accepts any origin).
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    /// Policy accepting any origin until one is pinned.
    pub fn permissive() -> Self {
        Self::new([WILDCARD_ORIGIN])
    }

    /// Whether `origin` may be pinned.
    pub fn allows(&self, origin: &str) -> bool {
        self.allowed
            .iter()
            .any(|allowed| allowed == WILDCARD_ORIGIN || allowed == origin)
    }

    /// Configured origins.
    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    /// Whether the policy accepts nothing at all.
    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

/// Outcome of admitting an origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First accepted message: the origin is now pinned.
    Pinned,
    /// Origin matches the already pinned origin.
    Matched,
}

/// Origin pin state for one channel instance.
#[derive(Debug, Clone)]
pub struct OriginGuard {
    policy: OriginPolicy,
    pinned: Option<String>,
}

impl OriginGuard {
    pub fn new(policy: OriginPolicy) -> Self {
        Self {
            policy,
            pinned: None,
        }
    }

    /// Check `origin`, pinning it if nothing is pinned yet.
    ///
    /// The opaque origin `"null"` is never pinned.
    pub fn admit(&mut self, origin: &str) -> Result<Admission> {
        match &self.pinned {
            Some(pinned) if pinned == origin => Ok(Admission::Matched),
            Some(_) => Err(BridgeError::OriginRejected(origin.to_string())),
            None => {
                if origin.is_empty() || origin == "null" || !self.policy.allows(origin) {
                    return Err(BridgeError::OriginRejected(origin.to_string()));
                }
                self.pinned = Some(origin.to_string());
                Ok(Admission::Pinned)
            }
        }
    }

    /// Pinned origin, if any.
    pub fn pinned(&self) -> Option<&str> {
        self.pinned.as_deref()
    }

    pub fn policy(&self) -> &OriginPolicy {
        &self.policy
    }
}
