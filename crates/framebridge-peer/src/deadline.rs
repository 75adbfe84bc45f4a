use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};

/// Timeout and cancellation for one handshake attempt.
///
/// Both share the same mechanism: a step raced against a deadline fails with
/// [`BridgeError::HandshakeTimeout`] when the timer fires first, or with
/// [`BridgeError::Cancelled`] when the token is cancelled first. Each awaited
/// step settles exactly once; nothing keeps running after the race is lost.
#[derive(Debug, Clone)]
pub struct Deadline {
    token: CancellationToken,
    expires_at: Instant,
    timeout: Duration,
}

impl Deadline {
    /// Deadline `timeout` from now with a fresh token.
    pub fn after(timeout: Duration) -> Self {
        Self::with_token(timeout, CancellationToken::new())
    }

    /// Deadline `timeout` from now, cancelled together with `token`.
    pub fn with_token(timeout: Duration, token: CancellationToken) -> Self {
        Self {
            token,
            expires_at: Instant::now() + timeout,
            timeout,
        }
    }

    /// Nested deadline: expires at the earlier of `self` and `timeout` from
    /// now, and is cancelled whenever `self` is.
    pub fn child(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let (expires_at, timeout) = if candidate <= self.expires_at {
            (candidate, timeout)
        } else {
            (self.expires_at, self.timeout)
        };
        Self {
            token: self.token.child_token(),
            expires_at,
            timeout,
        }
    }

    /// Cancel this deadline and every child.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Time left before expiry.
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Timeout reported when this deadline expires.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Race `step` against expiry and cancellation.
    pub async fn run<T, F>(&self, step: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(BridgeError::Cancelled),
            _ = tokio::time::sleep_until(self.expires_at) => {
                Err(BridgeError::HandshakeTimeout(self.timeout))
            }
            result = step => result,
        }
    }
}
