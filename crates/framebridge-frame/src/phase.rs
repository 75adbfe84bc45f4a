use std::fmt;

use framebridge_transport::{split_fragment, strip_fragment, with_fragment};

/// Reserved URL fragment that asks the inner context to run setup.
pub const SETUP_MARKER: &str = "setup";

/// Which sub-protocol a navigation is for.
///
/// Derived once at the edge from the navigated URL and then passed around
/// explicitly, so protocol code never looks at ambient location state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// "Configure me": run the setup handshake.
    Setup,
    /// "Connect to me": run the transport handshake.
    Transport,
}

impl Phase {
    /// Phase requested by `url`. Absence of the marker always means transport.
    pub fn from_url(url: &str) -> Self {
        match split_fragment(url).1 {
            Some(SETUP_MARKER) => Phase::Setup,
            _ => Phase::Transport,
        }
    }

    /// `url` rewritten to request this phase.
    pub fn apply_to(self, url: &str) -> String {
        match self {
            Phase::Setup => with_fragment(url, SETUP_MARKER),
            Phase::Transport => strip_fragment(url).to_string(),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Setup => f.write_str("setup"),
            Phase::Transport => f.write_str("transport"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_selects_setup() {
        assert_eq!(Phase::from_url("https://tool.example/app#setup"), Phase::Setup);
        assert_eq!(Phase::from_url("https://tool.example/app"), Phase::Transport);
        assert_eq!(
            Phase::from_url("https://tool.example/app#settings"),
            Phase::Transport
        );
        assert_eq!(
            Phase::from_url("https://tool.example/app#setup-extra"),
            Phase::Transport
        );
    }

    #[test]
    fn apply_round_trips_phase() {
        let base = "https://tool.example/app?x=1";
        let setup = Phase::Setup.apply_to(base);
        assert_eq!(setup, "https://tool.example/app?x=1#setup");
        assert_eq!(Phase::from_url(&setup), Phase::Setup);

        let transport = Phase::Transport.apply_to(&setup);
        assert_eq!(transport, base);
        assert_eq!(Phase::from_url(&transport), Phase::Transport);
    }
}
