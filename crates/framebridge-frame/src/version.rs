use std::fmt;
use std::str::FromStr;

use crate::error::FrameError;

/// Maximum accepted length of a protocol version string.
pub const MAX_VERSION_LEN: usize = 16;

/// Protocol version `1.0`.
pub const PROTOCOL_VERSION_1_0: ProtocolVersion = ProtocolVersion::new(1, 0);

/// Versions this implementation speaks, oldest first.
pub const SUPPORTED_VERSIONS: &[ProtocolVersion] = &[PROTOCOL_VERSION_1_0];

/// A `<major>.<minor>` protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ProtocolVersion {
    type Err = FrameError;

    fn from_str(version: &str) -> Result<Self, Self::Err> {
        if version.is_empty() || version.len() > MAX_VERSION_LEN {
            return Err(FrameError::InvalidVersion(version.to_string()));
        }

        let mut parts = version.split('.');
        let major = parts.next();
        let minor = parts.next();
        if parts.next().is_some() {
            return Err(FrameError::InvalidVersion(version.to_string()));
        }

        let parse = |part: Option<&str>| {
            part.filter(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|p| p.parse::<u16>().ok())
                .ok_or_else(|| FrameError::InvalidVersion(version.to_string()))
        };

        Ok(Self::new(parse(major)?, parse(minor)?))
    }
}

/// Pick the highest supported version inside the advertised `[min, max]` range.
///
/// Total and deterministic: malformed bounds, an inverted range, or an empty
/// intersection all yield `None`.
pub fn negotiate_version(
    min: &str,
    max: &str,
    supported: &[ProtocolVersion],
) -> Option<ProtocolVersion> {
    let min = min.parse::<ProtocolVersion>().ok()?;
    let max = max.parse::<ProtocolVersion>().ok()?;
    if min > max {
        return None;
    }

    supported
        .iter()
        .copied()
        .filter(|version| *version >= min && *version <= max)
        .max()
}

/// Whether `version` parses and is one of `supported`.
pub fn is_supported(version: &str, supported: &[ProtocolVersion]) -> bool {
    version
        .parse::<ProtocolVersion>()
        .is_ok_and(|v| supported.contains(&v))
}

#[cfg(test)]
mod tests {
    use super::*;

    const V1_0: ProtocolVersion = ProtocolVersion::new(1, 0);
    const V1_1: ProtocolVersion = ProtocolVersion::new(1, 1);
    const V2_0: ProtocolVersion = ProtocolVersion::new(2, 0);

    #[test]
    fn identical_ranges_agree() {
        assert_eq!(negotiate_version("1.0", "1.0", &[V1_0]), Some(V1_0));
        assert_eq!(V1_0.to_string(), "1.0");
    }

    #[test]
    fn disjoint_ranges_are_incompatible() {
        assert_eq!(negotiate_version("2.0", "2.0", &[V1_0]), None);
    }

    #[test]
    fn picks_highest_in_range() {
        let supported = [V1_0, V1_1, V2_0];
        assert_eq!(negotiate_version("1.0", "1.9", &supported), Some(V1_1));
        assert_eq!(negotiate_version("1.0", "3.0", &supported), Some(V2_0));
        assert_eq!(negotiate_version("1.1", "1.1", &supported), Some(V1_1));
    }

    #[test]
    fn order_of_supported_does_not_matter() {
        assert_eq!(
            negotiate_version("1.0", "2.0", &[V2_0, V1_0, V1_1]),
            negotiate_version("1.0", "2.0", &[V1_0, V1_1, V2_0])
        );
    }

    #[test]
    fn malformed_input_is_incompatibility() {
        for (min, max) in [
            ("", "1.0"),
            ("1", "1.0"),
            ("1.0.0", "1.0"),
            ("a.b", "1.0"),
            ("1.0", "-1.0"),
            ("1.+0", "1.0"),
            ("1.0", "99999999.0"),
            ("2.0", "1.0"),
        ] {
            assert_eq!(negotiate_version(min, max, &[V1_0]), None, "{min}..{max}");
        }
        assert_eq!(negotiate_version("1.0", "1.0", &[]), None);
    }

    #[test]
    fn parse_compares_numerically() {
        let v10: ProtocolVersion = "1.10".parse().unwrap();
        let v9: ProtocolVersion = "1.9".parse().unwrap();
        assert!(v10 > v9);
    }

    #[test]
    fn rejects_overlong_version() {
        assert!(matches!(
            "1.00000000000000000".parse::<ProtocolVersion>(),
            Err(FrameError::InvalidVersion(_))
        ));
    }

    #[test]
    fn supported_check() {
        assert!(is_supported("1.0", SUPPORTED_VERSIONS));
        assert!(!is_supported("2.0", SUPPORTED_VERSIONS));
        assert!(!is_supported("garbage", SUPPORTED_VERSIONS));
    }
}
