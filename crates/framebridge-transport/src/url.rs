//! Minimal URL helpers: origin extraction and fragment handling.
//!
//! Only the parts of URL parsing the bus needs are implemented here. The
//! origin is the serialized `scheme://host[:port]` tuple, with default ports
//! elided the way browsers report `event.origin`.

use crate::error::{Result, TransportError};

/// Serialized origin of an absolute URL.
pub fn origin_of(url: &str) -> Result<String> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| TransportError::InvalidUrl(url.to_string()))?;

    if scheme.is_empty()
        || !scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    {
        return Err(TransportError::InvalidUrl(url.to_string()));
    }
    let scheme = scheme.to_ascii_lowercase();

    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..authority_end];
    // Drop userinfo.
    let host_port = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host)| host);
    if host_port.is_empty() {
        return Err(TransportError::InvalidUrl(url.to_string()));
    }

    let host_port = host_port.to_ascii_lowercase();
    let default_port = match scheme.as_str() {
        "http" | "ws" => Some(":80"),
        "https" | "wss" => Some(":443"),
        _ => None,
    };
    let host_port = match default_port {
        Some(port) => host_port
            .strip_suffix(port)
            .map(str::to_string)
            .unwrap_or(host_port),
        None => host_port,
    };

    Ok(format!("{scheme}://{host_port}"))
}

/// Split a URL into the part before `#` and the fragment, if any.
pub fn split_fragment(url: &str) -> (&str, Option<&str>) {
    match url.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (url, None),
    }
}

/// URL without its fragment.
pub fn strip_fragment(url: &str) -> &str {
    split_fragment(url).0
}

/// Replace the fragment of `url` with `fragment`.
pub fn with_fragment(url: &str, fragment: &str) -> String {
    format!("{}#{}", strip_fragment(url), fragment)
}
