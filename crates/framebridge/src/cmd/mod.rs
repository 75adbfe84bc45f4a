use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod classify;
pub mod demo;
pub mod negotiate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Negotiate a protocol version for an advertised range.
    Negotiate(NegotiateArgs),
    /// Classify and validate a JSON document as a protocol envelope.
    Classify(ClassifyArgs),
    /// Run setup, transport and an echo exchange over an in-memory bus.
    Demo(DemoArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Negotiate(args) => negotiate::run(args, format),
        Command::Classify(args) => classify::run(args, format),
        Command::Demo(args) => demo::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct NegotiateArgs {
    /// Lowest version advertised by the inner context.
    #[arg(long, default_value = "1.0")]
    pub min: String,
    /// Highest version advertised by the inner context.
    #[arg(long, default_value = "1.0")]
    pub max: String,
    /// Versions supported by the outer context (comma-separated).
    /// Default: the versions this build speaks.
    #[arg(long, value_delimiter = ',')]
    pub supported: Option<Vec<String>>,
}

#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// File holding one JSON document (`-` for stdin).
    #[arg(conflicts_with = "json")]
    pub file: Option<PathBuf>,
    /// Inline JSON document.
    #[arg(long)]
    pub json: Option<String>,
}

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Tool URL the host navigates to.
    #[arg(long, default_value = "https://tool.example/echo")]
    pub url: String,
    /// URL of the host page.
    #[arg(long, default_value = "https://host.example/chat")]
    pub host_url: String,
    /// Origins the host accepts (repeatable). Default: the tool URL's origin.
    #[arg(long = "allow-origin", value_name = "ORIGIN")]
    pub allow_origins: Vec<String>,
    /// JSON payload to send once connected (repeatable).
    #[arg(long = "message", value_name = "JSON")]
    pub messages: Vec<String>,
    /// Display name the tool reports after setup.
    #[arg(long, default_value = "Echo Tool")]
    pub display_name: String,
    /// Permission the tool requests, `NAME` or `NAME:required` (repeatable).
    #[arg(long = "request-permission", value_name = "PERMISSION")]
    pub permissions: Vec<String>,
    /// Deny every permission the tool requests.
    #[arg(long)]
    pub deny_permissions: bool,
    /// Lowest protocol version the tool advertises.
    #[arg(long, default_value = "1.0")]
    pub tool_min: String,
    /// Highest protocol version the tool advertises.
    #[arg(long, default_value = "1.0")]
    pub tool_max: String,
    /// Make the tool report this setup error.
    #[arg(long, value_name = "MESSAGE")]
    pub setup_error: Option<String>,
    /// Fixed session id instead of a random one.
    #[arg(long)]
    pub session_id: Option<String>,
    /// Ask for a visible window during setup.
    #[arg(long)]
    pub visible_setup: bool,
    /// Timeout for navigation, each handshake and each reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "30s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_timeout(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "timeout must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid timeout value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "timeout must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_timeout_units() {
        assert_eq!(parse_timeout("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_timeout("2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_timeout("150ms").unwrap(), Duration::from_millis(150));
    }

    #[test]
    fn parse_timeout_invalid() {
        assert!(parse_timeout("0s").is_err());
        assert!(parse_timeout("bad").is_err());
        assert!(parse_timeout("").is_err());
    }
}
