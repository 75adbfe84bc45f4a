use framebridge_frame::{negotiate_version, ProtocolVersion, SUPPORTED_VERSIONS};
use serde::Serialize;

use crate::cmd::NegotiateArgs;
use crate::exit::{frame_error, CliResult, FAILURE, SUCCESS};
use crate::output::{or_dash, print_fields, print_json, print_raw, schema_id, OutputFormat};

#[derive(Serialize)]
struct NegotiateOutput {
    schema_id: String,
    min: String,
    max: String,
    supported: Vec<String>,
    negotiated: Option<String>,
    compatible: bool,
}

pub fn run(args: NegotiateArgs, format: OutputFormat) -> CliResult<i32> {
    let supported = match &args.supported {
        Some(list) => list
            .iter()
            .map(|v| v.trim().parse::<ProtocolVersion>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| frame_error("invalid --supported", err))?,
        None => SUPPORTED_VERSIONS.to_vec(),
    };
    // Bounds are validated for a clear error; negotiation itself never fails.
    args.min
        .parse::<ProtocolVersion>()
        .map_err(|err| frame_error("invalid --min", err))?;
    args.max
        .parse::<ProtocolVersion>()
        .map_err(|err| frame_error("invalid --max", err))?;

    let negotiated = negotiate_version(&args.min, &args.max, &supported);
    let out = NegotiateOutput {
        schema_id: schema_id("negotiation"),
        min: args.min,
        max: args.max,
        supported: supported.iter().map(ToString::to_string).collect(),
        negotiated: negotiated.map(|v| v.to_string()),
        compatible: negotiated.is_some(),
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Raw => print_raw(out.negotiated.as_deref().unwrap_or("incompatible")),
        OutputFormat::Table | OutputFormat::Pretty => print_fields(
            format,
            "Version Negotiation",
            &[
                ("Range", format!("{} .. {}", out.min, out.max)),
                ("Supported", out.supported.join(", ")),
                ("Negotiated", or_dash(out.negotiated.as_deref())),
            ],
        ),
    }

    Ok(if out.compatible { SUCCESS } else { FAILURE })
}
