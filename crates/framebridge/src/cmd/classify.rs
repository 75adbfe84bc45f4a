use std::io::Read;

use framebridge_frame::{classify, decode_envelope, message_type, MessageFamily};
use serde::Serialize;
use serde_json::Value;

use crate::cmd::ClassifyArgs;
use crate::exit::{io_error, CliError, CliResult, DATA_INVALID, FAILURE, SUCCESS, USAGE};
use crate::output::{or_dash, print_fields, print_json, print_raw, schema_id, OutputFormat};

#[derive(Serialize)]
struct ClassifyOutput {
    schema_id: String,
    message_type: Option<String>,
    family: Option<&'static str>,
    valid: bool,
    error: Option<String>,
}

pub fn run(args: ClassifyArgs, format: OutputFormat) -> CliResult<i32> {
    let text = read_document(&args)?;
    let value: Value = serde_json::from_str(&text)
        .map_err(|err| CliError::new(DATA_INVALID, format!("invalid JSON: {err}")))?;

    let family = classify(&value);
    let error = match family {
        Some(_) => decode_envelope(&value).err().map(|err| err.to_string()),
        None => None,
    };
    let out = ClassifyOutput {
        schema_id: schema_id("envelope-classification"),
        message_type: message_type(&value).map(str::to_string),
        family: family.map(family_name),
        valid: family.is_some() && error.is_none(),
        error,
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Raw => print_raw(out.family.unwrap_or("foreign")),
        OutputFormat::Table | OutputFormat::Pretty => print_fields(
            format,
            "Envelope",
            &[
                ("Type", or_dash(out.message_type.as_deref())),
                ("Family", out.family.unwrap_or("foreign").to_string()),
                ("Valid", out.valid.to_string()),
                ("Error", or_dash(out.error.as_deref())),
            ],
        ),
    }

    Ok(match (out.family, out.valid) {
        (Some(_), true) => SUCCESS,
        (Some(_), false) => DATA_INVALID,
        (None, _) => FAILURE,
    })
}

fn family_name(family: MessageFamily) -> &'static str {
    match family {
        MessageFamily::Setup => "setup",
        MessageFamily::Transport => "transport",
        MessageFamily::Payload => "payload",
    }
}

fn read_document(args: &ClassifyArgs) -> CliResult<String> {
    if let Some(json) = &args.json {
        return Ok(json.clone());
    }
    match &args.file {
        Some(path) if path.as_os_str() == "-" => read_stdin(),
        Some(path) => std::fs::read_to_string(path)
            .map_err(|err| io_error(&format!("failed to read {}", path.display()), err)),
        None => Err(CliError::new(USAGE, "provide a FILE, `-` or --json")),
    }
}

fn read_stdin() -> CliResult<String> {
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .map_err(|err| io_error("failed to read stdin", err))?;
    Ok(text)
}
