use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

pub const SCHEMA_BASE: &str = "https://schemas.3leaps.dev/framebridge/cli/v1";

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// `schema_id` value for a CLI document, e.g. `schema_id("negotiation")`.
pub fn schema_id(name: &str) -> String {
    format!("{SCHEMA_BASE}/{name}.schema.json")
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

/// Render labelled fields as a two-column table or indented lines.
pub fn print_fields(format: OutputFormat, title: &str, fields: &[(&str, String)]) {
    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (label, value) in fields {
                table.add_row(vec![label.to_string(), value.clone()]);
            }
            println!("{title}");
            println!("{table}");
        }
        _ => {
            println!("{title}:");
            let width = fields.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
            for (label, value) in fields {
                println!("  {:<width$}  {}", format!("{label}:"), value, width = width + 1);
            }
        }
    }
}

pub fn print_raw(text: &str) {
    let mut out = std::io::stdout();
    let _ = out.write_all(text.as_bytes());
    let _ = out.write_all(b"\n");
    let _ = out.flush();
}

/// Optional value for human-readable output.
pub fn or_dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_ids_share_base() {
        assert_eq!(
            schema_id("negotiation"),
            "https://schemas.3leaps.dev/framebridge/cli/v1/negotiation.schema.json"
        );
    }

    #[test]
    fn or_dash_fills_missing_values() {
        assert_eq!(or_dash(None), "-");
        assert_eq!(or_dash(Some("1.0")), "1.0");
    }
}
