//! Rendering of tool call results.

use crate::error::CliError;
use mcporter_mcp_client::CallResult;
use serde_json::Value;
use std::io::{self, Write};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Text content when there is any, JSON otherwise.
    #[default]
    Auto,
    Json,
    Markdown,
    Text,
    /// The complete result value, pretty-printed, never truncated.
    Raw,
}

impl FromStr for OutputFormat {
    type Err = CliError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "json" => Ok(Self::Json),
            "markdown" | "md" => Ok(Self::Markdown),
            "text" => Ok(Self::Text),
            "raw" => Ok(Self::Raw),
            _ => Err(CliError::InvalidOutput(value.to_string())),
        }
    }
}

pub fn print_call_output(
    out: &mut dyn Write,
    result: &CallResult,
    format: OutputFormat,
) -> io::Result<()> {
    let rendered = match format {
        OutputFormat::Raw => pretty(result.raw()),
        OutputFormat::Json => result
            .json()
            .map(|value| pretty(&value))
            .unwrap_or_else(|| pretty(result.raw())),
        OutputFormat::Markdown => result
            .markdown()
            .or_else(|| result.text())
            .unwrap_or_else(|| pretty(result.raw())),
        OutputFormat::Text => result.text().unwrap_or_else(|| pretty(result.raw())),
        OutputFormat::Auto => result
            .text()
            .or_else(|| result.json().map(|value| pretty(&value)))
            .unwrap_or_else(|| pretty(result.raw())),
    };

    writeln!(out, "{rendered}")
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
