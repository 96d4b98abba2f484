//! Parsing of `mcporter call` arguments.

use crate::error::CliError;
use crate::output::OutputFormat;
use serde_json::{Map, Number, Value};

pub const CALL_TIMEOUT_ENV: &str = "MCPORTER_CALL_TIMEOUT";
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCall {
    pub selector: String,
    pub tool: String,
    pub args: Map<String, Value>,
    pub timeout_ms: Option<u64>,
    pub output: Option<OutputFormat>,
}

/// Parses the tokens after `mcporter call`.
///
/// Accepted forms: `<server> <tool> [key=value ...]`, `<server>.<tool>`,
/// `tool=NAME`/`command=NAME`, and the `--server`, `--tool`, `--timeout`,
/// `--output` and `--args <json object>` flags anywhere in the list.
pub fn parse_call_arguments(tokens: &[String]) -> Result<ParsedCall, CliError> {
    let mut selector: Option<String> = None;
    let mut tool: Option<String> = None;
    let mut args = Map::new();
    let mut timeout_ms = None;
    let mut output = None;
    let mut positional: Vec<&str> = Vec::new();

    let mut iter = tokens.iter();
    while let Some(token) = iter.next() {
        let mut value_for = |flag: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| CliError::MissingValue(flag.to_string()))
        };

        match token.as_str() {
            "--server" | "--selector" => selector = Some(value_for(token.as_str())?),
            "--tool" => tool = Some(value_for(token.as_str())?),
            "--timeout" => timeout_ms = Some(parse_timeout(&value_for(token.as_str())?)?),
            "--output" => output = Some(value_for(token.as_str())?.parse::<OutputFormat>()?),
            "--args" => args.extend(parse_args_json(&value_for(token.as_str())?)?),
            _ => {
                if let Some(name) = token
                    .strip_prefix("tool=")
                    .or_else(|| token.strip_prefix("command="))
                {
                    tool = Some(name.to_string());
                } else {
                    positional.push(token);
                }
            }
        }
    }

    let mut rest = positional.into_iter().peekable();
    if selector.is_none() {
        selector = rest.next_if(|token| !token.contains('=')).map(str::to_string);
    }
    let mut selector = selector.ok_or(CliError::MissingSelector)?;

    if tool.is_none() && !is_url(&selector) {
        if let Some((server, name)) = selector.split_once('.') {
            tool = Some(name.to_string());
            selector = server.to_string();
        }
    }
    if tool.is_none() {
        tool = rest.next_if(|token| !token.contains('=')).map(str::to_string);
    }

    for token in rest {
        let (key, raw) = token
            .split_once('=')
            .filter(|(key, _)| !key.is_empty())
            .ok_or_else(|| CliError::MalformedArgument(token.to_string()))?;
        args.insert(key.to_string(), coerce_value(raw));
    }

    let tool = tool
        .filter(|tool| !tool.is_empty())
        .ok_or_else(|| CliError::MissingTool {
            server: selector.clone(),
        })?;

    Ok(ParsedCall {
        selector,
        tool,
        args,
        timeout_ms,
        output,
    })
}

pub fn is_url(selector: &str) -> bool {
    selector.starts_with("http://") || selector.starts_with("https://")
}

fn parse_timeout(raw: &str) -> Result<u64, CliError> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|ms| *ms > 0)
        .ok_or_else(|| CliError::InvalidTimeout(raw.to_string()))
}

fn parse_args_json(raw: &str) -> Result<Map<String, Value>, CliError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(CliError::InvalidArgsJson(format!("got {other}"))),
        Err(e) => Err(CliError::InvalidArgsJson(e.to_string())),
    }
}

/// Turns a `key=value` value into the JSON value it most likely means.
pub fn coerce_value(raw: &str) -> Value {
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }

    if let Ok(int) = raw.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Some(number) = raw.parse::<f64>().ok().and_then(Number::from_f64) {
        if raw.chars().any(|c| c.is_ascii_digit()) {
            return Value::Number(number);
        }
    }
    if raw.starts_with('{') || raw.starts_with('[') {
        if let Ok(value) = serde_json::from_str::<Value>(raw) {
            return value;
        }
    }

    Value::String(raw.to_string())
}

/// The call deadline from `MCPORTER_CALL_TIMEOUT`, or 60 s when it is unset,
/// blank or not a positive number.
pub fn resolve_call_timeout() -> u64 {
    timeout_from_env_value(std::env::var(CALL_TIMEOUT_ENV).ok().as_deref())
}

fn timeout_from_env_value(value: Option<&str>) -> u64 {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|ms| ms.is_finite() && *ms > 0.0)
        .map(|ms| ms as u64)
        .filter(|ms| *ms > 0)
        .unwrap_or(DEFAULT_CALL_TIMEOUT_MS)
}
