use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

/// A named backend the runtime can open a session against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendDefinition {
    pub name: String,
    pub command: CommandSpec,
    pub source: SourceSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CommandSpec {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

/// Where a definition came from, kept for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceSpec {
    Config { path: PathBuf },
    Adhoc,
}

impl BackendDefinition {
    pub fn stdio(
        name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
        env: HashMap<String, String>,
        source: SourceSpec,
    ) -> Self {
        Self {
            name: name.into(),
            command: CommandSpec::Stdio {
                command: command.into(),
                args,
                env,
                cwd: None,
            },
            source,
            description: None,
        }
    }

    pub fn http(name: impl Into<String>, url: impl Into<String>, source: SourceSpec) -> Self {
        Self {
            name: name.into(),
            command: CommandSpec::Http {
                url: url.into(),
                headers: HashMap::new(),
            },
            source,
            description: None,
        }
    }

    /// Builds a stdio definition from a single shell-style command line
    /// such as `npx -y chrome-devtools-mcp@latest`.
    pub fn stdio_from_command_line(
        name: impl Into<String>,
        command_line: &str,
        env: HashMap<String, String>,
        source: SourceSpec,
    ) -> Result<Self, String> {
        let mut parts = shlex::split(command_line)
            .ok_or_else(|| format!("failed to parse MCP command: {command_line}"))?;

        if parts.is_empty() {
            return Err("MCP command is empty".to_string());
        }

        let command = parts.remove(0);
        Ok(Self::stdio(name, command, parts, env, source))
    }

    pub fn is_stdio(&self) -> bool {
        matches!(self.command, CommandSpec::Stdio { .. })
    }

    pub fn source_label(&self) -> String {
        match &self.source {
            SourceSpec::Config { path } => path.display().to_string(),
            SourceSpec::Adhoc => "<adhoc>".to_string(),
        }
    }
}

/// A tool advertised by a backend's `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

impl ToolInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: Value::Null,
        }
    }
}

/// The raw value returned by `tools/call`, with accessors for the common
/// content shapes.
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    raw: Value,
}

impl CallResult {
    pub fn new(raw: Value) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn into_raw(self) -> Value {
        self.raw
    }

    pub fn is_error(&self) -> bool {
        self.raw
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Concatenated `text` content blocks, if any.
    pub fn text(&self) -> Option<String> {
        if let Some(text) = self.raw.as_str() {
            return Some(text.to_string());
        }

        let texts: Vec<&str> = self
            .content_blocks()
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect();

        if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        }
    }

    /// `structuredContent` when present, otherwise the first text block that
    /// parses as JSON.
    pub fn json(&self) -> Option<Value> {
        if let Some(structured) = self.raw.get("structuredContent") {
            return Some(structured.clone());
        }

        self.content_blocks()
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .find_map(|text| serde_json::from_str::<Value>(text.trim()).ok())
            .filter(|value| value.is_object() || value.is_array())
    }

    /// Text blocks joined as paragraphs; non-text blocks become fenced JSON.
    pub fn markdown(&self) -> Option<String> {
        let blocks = self.content_blocks();
        if blocks.is_empty() {
            return self.text();
        }

        let mut sections = Vec::with_capacity(blocks.len());
        for block in blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        sections.push(text.to_string());
                    }
                }
                _ => {
                    let pretty = serde_json::to_string_pretty(block).ok()?;
                    sections.push(format!("```json\n{pretty}\n```"));
                }
            }
        }

        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n\n"))
        }
    }

    fn content_blocks(&self) -> &[Value] {
        self.raw
            .get("content")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_command_line_into_stdio_definition() {
        let def = BackendDefinition::stdio_from_command_line(
            "filesystem",
            "npx -y @modelcontextprotocol/server-filesystem /tmp",
            HashMap::new(),
            SourceSpec::Adhoc,
        )
        .unwrap();

        match def.command {
            CommandSpec::Stdio { command, args, .. } => {
                assert_eq!(command, "npx");
                assert_eq!(
                    args,
                    vec![
                        "-y".to_string(),
                        "@modelcontextprotocol/server-filesystem".to_string(),
                        "/tmp".to_string()
                    ]
                );
            }
            other => panic!("expected stdio command, got {other:?}"),
        }
    }

    #[test]
    fn rejects_empty_command_line() {
        let err = BackendDefinition::stdio_from_command_line(
            "empty",
            "   ",
            HashMap::new(),
            SourceSpec::Adhoc,
        )
        .unwrap_err();
        assert_eq!(err, "MCP command is empty");
    }

    #[test]
    fn call_result_accessors() {
        let result = CallResult::new(json!({
            "content": [
                {"type": "text", "text": "{\"pages\": 2}"},
                {"type": "image", "data": "AAAA", "mimeType": "image/png"}
            ]
        }));

        assert_eq!(result.text().as_deref(), Some("{\"pages\": 2}"));
        assert_eq!(result.json(), Some(json!({"pages": 2})));
        let markdown = result.markdown().unwrap();
        assert!(markdown.starts_with("{\"pages\": 2}"));
        assert!(markdown.contains("```json"));
        assert!(!result.is_error());
    }

    #[test]
    fn structured_content_wins_for_json() {
        let result = CallResult::new(json!({
            "content": [{"type": "text", "text": "ignored"}],
            "structuredContent": {"id": "react"}
        }));
        assert_eq!(result.json(), Some(json!({"id": "react"})));
    }
}
