use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Main mcporter configuration
///
/// Loaded from (in priority order) `mcporter.jsonc`, `mcporter.json`,
/// `mcporter.yml`, `mcporter.yaml` in the working directory, then the same
/// names under `./config/` and `~/.config/mcporter/`.
///
/// # Example
///
/// ```jsonc
/// {
///   // Local stdio server
///   "mcpServers": {
///     "chrome-devtools": { "command": "npx", "args": ["-y", "chrome-devtools-mcp@latest"] },
///     "linear": { "url": "https://mcp.linear.app/mcp" }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct McporterConfig {
    #[serde(default, rename = "mcpServers", alias = "mcp_servers")]
    pub mcp_servers: BTreeMap<String, ServerEntry>,
}

/// One entry of `mcpServers`. Exactly one of `command` or `url` is expected.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerEntry {
    /// Executable, or a full command line when `args` is empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Working directory for the spawned server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    /// Remote endpoint (streamable HTTP / SSE)
    #[serde(
        default,
        alias = "baseUrl",
        alias = "base_url",
        skip_serializing_if = "Option::is_none"
    )]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    Stdio,
    Http,
}

impl ServerEntry {
    /// `url` wins when both are set; `None` when neither is.
    pub fn kind(&self) -> Option<ServerKind> {
        if self.url.is_some() {
            Some(ServerKind::Http)
        } else if self.command.is_some() {
            Some(ServerKind::Stdio)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_mcp_servers_map() {
        let json = r#"{
  "mcpServers": {
    "chrome-devtools": {"command": "npx", "args": ["-y", "chrome-devtools-mcp@latest"]},
    "linear": {"baseUrl": "https://mcp.linear.app/mcp", "headers": {"Authorization": "Bearer x"}}
  }
}"#;
        let config: McporterConfig = serde_json::from_str(json).unwrap();

        let chrome = &config.mcp_servers["chrome-devtools"];
        assert_eq!(chrome.kind(), Some(ServerKind::Stdio));
        assert_eq!(chrome.args, vec!["-y", "chrome-devtools-mcp@latest"]);

        let linear = &config.mcp_servers["linear"];
        assert_eq!(linear.kind(), Some(ServerKind::Http));
        assert_eq!(linear.url.as_deref(), Some("https://mcp.linear.app/mcp"));
    }

    #[test]
    fn test_empty_config_has_no_servers() {
        let config: McporterConfig = serde_json::from_str("{}").unwrap();
        assert!(config.mcp_servers.is_empty());
        assert_eq!(ServerEntry::default().kind(), None);
    }
}
