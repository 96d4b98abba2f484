//! CLI commands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// mcporter - call MCP server tools from the command line
#[derive(Parser, Debug)]
#[command(name = "mcporter")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file to use instead of searching for mcporter.json
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Register an ad-hoc stdio server from a command line
    #[arg(long, global = true, conflicts_with = "http_url")]
    pub stdio: Option<String>,

    /// Register an ad-hoc HTTP server
    #[arg(long, global = true)]
    pub http_url: Option<String>,

    /// Name for the ad-hoc server
    #[arg(long, global = true)]
    pub name: Option<String>,

    /// Environment for the ad-hoc stdio server (KEY=VALUE, repeatable)
    #[arg(long = "env", global = true, value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Call a tool: `call <server> <tool> [key=value ...]` or `call server.tool`
    Call {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, num_args = 0..)]
        args: Vec<String>,
    },

    /// List configured servers, or the tools of one server
    List {
        /// Server to list tools for
        server: Option<String>,
    },

    /// Authorize against a server (name or URL)
    Auth {
        /// Server name or URL
        target: String,
    },
}

impl Cli {
    /// The `--env` pairs as a map. Entries without `=` are ignored.
    pub fn adhoc_env(&self) -> std::collections::HashMap<String, String> {
        self.env
            .iter()
            .filter_map(|pair| pair.split_once('='))
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_keeps_flags_for_the_call_parser() {
        let cli = Cli::parse_from([
            "mcporter",
            "call",
            "chrome-devtools",
            "list_pages",
            "--timeout",
            "2500",
            "limit=5",
        ]);
        match cli.command {
            Commands::Call { args } => {
                assert_eq!(args, vec!["chrome-devtools", "list_pages", "--timeout", "2500", "limit=5"]);
            }
            other => panic!("expected call, got {other:?}"),
        }
        assert_eq!(cli.log_level, "warn");
    }

    #[test]
    fn test_global_adhoc_flags() {
        let cli = Cli::parse_from([
            "mcporter",
            "--stdio",
            "npx -y chrome-devtools-mcp@latest",
            "--env",
            "DEBUG=1",
            "list",
        ]);
        assert_eq!(cli.stdio.as_deref(), Some("npx -y chrome-devtools-mcp@latest"));
        assert_eq!(cli.adhoc_env().get("DEBUG").map(String::as_str), Some("1"));
        assert!(matches!(cli.command, Commands::List { server: None }));
    }

    #[test]
    fn test_stdio_and_http_url_conflict() {
        let result = Cli::try_parse_from([
            "mcporter",
            "--stdio",
            "node server.js",
            "--http-url",
            "https://example.com/mcp",
            "list",
        ]);
        assert!(result.is_err());
    }
}
