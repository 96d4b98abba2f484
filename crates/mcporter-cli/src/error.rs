use mcporter_mcp_client::CallError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Argument '{0}' must be key=value format.")]
    MalformedArgument(String),

    #[error("Missing server selector. Usage: mcporter call <server> <tool> [key=value ...]")]
    MissingSelector,

    #[error("Missing tool name for server '{server}'. Use `mcporter list {server}` to see its tools.")]
    MissingTool { server: String },

    #[error("Flag '{0}' requires a value.")]
    MissingValue(String),

    #[error("Invalid --timeout value '{0}': expected a positive number of milliseconds.")]
    InvalidTimeout(String),

    #[error("Invalid --output value '{0}': expected auto, json, markdown, text or raw.")]
    InvalidOutput(String),

    #[error("--args must be a JSON object: {0}")]
    InvalidArgsJson(String),

    #[error("Unknown MCP server '{0}'. Use `mcporter list` to see configured servers.")]
    UnknownServer(String),

    #[error("Invalid definition for '{name}': {message}")]
    InvalidDefinition { name: String, message: String },

    #[error(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0:#}")]
    Config(#[from] anyhow::Error),
}
