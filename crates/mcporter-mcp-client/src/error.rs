use thiserror::Error;

#[derive(Debug, Error)]
pub enum McpClientError {
    #[error("failed to spawn MCP server '{server}': {message}")]
    SpawnFailed { server: String, message: String },

    #[error("failed to serialize JSON-RPC message: {0}")]
    Serialization(String),

    #[error("failed to parse JSON-RPC message: {0}")]
    Parse(String),

    #[error("JSON-RPC transport closed for '{server}'")]
    TransportClosed { server: String },

    #[error("MCP error {code}: {message}")]
    ProtocolError { code: i64, message: String },

    #[error("HTTP error: Non-200 status code ({status})")]
    Http { status: u16, body: String },

    #[error("request to '{server}' failed: {message}")]
    Request { server: String, message: String },

    #[error("invalid MCP response: {0}")]
    InvalidResponse(String),

    #[error("unknown MCP server: {server}")]
    UnknownServer { server: String },

    #[error("{message}")]
    Transport { server: String, message: String },
}

/// Failures surfaced by the tool call pipeline.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("Call to {server}.{tool} timed out after {timeout_ms}ms.")]
    Timeout {
        server: String,
        tool: String,
        timeout_ms: u64,
    },

    #[error("Failed to authorize '{server}'. Re-run `mcporter auth {server}` to complete authorization. ({source})")]
    AuthFailed {
        server: String,
        #[source]
        source: McpClientError,
    },

    #[error("Tool '{tool}' not found on server '{server}': {source}")]
    ToolNotFound {
        server: String,
        tool: String,
        #[source]
        source: McpClientError,
    },

    #[error(transparent)]
    Transport(#[from] McpClientError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_server_tool_and_deadline() {
        let err = CallError::Timeout {
            server: "chrome-devtools".to_string(),
            tool: "list_pages".to_string(),
            timeout_ms: 10,
        };
        assert_eq!(
            err.to_string(),
            "Call to chrome-devtools.list_pages timed out after 10ms."
        );
    }

    #[test]
    fn protocol_error_mirrors_wire_format() {
        let err = McpClientError::ProtocolError {
            code: -32602,
            message: "Tool listIssues not found".to_string(),
        };
        assert_eq!(err.to_string(), "MCP error -32602: Tool listIssues not found");
    }
}
