use crate::error::McpClientError;
use crate::http::HttpSession;
use crate::shutdown::ShutdownReport;
use crate::stdio::StdioSession;
use crate::types::{BackendDefinition, CommandSpec, ToolInfo};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A live connection to one backend.
#[async_trait]
pub trait McpSession: Send + Sync {
    fn server_name(&self) -> &str;

    async fn list_tools(&self) -> Result<Vec<ToolInfo>, McpClientError>;

    /// Sends `tools/call` and returns the raw result object. No deadline is
    /// applied here; callers race this against their own timer.
    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, McpClientError>;

    /// Tears the connection down. Safe to call more than once.
    async fn close(&self) -> ShutdownReport;

    fn is_closed(&self) -> bool;
}

/// Opens sessions for definitions.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Opens a session. Cancelling `abort` must make an unfinished connect
    /// return promptly, with anything it started already shut down.
    async fn connect(
        &self,
        definition: &BackendDefinition,
        abort: &CancellationToken,
    ) -> Result<Arc<dyn McpSession>, McpClientError>;
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub client_name: String,
    pub client_version: String,
    /// Deadline for `initialize` and `tools/list`.
    pub request_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            client_name: "mcporter".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Connects stdio definitions by spawning them and HTTP definitions over
/// `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct DefaultConnector {
    options: SessionOptions,
}

impl DefaultConnector {
    pub fn new(options: SessionOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl SessionConnector for DefaultConnector {
    async fn connect(
        &self,
        definition: &BackendDefinition,
        abort: &CancellationToken,
    ) -> Result<Arc<dyn McpSession>, McpClientError> {
        tracing::debug!(
            server = %definition.name,
            source = %definition.source_label(),
            "opening MCP session"
        );

        match &definition.command {
            CommandSpec::Stdio { .. } => {
                let session = StdioSession::connect_until(definition, &self.options, abort).await?;
                Ok(Arc::new(session))
            }
            CommandSpec::Http { .. } => {
                let session = HttpSession::connect_until(definition, &self.options, abort).await?;
                Ok(Arc::new(session))
            }
        }
    }
}
