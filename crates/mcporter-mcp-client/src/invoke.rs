//! The tool call pipeline: deadline, auth retry and name correction.

use crate::auth::AuthRetrier;
use crate::correction::{is_tool_not_found, suggest_correction, Correction};
use crate::error::{CallError, McpClientError};
use crate::runtime::ToolRuntime;
use crate::types::CallResult;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(60_000);

/// What a successful call produced, and under which tool name.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub result: CallResult,
    pub tool: String,
    pub correction: Option<Correction>,
}

/// Retry budget for one logical call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    pub corrections: u8,
}

const MAX_CORRECTIONS: u8 = 1;

pub struct ToolInvoker {
    runtime: Arc<dyn ToolRuntime>,
    timeout: Duration,
}

impl ToolInvoker {
    pub fn new(runtime: Arc<dyn ToolRuntime>) -> Self {
        Self {
            runtime,
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Calls `server.tool`, retrying once after re-registering the backend
    /// on an authorization failure and once under a corrected name if the
    /// tool does not exist.
    pub async fn invoke(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<CallOutcome, CallError> {
        let mut auth = AuthRetrier::new(self.runtime.as_ref(), server);
        let mut state = RetryState::default();
        let mut tool = tool.to_string();
        let mut correction = None;

        loop {
            let attempt = auth
                .run(|| self.call_with_deadline(server, &tool, arguments.clone()))
                .await;

            let err = match attempt {
                Ok(raw) => {
                    return Ok(CallOutcome {
                        result: CallResult::new(raw),
                        tool,
                        correction,
                    })
                }
                Err(CallError::Transport(err))
                    if is_tool_not_found(&err) && state.corrections < MAX_CORRECTIONS =>
                {
                    err
                }
                Err(err) => return Err(err),
            };

            state.corrections += 1;
            let Some(found) = suggest_correction(self.runtime.as_ref(), server, &tool).await else {
                return Err(CallError::ToolNotFound {
                    server: server.to_string(),
                    tool,
                    source: err,
                });
            };

            tracing::info!(server = %server, from = %tool, to = %found.tool, "{}", found.notice());
            tool = found.tool.clone();
            correction = Some(found);
        }
    }

    /// One `tools/call` raced against the deadline. When the deadline wins
    /// the backend is closed in the background and the call is abandoned.
    pub async fn call_with_deadline(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<Value, CallError> {
        let runtime = self.runtime.clone();
        let (call_server, call_tool) = (server.to_string(), tool.to_string());
        let call = tokio::spawn(async move {
            runtime
                .call_tool(&call_server, &call_tool, arguments)
                .await
        });

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(result)) => result.map_err(CallError::from),
            Ok(Err(join_error)) => Err(CallError::Transport(McpClientError::Transport {
                server: server.to_string(),
                message: format!("call task for {server}.{tool} failed: {join_error}"),
            })),
            Err(_) => {
                let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(server = %server, tool = %tool, timeout_ms, "tool call timed out, closing backend");

                let runtime = self.runtime.clone();
                let close_server = server.to_string();
                tokio::spawn(async move {
                    runtime.close(Some(&close_server)).await;
                });

                Err(CallError::Timeout {
                    server: server.to_string(),
                    tool: tool.to_string(),
                    timeout_ms,
                })
            }
        }
    }
}
