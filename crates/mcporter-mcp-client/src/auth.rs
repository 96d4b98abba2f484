//! One-shot recovery from authorization failures.

use crate::error::{CallError, McpClientError};
use crate::runtime::ToolRuntime;
use regex::Regex;
use std::future::Future;
use std::sync::OnceLock;

fn unauthorized_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:status(?:\s+code)?|http(?:/\d(?:\.\d)?)?)\s*[:(]?\s*(?:401|403)\b|unauthori[sz]ed|forbidden|invalid_token",
        )
        .expect("unauthorized pattern is valid")
    })
}

/// Whether `err` looks like the backend rejected our credentials.
pub fn is_unauthorized(err: &McpClientError) -> bool {
    if let McpClientError::Http { status, .. } = err {
        if matches!(status, 401 | 403) {
            return true;
        }
    }
    unauthorized_pattern().is_match(&err.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    NotAttempted,
    Retried,
    Failed,
}

/// Runs an operation against one backend, re-registering the backend's
/// definition and retrying once if the first attempt is rejected as
/// unauthorized.
pub struct AuthRetrier<'a> {
    runtime: &'a dyn ToolRuntime,
    server: &'a str,
    state: AuthState,
}

impl<'a> AuthRetrier<'a> {
    pub fn new(runtime: &'a dyn ToolRuntime, server: &'a str) -> Self {
        Self {
            runtime,
            server,
            state: AuthState::NotAttempted,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub async fn run<T, F, Fut>(&mut self, mut operation: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let source = match err {
            CallError::Transport(source) if is_unauthorized(&source) => source,
            other => return Err(other),
        };

        if self.state != AuthState::NotAttempted {
            self.state = AuthState::Failed;
            return Err(self.failed(source));
        }

        self.state = AuthState::Retried;
        tracing::info!(server = %self.server, error = %source, "authorization failed, re-registering and retrying once");
        self.reregister().await?;

        match operation().await {
            Ok(value) => Ok(value),
            Err(err) => {
                self.state = AuthState::Failed;
                let source = match err {
                    CallError::Transport(source) => source,
                    other => McpClientError::Transport {
                        server: self.server.to_string(),
                        message: other.to_string(),
                    },
                };
                Err(self.failed(source))
            }
        }
    }

    async fn reregister(&self) -> Result<(), CallError> {
        let definition = self.runtime.definition(self.server).await.ok_or_else(|| {
            McpClientError::UnknownServer {
                server: self.server.to_string(),
            }
        })?;
        self.runtime.register_definition(definition).await;
        Ok(())
    }

    fn failed(&self, source: McpClientError) -> CallError {
        CallError::AuthFailed {
            server: self.server.to_string(),
            source,
        }
    }
}
