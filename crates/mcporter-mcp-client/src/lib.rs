//! MCP client runtime for mcporter.
//!
//! Sessions speak JSON-RPC to stdio or HTTP backends; [`McpRuntime`] keeps at
//! most one live session per backend; [`ToolInvoker`] runs a tool call with a
//! deadline and the auth/name recovery steps. Process-backed sessions are torn
//! down through [`TransportLifecycle`].

mod auth;
mod correction;
mod error;
mod framing;
mod http;
mod invoke;
mod jsonrpc;
mod process;
mod reaper;
mod runtime;
mod session;
mod shutdown;
mod stdio;
mod types;
mod waiter;

#[cfg(test)]
mod testing;

pub use auth::{is_unauthorized, AuthRetrier, AuthState};
pub use correction::{
    closest_tool, is_tool_not_found, levenshtein_distance, suggest_correction, Correction,
};
pub use error::{CallError, McpClientError};
pub use framing::{ReadBuffer, SharedReadBuffer};
pub use http::HttpSession;
pub use invoke::{CallOutcome, RetryState, ToolInvoker, DEFAULT_CALL_TIMEOUT};
pub use process::{ManagedProcess, SpawnedProcess, TerminationSignal};
pub use reaper::{reap, reap_slot, PipeWriter, PumpHandle, Reapable, SharedStdin};
pub use runtime::{McpRuntime, ToolRuntime};
pub use session::{DefaultConnector, McpSession, SessionConnector, SessionOptions};
pub use shutdown::{
    Escalation, ExitWait, ShutdownPhase, ShutdownReport, TransportLifecycle, GRACEFUL_EXIT_WAIT,
    KILL_EXIT_WAIT, TERM_EXIT_WAIT,
};
pub use stdio::StdioSession;
pub use types::{BackendDefinition, CallResult, CommandSpec, SourceSpec, ToolInfo};
pub use waiter::{wait_for_exit, WaitOutcome};
