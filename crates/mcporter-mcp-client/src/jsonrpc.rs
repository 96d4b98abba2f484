//! JSON-RPC message helpers shared by the stdio and HTTP sessions.

use crate::error::McpClientError;
use crate::types::ToolInfo;
use serde_json::{json, Value};

pub const PROTOCOL_VERSION: &str = "2025-06-18";

pub fn request(id: u64, method: &str, params: Option<Value>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params.unwrap_or_else(|| json!({}))
    })
}

pub fn notification(method: &str, params: Option<Value>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params.unwrap_or_else(|| json!({}))
    })
}

pub fn initialize_params(client_name: &str, client_version: &str) -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {"name": client_name, "version": client_version}
    })
}

/// A message read from the server.
#[derive(Debug)]
pub enum Incoming {
    Response {
        id: u64,
        result: Result<Value, McpClientError>,
    },
    /// A server-initiated request that expects an answer.
    Request { id: Value, method: String },
    Notification,
}

pub fn classify(message: &Value) -> Option<Incoming> {
    if let Some(method) = message.get("method").and_then(Value::as_str) {
        return Some(match message.get("id") {
            Some(id) if !id.is_null() => Incoming::Request {
                id: id.clone(),
                method: method.to_string(),
            },
            _ => Incoming::Notification,
        });
    }

    let id = message.get("id")?.as_u64()?;

    if let Some(error) = message.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32000);
        let text = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Some(Incoming::Response {
            id,
            result: Err(McpClientError::ProtocolError {
                code,
                message: text,
            }),
        });
    }

    let result = message
        .get("result")
        .cloned()
        .ok_or_else(|| McpClientError::InvalidResponse("response missing result".to_string()));
    Some(Incoming::Response { id, result })
}

/// Answer to a server-initiated request. Only `ping` is supported.
pub fn reply_to(id: Value, method: &str) -> Value {
    if method == "ping" {
        return json!({"jsonrpc": "2.0", "id": id, "result": {}});
    }
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": -32601, "message": format!("Method not found: {method}")}
    })
}

/// Parses one page of `tools/list`.
pub fn tools_page(result: &Value) -> Result<(Vec<ToolInfo>, Option<String>), McpClientError> {
    let tools = result
        .get("tools")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            McpClientError::InvalidResponse("tools/list response missing tools".to_string())
        })?;

    let tools = tools
        .iter()
        .map(|tool| {
            serde_json::from_value::<ToolInfo>(tool.clone())
                .map_err(|e| McpClientError::InvalidResponse(format!("invalid tool entry: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let cursor = result
        .get("nextCursor")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok((tools, cursor))
}

pub fn call_params(tool: &str, arguments: Value) -> Value {
    json!({"name": tool, "arguments": arguments})
}

/// Extracts the JSON payloads of a `text/event-stream` body.
pub fn sse_messages(body: &str) -> Vec<Value> {
    let mut messages = Vec::new();
    let mut data = String::new();

    for line in body.lines().chain(std::iter::once("")) {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            if !data.is_empty() {
                match serde_json::from_str::<Value>(&data) {
                    Ok(value) => messages.push(value),
                    Err(e) => tracing::debug!(error = %e, "skipping non-JSON SSE event"),
                }
                data.clear();
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }

    messages
}
