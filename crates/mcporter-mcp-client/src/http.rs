//! JSON-RPC over HTTP POST (streamable HTTP / SSE responses).

use crate::error::McpClientError;
use crate::jsonrpc::{self, Incoming};
use crate::session::{McpSession, SessionOptions};
use crate::shutdown::{ShutdownReport, TransportLifecycle};
use crate::types::{BackendDefinition, CommandSpec, ToolInfo};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

const SESSION_ID_HEADER: &str = "mcp-session-id";
const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

pub struct HttpSession {
    server: String,
    url: String,
    client: reqwest::Client,
    headers: HeaderMap,
    session_id: StdMutex<Option<String>>,
    next_id: AtomicU64,
    cancel: CancellationToken,
    closed: Arc<AtomicBool>,
    lifecycle: Mutex<TransportLifecycle>,
    request_timeout: Duration,
}

impl HttpSession {
    pub async fn connect(
        definition: &BackendDefinition,
        options: &SessionOptions,
    ) -> Result<Self, McpClientError> {
        Self::connect_until(definition, options, &CancellationToken::new()).await
    }

    /// Like [`Self::connect`], but cancelling `abort` fails an unfinished
    /// handshake and shuts the half-open session down.
    pub async fn connect_until(
        definition: &BackendDefinition,
        options: &SessionOptions,
        abort: &CancellationToken,
    ) -> Result<Self, McpClientError> {
        let CommandSpec::Http { url, headers } = &definition.command else {
            return Err(McpClientError::Request {
                server: definition.name.clone(),
                message: "definition is not an HTTP endpoint".to_string(),
            });
        };
        let server = definition.name.clone();

        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                McpClientError::Request {
                    server: server.clone(),
                    message: format!("invalid header name '{name}': {e}"),
                }
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| McpClientError::Request {
                server: server.clone(),
                message: format!("invalid value for header '{name}': {e}"),
            })?;
            header_map.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .user_agent(format!("{}/{}", options.client_name, options.client_version))
            .build()
            .map_err(|e| McpClientError::Request {
                server: server.clone(),
                message: e.to_string(),
            })?;

        let cancel = abort.child_token();
        let closed = Arc::new(AtomicBool::new(false));
        let closed_flag = closed.clone();
        let lifecycle = TransportLifecycle::new(server.clone(), cancel.clone()).on_close(move || {
            closed_flag.store(true, Ordering::Release);
        });

        let session = Self {
            server,
            url: url.clone(),
            client,
            headers: header_map,
            session_id: StdMutex::new(None),
            next_id: AtomicU64::new(1),
            cancel,
            closed,
            lifecycle: Mutex::new(lifecycle),
            request_timeout: options.request_timeout,
        };

        if let Err(err) = session.initialize(options).await {
            session.close().await;
            return Err(err);
        }

        Ok(session)
    }

    async fn initialize(&self, options: &SessionOptions) -> Result<(), McpClientError> {
        let params = jsonrpc::initialize_params(&options.client_name, &options.client_version);
        let result = self
            .request("initialize", Some(params), Some(self.request_timeout))
            .await?;

        if result.get("protocolVersion").is_none() {
            return Err(McpClientError::InvalidResponse(
                "initialize response missing protocolVersion".to_string(),
            ));
        }

        self.post(&jsonrpc::notification("notifications/initialized", None), Some(self.request_timeout))
            .await
            .map(|_| ())
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, McpClientError> {
        if self.is_closed() {
            return Err(self.transport_closed());
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let messages = self.post(&jsonrpc::request(id, method, params), timeout).await?;

        for message in &messages {
            if let Some(Incoming::Response { id: got, result }) = jsonrpc::classify(message) {
                if got == id {
                    return result;
                }
            }
        }

        Err(McpClientError::InvalidResponse(format!(
            "no response to '{method}' from '{}'",
            self.server
        )))
    }

    /// POSTs one message and returns whatever JSON-RPC messages came back.
    async fn post(
        &self,
        message: &Value,
        timeout: Option<Duration>,
    ) -> Result<Vec<Value>, McpClientError> {
        let mut request = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .header(PROTOCOL_VERSION_HEADER, jsonrpc::PROTOCOL_VERSION)
            .json(message);
        if let Some(session_id) = self.current_session_id() {
            request = request.header(SESSION_ID_HEADER, session_id);
        }
        if let Some(limit) = timeout {
            request = request.timeout(limit);
        }

        let exchange = async {
            let response = request.send().await.map_err(|e| self.request_error(e))?;
            let status = response.status();

            if let Some(session_id) = response
                .headers()
                .get(SESSION_ID_HEADER)
                .and_then(|value| value.to_str().ok())
            {
                self.remember_session_id(session_id);
            }

            let is_sse = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .is_some_and(|value| value.contains("text/event-stream"));
            let body = response.text().await.map_err(|e| self.request_error(e))?;

            if !status.is_success() {
                return Err(McpClientError::Http {
                    status: status.as_u16(),
                    body,
                });
            }

            decode_body(&body, is_sse)
        };

        tokio::select! {
            result = exchange => result,
            _ = self.cancel.cancelled() => Err(self.transport_closed()),
        }
    }

    fn current_session_id(&self) -> Option<String> {
        self.session_id.lock().ok().and_then(|guard| guard.clone())
    }

    fn remember_session_id(&self, session_id: &str) {
        if let Ok(mut guard) = self.session_id.lock() {
            *guard = Some(session_id.to_string());
        }
    }

    fn request_error(&self, err: reqwest::Error) -> McpClientError {
        McpClientError::Request {
            server: self.server.clone(),
            message: err.to_string(),
        }
    }

    fn transport_closed(&self) -> McpClientError {
        McpClientError::TransportClosed {
            server: self.server.clone(),
        }
    }
}

fn decode_body(body: &str, is_sse: bool) -> Result<Vec<Value>, McpClientError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    if is_sse {
        return Ok(jsonrpc::sse_messages(body));
    }

    match serde_json::from_str::<Value>(body).map_err(|e| McpClientError::Parse(e.to_string()))? {
        Value::Array(batch) => Ok(batch),
        single => Ok(vec![single]),
    }
}

#[async_trait]
impl McpSession for HttpSession {
    fn server_name(&self) -> &str {
        &self.server
    }

    async fn list_tools(&self) -> Result<Vec<ToolInfo>, McpClientError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = match &cursor {
                Some(cursor) => json!({"cursor": cursor}),
                None => json!({}),
            };
            let result = self
                .request("tools/list", Some(params), Some(self.request_timeout))
                .await?;
            let (page, next) = jsonrpc::tools_page(&result)?;
            tools.extend(page);

            cursor = next;
            if cursor.is_none() {
                break;
            }
        }

        Ok(tools)
    }

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, McpClientError> {
        self.request("tools/call", Some(jsonrpc::call_params(tool, arguments)), None)
            .await
    }

    async fn close(&self) -> ShutdownReport {
        self.lifecycle.lock().await.shutdown().await
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_json_and_batches() {
        let single = decode_body(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#, false).unwrap();
        assert_eq!(single.len(), 1);

        let batch = decode_body(r#"[{"id":1,"result":{}},{"id":2,"result":{}}]"#, false).unwrap();
        assert_eq!(batch.len(), 2);

        assert!(decode_body("  ", false).unwrap().is_empty());
        assert!(matches!(
            decode_body("<html>", false),
            Err(McpClientError::Parse(_))
        ));
    }

    #[test]
    fn decodes_event_stream() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":3,\"result\":{\"tools\":[]}}\n\n";
        let messages = decode_body(body, true).unwrap();
        assert_eq!(messages[0]["id"], 3);
    }

    #[test]
    fn unauthorized_status_renders_like_sse_client() {
        let err = McpClientError::Http {
            status: 401,
            body: String::new(),
        };
        assert_eq!(err.to_string(), "HTTP error: Non-200 status code (401)");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_connect_and_is_closed() {
        let definition = BackendDefinition::http(
            "remote",
            "http://127.0.0.1:9/mcp",
            crate::types::SourceSpec::Adhoc,
        );
        let options = SessionOptions {
            request_timeout: Duration::from_secs(2),
            ..SessionOptions::default()
        };
        let err = HttpSession::connect(&definition, &options).await.err().unwrap();
        assert!(matches!(err, McpClientError::Request { .. }));
    }
}
