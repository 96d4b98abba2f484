//! JSON-RPC over a child process's stdin/stdout.

use crate::error::McpClientError;
use crate::framing::{ReadBuffer, SharedReadBuffer};
use crate::jsonrpc::{self, Incoming};
use crate::process::SpawnedProcess;
use crate::reaper::{PipeWriter, PumpHandle, Reapable, SharedStdin};
use crate::session::{McpSession, SessionOptions};
use crate::shutdown::{ShutdownReport, TransportLifecycle};
use crate::types::{BackendDefinition, CommandSpec, ToolInfo};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type PendingResponse = oneshot::Sender<Result<Value, McpClientError>>;
type SharedPendingMap = Arc<Mutex<HashMap<u64, PendingResponse>>>;

pub struct StdioSession {
    server: String,
    stdin: SharedStdin,
    pending: SharedPendingMap,
    next_id: AtomicU64,
    cancel: CancellationToken,
    closed: Arc<AtomicBool>,
    lifecycle: Mutex<TransportLifecycle>,
    request_timeout: Duration,
}

impl StdioSession {
    /// Spawns the definition's command and runs the MCP handshake. If the
    /// handshake fails the child is shut down before the error is returned.
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
        let CommandSpec::Stdio {
            command: program,
            args,
            env,
            cwd,
        } = &definition.command
        else {
            return Err(McpClientError::SpawnFailed {
                server: definition.name.clone(),
                message: "definition is not a stdio command".to_string(),
            });
        };
        let server = definition.name.clone();

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| McpClientError::SpawnFailed {
            server: server.clone(),
            message: e.to_string(),
        })?;
        tracing::debug!(server = %server, pid = ?child.id(), command = %program, "spawned MCP server");

        let capture_failed = |stream: &str| McpClientError::SpawnFailed {
            server: server.clone(),
            message: format!("failed to capture {stream}"),
        };
        let stdin = child.stdin.take().ok_or_else(|| capture_failed("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| capture_failed("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| capture_failed("stderr"))?;

        let cancel = abort.child_token();
        let closed = Arc::new(AtomicBool::new(false));
        let pending: SharedPendingMap = Arc::new(Mutex::new(HashMap::new()));
        let read_buffer = ReadBuffer::shared();

        let writer = PipeWriter::from_stdin(format!("{server} stdin"), stdin);
        let stdin = writer.shared();

        let stdout_muted = PumpHandle::mute_flag();
        let stdout_pump = PumpHandle::new(
            format!("{server} stdout"),
            stdout_muted.clone(),
            spawn_stdout_pump(StdoutPump {
                server: server.clone(),
                stdout,
                stdin: stdin.clone(),
                pending: pending.clone(),
                buffer: read_buffer.clone(),
                cancel: cancel.clone(),
                muted: stdout_muted,
                closed: closed.clone(),
            }),
        );

        let stderr_muted = PumpHandle::mute_flag();
        let stderr_pump = PumpHandle::new(
            format!("{server} stderr"),
            stderr_muted.clone(),
            spawn_stderr_pump(server.clone(), stderr, cancel.clone(), stderr_muted),
        );

        let stdio: Vec<Box<dyn Reapable>> = vec![
            Box::new(writer),
            Box::new(stdout_pump),
            Box::new(stderr_pump.clone()),
        ];
        let closed_flag = closed.clone();
        let close_label = server.clone();
        let lifecycle = TransportLifecycle::new(server.clone(), cancel.clone())
            .with_process(Box::new(SpawnedProcess::new(child, stdio)))
            .with_read_buffer(read_buffer)
            .with_side_channel(Box::new(stderr_pump))
            .on_close(move || {
                closed_flag.store(true, Ordering::Release);
                tracing::debug!(server = %close_label, "MCP session closed");
            });

        let session = Self {
            server,
            stdin,
            pending,
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

    pub async fn process_id(&self) -> Option<u32> {
        self.lifecycle.lock().await.process_id()
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

        self.notify("notifications/initialized", None).await
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

        let (id, rx) = self.register_pending().await?;

        if let Err(err) = self.write(&jsonrpc::request(id, method, params)).await {
            self.pending.lock().await.remove(&id);
            return Err(err);
        }

        let response = async {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(self.transport_closed()),
            }
        };
        let bounded = async {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, response).await {
                    Ok(result) => result,
                    Err(_) => Err(McpClientError::Request {
                        server: self.server.clone(),
                        message: format!("'{method}' timed out after {}ms", limit.as_millis()),
                    }),
                },
                None => response.await,
            }
        };

        let result = tokio::select! {
            result = bounded => result,
            _ = self.cancel.cancelled() => Err(self.transport_closed()),
        };

        if result.is_err() {
            self.pending.lock().await.remove(&id);
        }
        result
    }

    async fn register_pending(
        &self,
    ) -> Result<(u64, oneshot::Receiver<Result<Value, McpClientError>>), McpClientError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        let mut pending = self.pending.lock().await;
        pending.insert(id, tx);
        // The stdout pump sets `closed` before it drains `pending`, so an
        // entry added after that drain would never be answered.
        if self.is_closed() {
            pending.remove(&id);
            return Err(self.transport_closed());
        }
        Ok((id, rx))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpClientError> {
        self.write(&jsonrpc::notification(method, params)).await
    }

    async fn write(&self, message: &Value) -> Result<(), McpClientError> {
        write_message(&self.stdin, message)
            .await
            .map_err(|err| match err {
                WriteError::Serialize(message) => McpClientError::Serialization(message),
                WriteError::Closed => self.transport_closed(),
                WriteError::Io(e) => McpClientError::Transport {
                    server: self.server.clone(),
                    message: format!("failed to write to '{}': {e}", self.server),
                },
            })
    }

    fn transport_closed(&self) -> McpClientError {
        McpClientError::TransportClosed {
            server: self.server.clone(),
        }
    }
}

#[async_trait]
impl McpSession for StdioSession {
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
        let report = self.lifecycle.lock().await.shutdown().await;
        if !report.already_closed {
            tracing::debug!(server = %self.server, escalation = ?report.escalation, exited = report.exited, "stdio session shut down");
        }
        report
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

enum WriteError {
    Serialize(String),
    Closed,
    Io(std::io::Error),
}

async fn write_message(stdin: &SharedStdin, message: &Value) -> Result<(), WriteError> {
    let mut payload =
        serde_json::to_vec(message).map_err(|e| WriteError::Serialize(e.to_string()))?;
    payload.push(b'\n');

    let mut guard = stdin.lock().await;
    let stdin = guard.as_mut().ok_or(WriteError::Closed)?;
    stdin.write_all(&payload).await.map_err(WriteError::Io)?;
    stdin.flush().await.map_err(WriteError::Io)
}

struct StdoutPump {
    server: String,
    stdout: ChildStdout,
    stdin: SharedStdin,
    pending: SharedPendingMap,
    buffer: SharedReadBuffer,
    cancel: CancellationToken,
    muted: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

fn spawn_stdout_pump(pump: StdoutPump) -> JoinHandle<()> {
    tokio::spawn(async move {
        let StdoutPump {
            server,
            mut stdout,
            stdin,
            pending,
            buffer,
            cancel,
            muted,
            closed,
        } = pump;
        let mut read_buf = [0u8; 8192];

        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => break,
                read = stdout.read(&mut read_buf) => read,
            };

            let n = match read {
                Ok(0) => {
                    tracing::debug!(server = %server, "MCP server closed stdout");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(server = %server, error = %e, "failed reading MCP stdout");
                    break;
                }
            };

            let messages = {
                let mut buffer = buffer.lock().await;
                buffer.append(&read_buf[..n]);
                std::iter::from_fn(|| buffer.next_message()).collect::<Vec<_>>()
            };

            if !PumpHandle::listening(&muted) {
                continue;
            }

            for bytes in messages {
                let parsed: Value = match serde_json::from_slice(&bytes) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(server = %server, error = %e, "failed to parse MCP message");
                        continue;
                    }
                };
                dispatch(&server, &stdin, &pending, &parsed).await;
            }
        }

        closed.store(true, Ordering::Release);
        fail_all_pending(&pending, &server).await;
    })
}

async fn dispatch(server: &str, stdin: &SharedStdin, pending: &SharedPendingMap, message: &Value) {
    match jsonrpc::classify(message) {
        Some(Incoming::Response { id, result }) => {
            if let Some(tx) = pending.lock().await.remove(&id) {
                let _ = tx.send(result);
            }
        }
        Some(Incoming::Request { id, method }) => {
            tracing::debug!(server = %server, method = %method, "answering server request");
            if write_message(stdin, &jsonrpc::reply_to(id, &method))
                .await
                .is_err()
            {
                tracing::debug!(server = %server, "could not answer server request");
            }
        }
        Some(Incoming::Notification) | None => {}
    }
}

fn spawn_stderr_pump(
    server: String,
    stderr: ChildStderr,
    cancel: CancellationToken,
    muted: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) => {
                    if PumpHandle::listening(&muted) {
                        tracing::debug!(server = %server, "mcp stderr: {}", line);
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
    })
}

async fn fail_all_pending(pending: &SharedPendingMap, server: &str) {
    let drained = std::mem::take(&mut *pending.lock().await);

    for (_, tx) in drained {
        let _ = tx.send(Err(McpClientError::TransportClosed {
            server: server.to_string(),
        }));
    }
}
