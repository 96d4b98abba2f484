//! Fakes shared by the unit tests in this crate.

use crate::error::McpClientError;
use crate::process::{ManagedProcess, TerminationSignal};
use crate::reaper::Reapable;
use crate::runtime::ToolRuntime;
use crate::session::{McpSession, SessionConnector};
use crate::shutdown::{Escalation, ShutdownReport};
use crate::types::{BackendDefinition, SourceSpec, ToolInfo};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

/// Process whose exit is driven by a watch channel and which records every
/// signal it receives.
pub(crate) struct FakeProcess {
    pub exited: watch::Receiver<bool>,
    pub exit_tx: Arc<watch::Sender<bool>>,
    pub exit_on: Vec<TerminationSignal>,
    pub signals: Arc<Mutex<Vec<TerminationSignal>>>,
    pub stdio: Vec<Box<dyn Reapable>>,
    pub wait_error: bool,
}

impl FakeProcess {
    pub(crate) fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            exited: rx,
            exit_tx: Arc::new(tx),
            exit_on: Vec::new(),
            signals: Arc::new(Mutex::new(Vec::new())),
            stdio: Vec::new(),
            wait_error: false,
        }
    }

    /// Exit as soon as one of `signals` arrives.
    pub(crate) fn exiting_on(mut self, signals: &[TerminationSignal]) -> Self {
        self.exit_on = signals.to_vec();
        self
    }

    pub(crate) fn with_stdio(mut self, stdio: Vec<Box<dyn Reapable>>) -> Self {
        self.stdio = stdio;
        self
    }
}

#[async_trait]
impl ManagedProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(4242)
    }

    fn has_exited(&mut self) -> bool {
        *self.exited.borrow()
    }

    async fn wait(&mut self) -> io::Result<()> {
        if self.wait_error {
            return Err(io::Error::new(io::ErrorKind::Other, "wait failed"));
        }
        loop {
            let done = *self.exited.borrow_and_update();
            if done {
                return Ok(());
            }
            if self.exited.changed().await.is_err() {
                return Err(io::Error::new(io::ErrorKind::Other, "exit sender dropped"));
            }
        }
    }

    fn signal(&mut self, signal: TerminationSignal) -> io::Result<()> {
        if *self.exited.borrow() {
            return Err(io::Error::new(io::ErrorKind::Other, "already exited"));
        }
        self.signals.lock().unwrap().push(signal);
        if self.exit_on.contains(&signal) {
            let _ = self.exit_tx.send(true);
        }
        Ok(())
    }

    fn stdio_mut(&mut self) -> &mut Vec<Box<dyn Reapable>> {
        &mut self.stdio
    }
}

/// Stream that counts how many times it was destroyed.
pub(crate) struct CountingStream {
    pub destroyed: Arc<Mutex<usize>>,
    /// Exit the paired process when destroyed, like a child that quits on
    /// stdin EOF.
    pub exit_tx: Option<Arc<watch::Sender<bool>>>,
}

impl CountingStream {
    pub(crate) fn new(destroyed: Arc<Mutex<usize>>) -> Self {
        Self {
            destroyed,
            exit_tx: None,
        }
    }
}

#[async_trait]
impl Reapable for CountingStream {
    async fn destroy(&mut self) -> io::Result<()> {
        *self.destroyed.lock().unwrap() += 1;
        if let Some(tx) = &self.exit_tx {
            let _ = tx.send(true);
        }
        Ok(())
    }
}

/// Session that answers every request and counts closes.
pub(crate) struct FakeSession {
    name: String,
    closed: AtomicBool,
    closes: AtomicUsize,
}

impl FakeSession {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            closed: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
        }
    }

    /// Simulates the server process going away on its own.
    pub(crate) fn mark_exited(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl McpSession for FakeSession {
    fn server_name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolInfo>, McpClientError> {
        Ok(vec![ToolInfo::named("list_issues")])
    }

    async fn call_tool(&self, tool: &str, _arguments: Value) -> Result<Value, McpClientError> {
        Ok(json!({"content": [{"type": "text", "text": tool}]}))
    }

    async fn close(&self) -> ShutdownReport {
        self.closes.fetch_add(1, Ordering::SeqCst);
        let already_closed = self.closed.swap(true, Ordering::SeqCst);
        ShutdownReport {
            escalation: Escalation::None,
            exited: true,
            already_closed,
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub(crate) struct FakeConnector {
    sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeConnector {
    pub(crate) fn connects(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub(crate) fn session(&self, index: usize) -> Arc<FakeSession> {
        self.sessions.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(
        &self,
        definition: &BackendDefinition,
        _abort: &CancellationToken,
    ) -> Result<Arc<dyn McpSession>, McpClientError> {
        let session = Arc::new(FakeSession::new(&definition.name));
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }
}

/// Runtime with scripted results that records everything done to it.
///
/// Queued results are consumed in order; once a queue is empty, listings
/// return no tools and calls return an empty result.
pub(crate) struct MockRuntime {
    definitions: Mutex<Vec<BackendDefinition>>,
    list_results: Mutex<VecDeque<Result<Vec<ToolInfo>, McpClientError>>>,
    call_results: Mutex<VecDeque<Result<Value, McpClientError>>>,
    call_delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
    registered: Mutex<Vec<String>>,
    closed: Mutex<Vec<Option<String>>>,
    close_notify: Arc<Notify>,
}

impl MockRuntime {
    pub(crate) fn with_servers(names: &[&str]) -> Self {
        let definitions = names
            .iter()
            .map(|name| {
                BackendDefinition::stdio(*name, "true", Vec::new(), HashMap::new(), SourceSpec::Adhoc)
            })
            .collect();
        Self {
            definitions: Mutex::new(definitions),
            list_results: Mutex::new(VecDeque::new()),
            call_results: Mutex::new(VecDeque::new()),
            call_delay: None,
            calls: Mutex::new(Vec::new()),
            registered: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
            close_notify: Arc::new(Notify::new()),
        }
    }

    pub(crate) fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = Some(delay);
        self
    }

    pub(crate) fn push_list(&self, result: Result<Vec<ToolInfo>, McpClientError>) {
        self.list_results.lock().unwrap().push_back(result);
    }

    pub(crate) fn push_call(&self, result: Result<Value, McpClientError>) {
        self.call_results.lock().unwrap().push_back(result);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn registered(&self) -> Vec<String> {
        self.registered.lock().unwrap().clone()
    }

    pub(crate) fn closed(&self) -> Vec<Option<String>> {
        self.closed.lock().unwrap().clone()
    }

    pub(crate) fn close_notify(&self) -> Arc<Notify> {
        self.close_notify.clone()
    }
}

#[async_trait]
impl ToolRuntime for MockRuntime {
    async fn definition(&self, server: &str) -> Option<BackendDefinition> {
        self.definitions
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.name == server)
            .cloned()
    }

    async fn definitions(&self) -> Vec<BackendDefinition> {
        self.definitions.lock().unwrap().clone()
    }

    async fn register_definition(&self, definition: BackendDefinition) {
        self.registered.lock().unwrap().push(definition.name);
    }

    async fn list_tools(&self, _server: &str) -> Result<Vec<ToolInfo>, McpClientError> {
        let next = self.list_results.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn call_tool(
        &self,
        _server: &str,
        tool: &str,
        _arguments: Value,
    ) -> Result<Value, McpClientError> {
        self.calls.lock().unwrap().push(tool.to_string());
        if let Some(delay) = self.call_delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.call_results.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(json!({"content": []})))
    }

    async fn close(&self, server: Option<&str>) {
        self.closed.lock().unwrap().push(server.map(str::to_string));
        self.close_notify.notify_one();
    }
}
