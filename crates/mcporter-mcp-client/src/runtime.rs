use crate::error::McpClientError;
use crate::session::{McpSession, SessionConnector};
use crate::types::{BackendDefinition, ToolInfo};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// The registry of backends plus their live connections.
#[async_trait]
pub trait ToolRuntime: Send + Sync {
    async fn definition(&self, server: &str) -> Option<BackendDefinition>;

    async fn definitions(&self) -> Vec<BackendDefinition>;

    /// Adds or replaces a definition. Any open connection for that name is
    /// closed first, so the next use connects with the new definition.
    async fn register_definition(&self, definition: BackendDefinition);

    async fn list_tools(&self, server: &str) -> Result<Vec<ToolInfo>, McpClientError>;

    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<Value, McpClientError>;

    /// Closes one backend's connection, or all of them with `None`.
    async fn close(&self, server: Option<&str>);
}

/// One backend's connection. `connecting` is set while a connect is in
/// flight and can be cancelled without taking the session lock; `closes`
/// counts close requests so one arriving just before `connecting` is set
/// is not missed.
#[derive(Default)]
struct SlotState {
    session: Mutex<Option<Arc<dyn McpSession>>>,
    connecting: StdMutex<Option<CancellationToken>>,
    closes: AtomicU64,
}

impl SlotState {
    fn set_connecting(&self, token: Option<CancellationToken>) {
        *self.connecting.lock().unwrap_or_else(PoisonError::into_inner) = token;
    }

    fn abort_connect(&self) -> bool {
        self.closes.fetch_add(1, Ordering::SeqCst);
        match self.connecting.lock().unwrap_or_else(PoisonError::into_inner).take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

type Slot = Arc<SlotState>;

pub struct McpRuntime {
    definitions: RwLock<Vec<BackendDefinition>>,
    slots: Mutex<HashMap<String, Slot>>,
    connector: Arc<dyn SessionConnector>,
}

impl McpRuntime {
    pub fn new(definitions: Vec<BackendDefinition>, connector: Arc<dyn SessionConnector>) -> Self {
        let mut unique: Vec<BackendDefinition> = Vec::with_capacity(definitions.len());
        for definition in definitions {
            match unique.iter_mut().find(|d| d.name == definition.name) {
                Some(existing) => *existing = definition,
                None => unique.push(definition),
            }
        }

        Self {
            definitions: RwLock::new(unique),
            slots: Mutex::new(HashMap::new()),
            connector,
        }
    }

    async fn slot(&self, server: &str) -> Slot {
        self.slots
            .lock()
            .await
            .entry(server.to_string())
            .or_default()
            .clone()
    }

    /// Returns the open session for `server`, connecting if needed. A session
    /// whose server went away is shut down before a new one is opened.
    async fn session(&self, server: &str) -> Result<Arc<dyn McpSession>, McpClientError> {
        let definition =
            self.definition(server)
                .await
                .ok_or_else(|| McpClientError::UnknownServer {
                    server: server.to_string(),
                })?;

        let slot = self.slot(server).await;
        let closes_seen = slot.closes.load(Ordering::SeqCst);
        let mut guard = slot.session.lock().await;

        if let Some(existing) = guard.as_ref() {
            if !existing.is_closed() {
                return Ok(existing.clone());
            }
        }
        if let Some(stale) = guard.take() {
            tracing::debug!(server = %server, "reaping closed MCP session before reconnecting");
            stale.close().await;
        }

        let abort = CancellationToken::new();
        slot.set_connecting(Some(abort.clone()));
        if slot.closes.load(Ordering::SeqCst) != closes_seen {
            abort.cancel();
        }
        let connected = self.connector.connect(&definition, &abort).await;
        slot.set_connecting(None);
        let session = connected?;

        // A close that raced the tail of the handshake still wins.
        if abort.is_cancelled() {
            session.close().await;
            return Err(McpClientError::TransportClosed {
                server: server.to_string(),
            });
        }

        *guard = Some(session.clone());
        Ok(session)
    }

    async fn close_one(&self, server: &str) {
        let slot = self.slots.lock().await.get(server).cloned();
        let Some(slot) = slot else {
            return;
        };

        // A connect in progress holds the slot lock; abort it so this close
        // does not wait out the handshake.
        if slot.abort_connect() {
            tracing::debug!(server = %server, "aborting MCP connect in progress");
        }

        // The slot stays locked until shutdown finishes so a concurrent
        // connect cannot interleave with it.
        let mut guard = slot.session.lock().await;
        if let Some(session) = guard.take() {
            let report = session.close().await;
            tracing::debug!(server = %server, ?report, "closed MCP session");
        }
    }
}

#[async_trait]
impl ToolRuntime for McpRuntime {
    async fn definition(&self, server: &str) -> Option<BackendDefinition> {
        self.definitions
            .read()
            .await
            .iter()
            .find(|d| d.name == server)
            .cloned()
    }

    async fn definitions(&self) -> Vec<BackendDefinition> {
        self.definitions.read().await.clone()
    }

    async fn register_definition(&self, definition: BackendDefinition) {
        self.close_one(&definition.name).await;

        let mut definitions = self.definitions.write().await;
        match definitions.iter_mut().find(|d| d.name == definition.name) {
            Some(existing) => *existing = definition,
            None => definitions.push(definition),
        }
    }

    async fn list_tools(&self, server: &str) -> Result<Vec<ToolInfo>, McpClientError> {
        let session = self.session(server).await?;
        session.list_tools().await
    }

    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<Value, McpClientError> {
        let session = self.session(server).await?;
        session.call_tool(tool, arguments).await
    }

    async fn close(&self, server: Option<&str>) {
        match server {
            Some(server) => self.close_one(server).await,
            None => {
                let names: Vec<String> = self.slots.lock().await.keys().cloned().collect();
                for name in names {
                    self.close_one(&name).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeConnector, FakeSession};
    use crate::types::SourceSpec;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn definition(name: &str) -> BackendDefinition {
        BackendDefinition::stdio(name, "true", Vec::new(), HashMap::new(), SourceSpec::Adhoc)
    }

    #[tokio::test]
    async fn test_unknown_server_is_rejected() {
        let runtime = McpRuntime::new(Vec::new(), Arc::new(FakeConnector::default()));
        let err = runtime.list_tools("nope").await.unwrap_err();
        assert!(matches!(err, McpClientError::UnknownServer { .. }));
    }

    #[tokio::test]
    async fn test_reuses_open_session() {
        let connector = Arc::new(FakeConnector::default());
        let runtime = McpRuntime::new(vec![definition("linear")], connector.clone());

        runtime.list_tools("linear").await.unwrap();
        runtime.call_tool("linear", "list_issues", Value::Null).await.unwrap();

        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_closed_session_is_reaped_before_reconnect() {
        let connector = Arc::new(FakeConnector::default());
        let runtime = McpRuntime::new(vec![definition("linear")], connector.clone());

        runtime.list_tools("linear").await.unwrap();
        let first: Arc<FakeSession> = connector.session(0);
        first.mark_exited();

        runtime.list_tools("linear").await.unwrap();

        assert_eq!(connector.connects(), 2);
        assert_eq!(first.close_count(), 1);
    }

    #[tokio::test]
    async fn test_register_definition_closes_existing_connection() {
        let connector = Arc::new(FakeConnector::default());
        let runtime = McpRuntime::new(vec![definition("linear")], connector.clone());
        runtime.list_tools("linear").await.unwrap();

        let mut replacement = definition("linear");
        replacement.description = Some("re-registered".to_string());
        runtime.register_definition(replacement).await;

        assert_eq!(connector.session(0).close_count(), 1);
        assert_eq!(
            runtime.definition("linear").await.unwrap().description.as_deref(),
            Some("re-registered")
        );
        assert_eq!(runtime.definitions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_close_all_closes_every_open_session() {
        let connector = Arc::new(FakeConnector::default());
        let runtime = McpRuntime::new(vec![definition("a"), definition("b")], connector.clone());
        runtime.list_tools("a").await.unwrap();
        runtime.list_tools("b").await.unwrap();

        runtime.close(None).await;
        runtime.close(None).await;

        assert_eq!(connector.session(0).close_count(), 1);
        assert_eq!(connector.session(1).close_count(), 1);
    }

    /// Connects only once aborted, and then fails.
    #[derive(Default)]
    struct StalledConnector {
        aborted: AtomicBool,
    }

    #[async_trait]
    impl SessionConnector for StalledConnector {
        async fn connect(
            &self,
            definition: &BackendDefinition,
            abort: &CancellationToken,
        ) -> Result<Arc<dyn McpSession>, McpClientError> {
            abort.cancelled().await;
            self.aborted.store(true, Ordering::SeqCst);
            Err(McpClientError::TransportClosed {
                server: definition.name.clone(),
            })
        }
    }

    #[tokio::test]
    async fn test_close_aborts_connect_in_progress() {
        let connector = Arc::new(StalledConnector::default());
        let runtime = Arc::new(McpRuntime::new(vec![definition("slow")], connector.clone()));

        let caller = {
            let runtime = runtime.clone();
            tokio::spawn(async move { runtime.list_tools("slow").await })
        };
        loop {
            let slot = runtime.slots.lock().await.get("slow").cloned();
            if let Some(slot) = slot {
                if slot.connecting.lock().unwrap().is_some() {
                    break;
                }
            }
            tokio::task::yield_now().await;
        }

        tokio::time::timeout(Duration::from_secs(1), runtime.close(None))
            .await
            .expect("close waited for the connect to finish");

        let err = caller.await.unwrap().unwrap_err();
        assert!(matches!(err, McpClientError::TransportClosed { .. }));
        assert!(connector.aborted.load(Ordering::SeqCst));
    }

    #[test]
    fn later_definitions_replace_earlier_ones() {
        let mut second = definition("dup");
        second.description = Some("second".to_string());
        let runtime = McpRuntime::new(
            vec![definition("dup"), second],
            Arc::new(FakeConnector::default()),
        );
        let definitions = runtime.definitions.try_read().unwrap();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].description.as_deref(), Some("second"));
    }
}
