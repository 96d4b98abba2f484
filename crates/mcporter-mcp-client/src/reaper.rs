//! Best-effort teardown of child stdio handles.
//!
//! A handle may support only some teardown steps, and some may fail because
//! the other end is already gone. Every step is attempted regardless of how
//! the previous one went.

use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// A stream-like handle owned by a connection.
///
/// All steps default to no-ops so handles implement only what they support.
#[async_trait]
pub trait Reapable: Send {
    /// Stop delivering data to whoever is observing the stream.
    async fn remove_listeners(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Stop the flow of data and release the underlying descriptor.
    async fn destroy(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Signal end-of-write.
    async fn end(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Drop any remaining reference that would keep a task or descriptor alive.
    async fn unref(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn label(&self) -> &str {
        "stream"
    }
}

/// Runs every teardown step on `stream`. `None` is a no-op.
pub async fn reap(stream: Option<&mut (dyn Reapable + '_)>) {
    let Some(stream) = stream else {
        return;
    };

    let result = stream.remove_listeners().await;
    log_step(stream.label(), "remove_listeners", result);
    let result = stream.destroy().await;
    log_step(stream.label(), "destroy", result);
    let result = stream.end().await;
    log_step(stream.label(), "end", result);
    let result = stream.unref().await;
    log_step(stream.label(), "unref", result);
}

/// Reaps and drops whatever is stored in `slot`.
pub async fn reap_slot(slot: &mut Option<Box<dyn Reapable>>) {
    if let Some(mut stream) = slot.take() {
        reap(Some(stream.as_mut())).await;
    }
}

fn log_step(label: &str, step: &str, result: io::Result<()>) {
    if let Err(e) = result {
        tracing::debug!(stream = label, step, error = %e, "ignoring stream teardown failure");
    }
}

/// Child stdin shared between the JSON-RPC writer and the lifecycle manager.
pub type SharedStdin = Arc<Mutex<Option<ChildStdin>>>;

/// Write half of a child's stdio.
pub struct PipeWriter {
    label: String,
    inner: SharedStdin,
}

impl PipeWriter {
    pub fn new(label: impl Into<String>, inner: SharedStdin) -> Self {
        Self {
            label: label.into(),
            inner,
        }
    }

    pub fn from_stdin(label: impl Into<String>, stdin: ChildStdin) -> Self {
        Self::new(label, Arc::new(Mutex::new(Some(stdin))))
    }

    pub fn shared(&self) -> SharedStdin {
        self.inner.clone()
    }
}

#[async_trait]
impl Reapable for PipeWriter {
    async fn destroy(&mut self) -> io::Result<()> {
        // Dropping the handle closes the descriptor; the child sees EOF.
        let stdin = self.inner.lock().await.take();
        drop(stdin);
        Ok(())
    }

    async fn end(&mut self) -> io::Result<()> {
        let mut guard = self.inner.lock().await;
        match guard.as_mut() {
            Some(stdin) => stdin.shutdown().await,
            None => Ok(()),
        }
    }

    fn label(&self) -> &str {
        &self.label
    }
}

/// A background task that owns the read half of a pipe (stdout or stderr).
///
/// Clones share the same task, so the handle can sit both in a process's
/// stdio set and in a transport's side-channel slot.
#[derive(Clone)]
pub struct PumpHandle {
    label: String,
    muted: Arc<AtomicBool>,
    task: Arc<StdMutex<Option<JoinHandle<()>>>>,
}

impl PumpHandle {
    /// Wraps a spawned pump. The pump should check [`PumpHandle::listening`]
    /// before delivering anything it reads.
    pub fn new(label: impl Into<String>, muted: Arc<AtomicBool>, task: JoinHandle<()>) -> Self {
        Self {
            label: label.into(),
            muted,
            task: Arc::new(StdMutex::new(Some(task))),
        }
    }

    pub fn mute_flag() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    pub fn listening(flag: &AtomicBool) -> bool {
        !flag.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        match self.task.lock() {
            Ok(guard) => guard.as_ref().map_or(true, JoinHandle::is_finished),
            Err(_) => true,
        }
    }

    fn with_task<T>(&self, f: impl FnOnce(&mut Option<JoinHandle<()>>) -> T) -> io::Result<T> {
        let mut guard = self
            .task
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "pump handle lock poisoned"))?;
        Ok(f(&mut guard))
    }
}

#[async_trait]
impl Reapable for PumpHandle {
    async fn remove_listeners(&mut self) -> io::Result<()> {
        self.muted.store(true, Ordering::Release);
        Ok(())
    }

    async fn destroy(&mut self) -> io::Result<()> {
        // Aborting drops the pipe the task owns, releasing the descriptor.
        self.with_task(|task| {
            if let Some(task) = task.as_ref() {
                task.abort();
            }
        })
    }

    async fn unref(&mut self) -> io::Result<()> {
        self.with_task(|task| drop(task.take()))
    }

    fn label(&self) -> &str {
        &self.label
    }
}
