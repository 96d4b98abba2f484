//! Escalating shutdown of one connection.
//!
//! Closing a process-backed connection must release every descriptor and
//! reap the child even when it ignores the first request to exit (npx and
//! other wrapper scripts often do). The sequence is:
//!
//! 1. cancel in-flight I/O, clear partial reads, drop the stderr side channel
//! 2. close the child's stdio and wait [`GRACEFUL_EXIT_WAIT`]
//! 3. SIGTERM, wait [`TERM_EXIT_WAIT`]
//! 4. SIGKILL, wait [`KILL_EXIT_WAIT`]
//! 5. sweep stdio again, drop the process, notify
//!
//! Nothing here returns an error; the sequence always reaches `Closed`.

use crate::framing::SharedReadBuffer;
use crate::process::{ManagedProcess, TerminationSignal};
use crate::reaper::{reap, reap_slot, Reapable};
use crate::waiter::{wait_for_exit, WaitOutcome};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const GRACEFUL_EXIT_WAIT: Duration = Duration::from_millis(700);
pub const TERM_EXIT_WAIT: Duration = Duration::from_millis(700);
pub const KILL_EXIT_WAIT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitWait {
    Graceful,
    AfterTerm,
    AfterKill,
}

impl ExitWait {
    pub fn limit(self) -> Duration {
        match self {
            ExitWait::Graceful => GRACEFUL_EXIT_WAIT,
            ExitWait::AfterTerm => TERM_EXIT_WAIT,
            ExitWait::AfterKill => KILL_EXIT_WAIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Open,
    Aborting,
    WaitingExit(ExitWait),
    SignalingTerm,
    SignalingKill,
    Closed,
}

/// How far the sequence had to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// No process, or it exited once its stdio was closed.
    None,
    Terminated,
    Killed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub escalation: Escalation,
    /// Whether the child was seen to exit. Always true without a process.
    pub exited: bool,
    /// The connection was already closed; nothing was done.
    pub already_closed: bool,
}

type OnClose = Box<dyn FnOnce() + Send>;

/// Teardown state for one connection.
pub struct TransportLifecycle {
    server: String,
    phase: ShutdownPhase,
    cancel: CancellationToken,
    read_buffer: Option<SharedReadBuffer>,
    side_channel: Option<Box<dyn Reapable>>,
    process: Option<Box<dyn ManagedProcess>>,
    on_close: Option<OnClose>,
}

impl TransportLifecycle {
    pub fn new(server: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            server: server.into(),
            phase: ShutdownPhase::Open,
            cancel,
            read_buffer: None,
            side_channel: None,
            process: None,
            on_close: None,
        }
    }

    pub fn with_process(mut self, process: Box<dyn ManagedProcess>) -> Self {
        self.process = Some(process);
        self
    }

    pub fn with_read_buffer(mut self, buffer: SharedReadBuffer) -> Self {
        self.read_buffer = Some(buffer);
        self
    }

    pub fn with_side_channel(mut self, stream: Box<dyn Reapable>) -> Self {
        self.side_channel = Some(stream);
        self
    }

    pub fn on_close(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(callback));
        self
    }

    pub fn phase(&self) -> ShutdownPhase {
        self.phase
    }

    pub fn is_closed(&self) -> bool {
        self.phase == ShutdownPhase::Closed
    }

    pub fn process_id(&self) -> Option<u32> {
        self.process.as_ref().and_then(|process| process.id())
    }

    /// Runs the shutdown sequence. Calling it again after it finished is a
    /// no-op.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        if self.phase != ShutdownPhase::Open {
            return ShutdownReport {
                escalation: Escalation::None,
                exited: true,
                already_closed: true,
            };
        }

        self.enter(ShutdownPhase::Aborting);
        self.cancel.cancel();
        if let Some(buffer) = self.read_buffer.take() {
            buffer.lock().await.clear();
        }
        reap_slot(&mut self.side_channel).await;

        let Some(mut process) = self.process.take() else {
            self.finish();
            return ShutdownReport {
                escalation: Escalation::None,
                exited: true,
                already_closed: false,
            };
        };

        sweep_stdio(process.as_mut()).await;

        let mut escalation = Escalation::None;
        let mut exited = self.wait(process.as_mut(), ExitWait::Graceful).await;

        if !exited {
            self.enter(ShutdownPhase::SignalingTerm);
            if let Err(e) = process.signal(TerminationSignal::Terminate) {
                tracing::debug!(server = %self.server, error = %e, "SIGTERM not delivered");
            }
            escalation = Escalation::Terminated;
            exited = self.wait(process.as_mut(), ExitWait::AfterTerm).await;
        }

        if !exited {
            self.enter(ShutdownPhase::SignalingKill);
            if let Err(e) = process.signal(TerminationSignal::Kill) {
                tracing::debug!(server = %self.server, error = %e, "SIGKILL not delivered");
            }
            escalation = Escalation::Killed;
            exited = self.wait(process.as_mut(), ExitWait::AfterKill).await;
            if !exited {
                tracing::warn!(
                    server = %self.server,
                    pid = ?process.id(),
                    "MCP server did not exit after SIGKILL"
                );
            }
        }

        // The stdio set may have changed while we were waiting.
        sweep_stdio(process.as_mut()).await;
        drop(process);

        self.finish();
        ShutdownReport {
            escalation,
            exited,
            already_closed: false,
        }
    }

    async fn wait(&mut self, process: &mut dyn ManagedProcess, stage: ExitWait) -> bool {
        self.enter(ShutdownPhase::WaitingExit(stage));
        let outcome = wait_for_exit(Some(process), Some(stage.limit())).await;
        if outcome == WaitOutcome::TimedOut {
            tracing::debug!(server = %self.server, ?stage, "child still running");
        }
        outcome.exited()
    }

    fn enter(&mut self, phase: ShutdownPhase) {
        tracing::trace!(server = %self.server, from = ?self.phase, to = ?phase, "shutdown transition");
        self.phase = phase;
    }

    fn finish(&mut self) {
        self.enter(ShutdownPhase::Closed);
        if let Some(callback) = self.on_close.take() {
            callback();
        }
    }
}

async fn sweep_stdio(process: &mut dyn ManagedProcess) {
    for stream in process.stdio_mut().iter_mut() {
        reap(Some(stream.as_mut())).await;
    }
}
