use crate::reaper::Reapable;
use async_trait::async_trait;
use std::io;
use tokio::process::Child;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    /// SIGTERM: ask the process to exit.
    Terminate,
    /// SIGKILL: force it.
    Kill,
}

/// A child process as seen by the lifecycle manager.
#[async_trait]
pub trait ManagedProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Whether the process has exited and been reaped.
    fn has_exited(&mut self) -> bool;

    /// Waits for the process to exit.
    async fn wait(&mut self) -> io::Result<()>;

    /// Sends a termination signal. Fails once the process has been reaped.
    fn signal(&mut self, signal: TerminationSignal) -> io::Result<()>;

    /// The process's current stdio set.
    fn stdio_mut(&mut self) -> &mut Vec<Box<dyn Reapable>>;
}

/// A child spawned through `tokio::process`.
pub struct SpawnedProcess {
    child: Child,
    exited: bool,
    stdio: Vec<Box<dyn Reapable>>,
}

impl SpawnedProcess {
    pub fn new(child: Child, stdio: Vec<Box<dyn Reapable>>) -> Self {
        Self {
            child,
            exited: false,
            stdio,
        }
    }

    fn refresh(&mut self) -> bool {
        if !self.exited {
            self.exited = matches!(self.child.try_wait(), Ok(Some(_)));
        }
        self.exited
    }
}

#[async_trait]
impl ManagedProcess for SpawnedProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn has_exited(&mut self) -> bool {
        self.refresh()
    }

    async fn wait(&mut self) -> io::Result<()> {
        if self.exited {
            return Ok(());
        }
        self.child.wait().await?;
        self.exited = true;
        Ok(())
    }

    fn signal(&mut self, signal: TerminationSignal) -> io::Result<()> {
        if self.refresh() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "process has already exited",
            ));
        }

        match signal {
            TerminationSignal::Kill => self.child.start_kill(),
            TerminationSignal::Terminate => send_terminate(&mut self.child),
        }
    }

    fn stdio_mut(&mut self) -> &mut Vec<Box<dyn Reapable>> {
        &mut self.stdio
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) -> io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = child
        .id()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "process has no pid"))?;
    let pid = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;

    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    fn spawn(script: &str) -> SpawnedProcess {
        let child = Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        SpawnedProcess::new(child, Vec::new())
    }

    #[tokio::test]
    async fn test_terminate_stops_cooperative_child() {
        let mut process = spawn("exec sleep 30");
        assert!(!process.has_exited());

        process.signal(TerminationSignal::Terminate).unwrap();
        process.wait().await.unwrap();
        assert!(process.has_exited());
    }

    #[tokio::test]
    async fn test_reaped_process_is_never_signaled() {
        let mut process = spawn("exit 0");
        process.wait().await.unwrap();

        assert!(process.signal(TerminationSignal::Terminate).is_err());
        assert!(process.signal(TerminationSignal::Kill).is_err());
    }
}
