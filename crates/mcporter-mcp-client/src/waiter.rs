use crate::process::ManagedProcess;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// There was no process to wait for.
    Absent,
    Exited,
    /// Waiting failed; the process is treated as gone.
    Errored,
    TimedOut,
}

impl WaitOutcome {
    pub fn exited(self) -> bool {
        !matches!(self, WaitOutcome::TimedOut)
    }
}

/// Waits for `process` to exit, for at most `timeout`.
///
/// A missing or zero timeout waits until the process reports exit. The timer
/// is dropped as soon as either side settles.
pub async fn wait_for_exit(
    process: Option<&mut (dyn ManagedProcess + '_)>,
    timeout: Option<Duration>,
) -> WaitOutcome {
    let Some(process) = process else {
        return WaitOutcome::Absent;
    };

    if process.has_exited() {
        return WaitOutcome::Exited;
    }

    let exit = async {
        match process.wait().await {
            Ok(()) => WaitOutcome::Exited,
            Err(e) => {
                tracing::debug!(error = %e, "error while waiting for child exit");
                WaitOutcome::Errored
            }
        }
    };

    match timeout.filter(|limit| !limit.is_zero()) {
        Some(limit) => {
            tokio::select! {
                outcome = exit => outcome,
                _ = tokio::time::sleep(limit) => WaitOutcome::TimedOut,
            }
        }
        None => exit.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeProcess;

    #[tokio::test]
    async fn test_absent_process_resolves_immediately() {
        let outcome = wait_for_exit(None, Some(Duration::from_millis(700))).await;
        assert_eq!(outcome, WaitOutcome::Absent);
    }

    #[tokio::test]
    async fn test_already_exited_resolves_immediately() {
        let mut process = FakeProcess::new();
        process.exit_tx.send(true).unwrap();
        let outcome = wait_for_exit(Some(&mut process), None).await;
        assert_eq!(outcome, WaitOutcome::Exited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_wins_when_process_keeps_running() {
        let mut process = FakeProcess::new();
        let started = tokio::time::Instant::now();

        let outcome = wait_for_exit(Some(&mut process), Some(Duration::from_millis(700))).await;

        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(!outcome.exited());
        assert!(started.elapsed() >= Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_before_timer() {
        let mut process = FakeProcess::new();
        let tx = process.exit_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = tx.send(true);
        });

        let started = tokio::time::Instant::now();
        let outcome = wait_for_exit(Some(&mut process), Some(Duration::from_millis(700))).await;

        assert_eq!(outcome, WaitOutcome::Exited);
        assert!(started.elapsed() < Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_arms_no_timer() {
        let mut process = FakeProcess::new();
        let tx = process.exit_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let _ = tx.send(true);
        });

        let outcome = wait_for_exit(Some(&mut process), Some(Duration::ZERO)).await;
        assert_eq!(outcome, WaitOutcome::Exited);
    }

    #[tokio::test]
    async fn test_wait_error_resolves_instead_of_failing() {
        let mut process = FakeProcess::new();
        process.wait_error = true;
        let outcome = wait_for_exit(Some(&mut process), Some(Duration::from_millis(700))).await;
        assert_eq!(outcome, WaitOutcome::Errored);
        assert!(outcome.exited());
    }
}
