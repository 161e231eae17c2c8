//! Per-plugin runtime handles.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// One-shot signal closed when a plugin process exits.
///
/// Closing is idempotent: repeated exit notifications for the same process
/// are harmless. Clones share the same underlying signal.
#[derive(Debug, Clone, Default)]
pub struct ExitSignal(CancellationToken);

impl ExitSignal {
    /// Create an open signal.
    #[must_use]
    pub fn new() -> Self {
        Self(CancellationToken::new())
    }

    /// Close the signal, waking every waiter.
    ///
    /// Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        let first = !self.0.is_cancelled();
        self.0.cancel();
        first
    }

    /// Whether the signal has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Wait until the signal is closed.
    pub async fn closed(&self) {
        self.0.cancelled().await;
    }

    /// Wait until the signal is closed or `timeout` elapses.
    ///
    /// Returns `true` if the signal closed in time.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.closed()).await.is_ok()
    }
}

/// The manager's control over one plugin.
#[derive(Debug, Clone, Default)]
pub struct Controller {
    /// Whether an unexpected exit should re-enable the plugin.
    pub restart: bool,
    /// Closed when the current process exits.
    pub exit: ExitSignal,
    /// Grace period between `SIGTERM` and `SIGKILL`.
    pub timeout_secs: u64,
    /// Process ID of the current run, once the engine has reported it.
    pub pid: Option<u32>,
    last_exit: Option<u32>,
}

impl Controller {
    /// A controller with no restart intent.
    #[must_use]
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            restart: false,
            exit: ExitSignal::new(),
            timeout_secs,
            pid: None,
            last_exit: None,
        }
    }

    /// Arm the controller for a freshly started process.
    ///
    /// Sets the restart intent and installs a new exit signal; waiters on
    /// the previous signal are unaffected.
    pub fn arm(&mut self, timeout_secs: u64) {
        self.restart = true;
        self.exit = ExitSignal::new();
        self.timeout_secs = timeout_secs;
        self.pid = None;
    }

    /// Record the process ID of the run that was just started.
    ///
    /// Ignored when that process has already been reported as exited.
    pub fn started(&mut self, pid: u32) {
        if self.last_exit == Some(pid) {
            return;
        }
        self.pid = Some(pid);
        self.last_exit = None;
    }

    /// Whether an exit reported for `pid` belongs to the current run.
    ///
    /// Exits without a PID cannot be told apart and always match.
    #[must_use]
    pub fn owns_exit(&self, pid: Option<u32>) -> bool {
        match pid {
            None => true,
            Some(pid) => {
                self.last_exit != Some(pid) && self.pid.is_none_or(|current| current == pid)
            },
        }
    }

    /// End the current run and close its exit signal.
    ///
    /// Returns `false` if the signal was already closed.
    pub fn exited(&mut self, pid: Option<u32>) -> bool {
        if pid.is_some() {
            self.last_exit = pid;
        }
        self.pid = None;
        self.exit.close()
    }

    /// Grace period as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_signal_close_is_idempotent() {
        let signal = ExitSignal::new();
        assert!(!signal.is_closed());
        assert!(signal.close());
        assert!(!signal.close());
        assert!(signal.is_closed());
    }

    #[tokio::test]
    async fn test_exit_signal_wakes_clones() {
        let signal = ExitSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.closed().await });
        signal.close();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_expires() {
        let signal = ExitSignal::new();
        assert!(!signal.wait_timeout(Duration::from_secs(5)).await);
        signal.close();
        assert!(signal.wait_timeout(Duration::from_secs(5)).await);
    }

    #[test]
    fn test_arm_replaces_exit_signal() {
        let mut controller = Controller::new(0);
        let old = controller.exit.clone();
        old.close();
        controller.arm(7);
        assert!(controller.restart);
        assert!(!controller.exit.is_closed());
        assert_eq!(controller.timeout(), Duration::from_secs(7));
    }

    #[test]
    fn test_exit_of_previous_run_is_not_owned() {
        let mut controller = Controller::new(0);
        controller.arm(0);
        controller.started(100);
        assert!(controller.owns_exit(Some(100)));
        assert!(!controller.owns_exit(Some(99)));

        assert!(controller.exited(Some(100)));
        // Restarted, new process not reported yet.
        controller.arm(0);
        assert!(!controller.owns_exit(Some(100)));
        assert!(controller.owns_exit(Some(101)));

        controller.started(101);
        assert!(!controller.owns_exit(Some(100)));
        assert!(controller.owns_exit(Some(101)));
        assert!(controller.owns_exit(None));
    }

    #[test]
    fn test_started_after_early_exit_is_ignored() {
        let mut controller = Controller::new(0);
        controller.arm(0);
        assert!(controller.exited(Some(7)));
        controller.started(7);
        assert_eq!(controller.pid, None);
        assert!(!controller.owns_exit(Some(7)));
    }

    #[test]
    fn test_pidless_exits_close_once() {
        let mut controller = Controller::new(0);
        assert!(controller.exited(None));
        assert!(!controller.exited(None));
    }
}
