//! Mock execution and mount backends.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use plugvisor_plugins::{
    Executor, ExecutorClient, ExecutorError, ExecutorResult, IoPipes, LogAttacher, Mounter,
    PluginId, PluginResult, ProcessSpec, Signal, StateInfo, StateSink,
};

/// A call the manager made on the execution engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorCall {
    /// A process was requested.
    Create {
        /// Plugin identity.
        id: String,
        /// The spec it was started with.
        spec: ProcessSpec,
    },
    /// Reattach to a running process.
    Restore(String),
    /// A signal was sent.
    Signal(String, Signal),
}

#[derive(Default)]
struct MockState {
    sink: Mutex<Option<Arc<dyn StateSink>>>,
    calls: Mutex<Vec<ExecutorCall>>,
    /// Remaining create failures per plugin; `u32::MAX` fails forever.
    create_failures: Mutex<HashMap<String, u32>>,
    restore_failures: Mutex<HashSet<String>>,
    pids: Mutex<HashMap<String, Vec<u32>>>,
    output: Mutex<HashMap<String, (Vec<u8>, Vec<u8>)>>,
    exit_on_terminate: AtomicBool,
    exit_on_kill: AtomicBool,
    refuse_client: AtomicBool,
    next_pid: AtomicU32,
}

/// First PID handed out by [`MockExecutor`].
pub const FIRST_MOCK_PID: u32 = 1000;

/// Mock execution engine.
///
/// Records every call, fails on demand, and delivers state changes back
/// to the manager through the registered sink. Clones share state.
#[derive(Clone, Default)]
pub struct MockExecutor {
    state: Arc<MockState>,
}

impl std::fmt::Debug for MockExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockExecutor")
            .field("calls", &self.calls().len())
            .finish_non_exhaustive()
    }
}

impl MockExecutor {
    /// A mock that exits processes on `SIGTERM` and `SIGKILL`.
    #[must_use]
    pub fn new() -> Self {
        let mock = Self::default();
        mock.state.exit_on_terminate.store(true, Ordering::SeqCst);
        mock.state.exit_on_kill.store(true, Ordering::SeqCst);
        mock
    }

    /// Ignore `SIGTERM`, so shutdown has to escalate.
    #[must_use]
    pub fn ignoring_terminate(self) -> Self {
        self.state.exit_on_terminate.store(false, Ordering::SeqCst);
        self
    }

    /// Refuse to hand out a client.
    #[must_use]
    pub fn refusing_client(self) -> Self {
        self.state.refuse_client.store(true, Ordering::SeqCst);
        self
    }

    /// Fail the next `times` create calls for `id`.
    pub fn fail_create(&self, id: &PluginId, times: u32) {
        if let Ok(mut guard) = self.state.create_failures.lock() {
            guard.insert(id.to_string(), times);
        }
    }

    /// Fail every create call for `id`.
    pub fn fail_create_always(&self, id: &PluginId) {
        self.fail_create(id, u32::MAX);
    }

    /// Fail restore calls for `id`.
    pub fn fail_restore(&self, id: &PluginId) {
        if let Ok(mut guard) = self.state.restore_failures.lock() {
            guard.insert(id.to_string());
        }
    }

    /// Report `pids` as running for `id`, as if started before the
    /// manager.
    pub fn set_pids(&self, id: &PluginId, pids: Vec<u32>) {
        if let Ok(mut guard) = self.state.pids.lock() {
            guard.insert(id.to_string(), pids);
        }
    }

    /// Bytes the next process for `id` writes to stdout and stderr before
    /// closing both.
    pub fn set_output(&self, id: &PluginId, stdout: &[u8], stderr: &[u8]) {
        if let Ok(mut guard) = self.state.output.lock() {
            guard.insert(id.to_string(), (stdout.to_vec(), stderr.to_vec()));
        }
    }

    /// All recorded calls, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ExecutorCall> {
        self.state
            .calls
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Specs of every create call, in order.
    #[must_use]
    pub fn created(&self) -> Vec<(String, ProcessSpec)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ExecutorCall::Create { id, spec } => Some((id, spec)),
                _ => None,
            })
            .collect()
    }

    /// Number of create calls for `id`.
    #[must_use]
    pub fn create_count(&self, id: &PluginId) -> usize {
        self.created()
            .iter()
            .filter(|(created, _)| created == id.as_str())
            .count()
    }

    /// IDs passed to restore, in order.
    #[must_use]
    pub fn restored(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ExecutorCall::Restore(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Signals sent to `id`, in order.
    #[must_use]
    pub fn signals(&self, id: &PluginId) -> Vec<Signal> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ExecutorCall::Signal(target, signal) if target == id.as_str() => Some(signal),
                _ => None,
            })
            .collect()
    }

    /// Deliver a state change to the registered manager, as the engine
    /// would.
    ///
    /// # Panics
    ///
    /// Panics if no client has been created.
    pub async fn deliver(&self, id: &str, info: StateInfo) -> PluginResult<()> {
        let sink = self
            .state
            .sink
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
            .expect("no client registered");
        sink.state_changed(id, info).await
    }

    /// Exit the current process of `id` with status 0 and deliver the
    /// notification.
    ///
    /// # Panics
    ///
    /// Panics if no client has been created.
    pub async fn deliver_exit(&self, id: &str) -> PluginResult<()> {
        let info = self.exit_notice(id, 0);
        self.forget_process(id);
        self.deliver(id, info).await
    }

    /// The notification the engine sends when the current process of `id`
    /// exits with `code`. Carries no PID if nothing is running.
    #[must_use]
    pub fn exit_notice(&self, id: &str, code: i32) -> StateInfo {
        StateInfo {
            pid: self.current_pid(id),
            ..StateInfo::exit(code)
        }
    }

    /// Drop the process of `id` without reporting an exit.
    pub fn forget_process(&self, id: &str) {
        if let Ok(mut guard) = self.state.pids.lock() {
            guard.remove(id);
        }
    }

    fn current_pid(&self, id: &str) -> Option<u32> {
        self.state
            .pids
            .lock()
            .ok()
            .and_then(|guard| guard.get(id).and_then(|pids| pids.first().copied()))
    }

    fn record(&self, call: ExecutorCall) {
        if let Ok(mut guard) = self.state.calls.lock() {
            guard.push(call);
        }
    }

    fn take_create_failure(&self, id: &PluginId) -> bool {
        let Ok(mut guard) = self.state.create_failures.lock() else {
            return false;
        };
        match guard.get_mut(id.as_str()) {
            Some(&mut 0) | None => false,
            Some(&mut u32::MAX) => true,
            Some(remaining) => {
                *remaining = remaining.saturating_sub(1);
                true
            },
        }
    }

    fn take_output(&self, id: &PluginId) -> Option<(Vec<u8>, Vec<u8>)> {
        self.state
            .output
            .lock()
            .ok()
            .and_then(|mut guard| guard.remove(id.as_str()))
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn client(&self, sink: Arc<dyn StateSink>) -> ExecutorResult<Arc<dyn ExecutorClient>> {
        if self.state.refuse_client.load(Ordering::SeqCst) {
            return Err(ExecutorError::Unavailable("mock refused".into()));
        }
        if let Ok(mut guard) = self.state.sink.lock() {
            *guard = Some(sink);
        }
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl ExecutorClient for MockExecutor {
    async fn create(&self, id: &PluginId, spec: ProcessSpec, attach: LogAttacher) -> ExecutorResult<u32> {
        self.record(ExecutorCall::Create {
            id: id.to_string(),
            spec,
        });
        if self.take_create_failure(id) {
            return Err(ExecutorError::Failed(format!("mock create failure for {id}")));
        }

        let pid = FIRST_MOCK_PID.saturating_add(self.state.next_pid.fetch_add(1, Ordering::SeqCst));
        if let Ok(mut guard) = self.state.pids.lock() {
            guard.insert(id.to_string(), vec![pid]);
        }

        let mut pipes = IoPipes::default();
        if let Some((stdout, stderr)) = self.take_output(id) {
            pipes.stdout = Some(Box::new(filled_pipe(&stdout).await));
            pipes.stderr = Some(Box::new(filled_pipe(&stderr).await));
        }
        attach.attach(pipes);
        Ok(pid)
    }

    async fn restore(&self, id: &PluginId, attach: LogAttacher) -> ExecutorResult<()> {
        self.record(ExecutorCall::Restore(id.to_string()));
        let failing = self
            .state
            .restore_failures
            .lock()
            .is_ok_and(|guard| guard.contains(id.as_str()));
        if failing {
            return Err(ExecutorError::Failed(format!("mock restore failure for {id}")));
        }
        attach.attach(IoPipes::default());
        Ok(())
    }

    async fn signal(&self, id: &PluginId, signal: Signal) -> ExecutorResult<()> {
        self.record(ExecutorCall::Signal(id.to_string(), signal));
        if self.current_pid(id.as_str()).is_none() {
            return Err(ExecutorError::NoSuchProcess(id.to_string()));
        }
        let exits = match signal {
            Signal::Terminate => self.state.exit_on_terminate.load(Ordering::SeqCst),
            Signal::Kill => self.state.exit_on_kill.load(Ordering::SeqCst),
        };
        if exits {
            let code = 128_i32.saturating_add(signal.number());
            let info = self.exit_notice(id.as_str(), code);
            self.forget_process(id.as_str());
            let mock = self.clone();
            let id = id.to_string();
            tokio::spawn(async move {
                let _ = mock.deliver(&id, info).await;
            });
        }
        Ok(())
    }

    async fn pids(&self, id: &PluginId) -> ExecutorResult<Vec<u32>> {
        Ok(self
            .state
            .pids
            .lock()
            .ok()
            .and_then(|guard| guard.get(id.as_str()).cloned())
            .unwrap_or_default())
    }
}

/// A read pipe already holding `data`, with the write end closed.
async fn filled_pipe(data: &[u8]) -> tokio::io::DuplexStream {
    let (mut writer, reader) = tokio::io::duplex(data.len().max(64));
    let _ = writer.write_all(data).await;
    reader
}

/// A call the manager made on the mount backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountCall {
    /// Bind and make shared.
    MakeRshared(PathBuf),
    /// Unmount.
    Unmount(PathBuf),
}

/// Mock mount backend recording every call.
#[derive(Debug, Clone, Default)]
pub struct MockMounter {
    calls: Arc<Mutex<Vec<MountCall>>>,
    fail_unmount: Arc<AtomicBool>,
    fail_make_rshared: Arc<AtomicBool>,
}

impl MockMounter {
    /// Create a mounter where every call succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every unmount fail.
    #[must_use]
    pub fn failing_unmount(self) -> Self {
        self.fail_unmount.store(true, Ordering::SeqCst);
        self
    }

    /// Make every shared-mount setup fail.
    #[must_use]
    pub fn failing_make_rshared(self) -> Self {
        self.fail_make_rshared.store(true, Ordering::SeqCst);
        self
    }

    /// All recorded calls, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<MountCall> {
        self.calls
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Paths passed to unmount, in order.
    #[must_use]
    pub fn unmounted(&self) -> Vec<PathBuf> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MountCall::Unmount(path) => Some(path),
                MountCall::MakeRshared(_) => None,
            })
            .collect()
    }

    fn record(&self, call: MountCall) {
        if let Ok(mut guard) = self.calls.lock() {
            guard.push(call);
        }
    }
}

impl Mounter for MockMounter {
    fn make_rshared(&self, path: &Path) -> std::io::Result<()> {
        self.record(MountCall::MakeRshared(path.to_path_buf()));
        if self.fail_make_rshared.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "mock make_rshared failure",
            ));
        }
        Ok(())
    }

    fn unmount(&self, path: &Path) -> std::io::Result<()> {
        self.record(MountCall::Unmount(path.to_path_buf()));
        if self.fail_unmount.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("mock unmount failure"));
        }
        Ok(())
    }
}
