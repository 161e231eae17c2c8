//! Test logging helpers.

use std::io;
use std::sync::{Arc, Mutex};

use plugvisor_telemetry::{LogConfig, LogFormat, setup_logging};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

/// Set up test logging with the given filter.
///
/// Safe to call from many tests; only the first call installs a
/// subscriber.
pub fn setup_test_logging(filter: &str) {
    let config = LogConfig::new(filter)
        .with_format(LogFormat::Compact)
        .without_ansi();
    let _ = setup_logging(&config);
}

/// In-memory sink for formatted `tracing` output.
#[derive(Debug, Clone, Default)]
pub struct CapturedLogs {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    /// Everything captured so far.
    #[must_use]
    pub fn contents(&self) -> String {
        self.buf
            .lock()
            .map(|guard| String::from_utf8_lossy(&guard).into_owned())
            .unwrap_or_default()
    }

    /// Whether any captured line contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.contents().contains(needle)
    }

    /// Captured lines containing `needle`.
    #[must_use]
    pub fn lines_with(&self, needle: &str) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_owned)
            .collect()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if let Ok(mut guard) = self.buf.lock() {
            guard.extend_from_slice(data);
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Capture everything logged on the current thread at `filter` until the
/// guard is dropped.
///
/// Events from other threads are not captured, so use a current-thread
/// runtime for tests that assert on logs.
#[must_use]
pub fn capture_logs(filter: &str) -> (CapturedLogs, DefaultGuard) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_target(true)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}
