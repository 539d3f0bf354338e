use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, Once};
use std::task::{Context, Poll};
use std::time::Duration;

use procstream::exec::output::spawn_merged;
use procstream::{LaunchConfig, Launcher, LineCallback, MergedOutput};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::Child;
use tokio::sync::oneshot;
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Absolute path of the POSIX shell used to drive test processes.
pub fn shell() -> PathBuf {
    PathBuf::from("/bin/sh")
}

/// Collects every line handed to a background callback.
#[derive(Clone, Default)]
pub struct LineRecorder {
    lines: Arc<Mutex<Vec<String>>>,
}

impl LineRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback that appends to this recorder.
    pub fn callback(&self) -> LineCallback {
        let lines = Arc::clone(&self.lines);
        Arc::new(move |line: &str| {
            lines.lock().unwrap().push(line.to_string());
        })
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Poll until at least `count` lines arrived or `timeout` elapsed.
    pub async fn wait_for_lines(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.len() < count {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

/// Output that yields `lines` and then fails every further read.
#[derive(Debug)]
pub struct FailingOutput {
    pending: Vec<u8>,
}

impl FailingOutput {
    pub fn new(lines: &[&str]) -> Self {
        let mut pending = Vec::new();
        for line in lines {
            pending.extend_from_slice(line.as_bytes());
            pending.push(b'\n');
        }
        Self { pending }
    }
}

impl AsyncRead for FailingOutput {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.pending.is_empty() {
            return Poll::Ready(Err(io::Error::other("output stream broke")));
        }

        let n = self.pending.len().min(buf.remaining());
        buf.put_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Poll::Ready(Ok(()))
    }
}

/// Spawns the real child but hands the engine a [`FailingOutput`] instead
/// of its pipe.
#[derive(Debug, Clone)]
pub struct BrokenOutputLauncher {
    lines: Vec<String>,
}

impl BrokenOutputLauncher {
    pub fn new(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|l| l.to_string()).collect(),
        }
    }
}

impl Launcher for BrokenOutputLauncher {
    fn launch(
        &self,
        program: &Path,
        args: &[String],
        dir: Option<&Path>,
        config: &LaunchConfig,
    ) -> io::Result<(Child, MergedOutput)> {
        let (child, _pipe) = spawn_merged(program, args, dir, config)?;
        let lines: Vec<&str> = self.lines.iter().map(String::as_str).collect();
        Ok((child, Box::new(FailingOutput::new(&lines))))
    }
}

/// Signals once when a launch begins, then stalls for `delay` before
/// spawning normally.
#[derive(Debug)]
pub struct StallingLauncher {
    started: Mutex<Option<oneshot::Sender<()>>>,
    delay: Duration,
}

impl StallingLauncher {
    pub fn new(delay: Duration) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let launcher = Self {
            started: Mutex::new(Some(tx)),
            delay,
        };
        (launcher, rx)
    }
}

impl Launcher for StallingLauncher {
    fn launch(
        &self,
        program: &Path,
        args: &[String],
        dir: Option<&Path>,
        config: &LaunchConfig,
    ) -> io::Result<(Child, MergedOutput)> {
        if let Some(started) = self.started.lock().unwrap().take() {
            let _ = started.send(());
        }
        std::thread::sleep(self.delay);
        spawn_merged(program, args, dir, config)
    }
}
