// src/exec/process.rs

//! Public per-instance handle.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::config::LaunchConfig;
use crate::errors::Result;
use crate::exec::background::Background;
use crate::exec::blocking::Blocking;
use crate::exec::engine::{Engine, OutputMode, ProcessHandle};
use crate::exec::output::{Launcher, MergedLauncher};
use crate::registry::{self, Closeable};

/// A spawned-on-demand executable whose merged output is read line by line.
///
/// Handles are cheap to clone; all clones drive the same instance, so
/// `execute`, `wait_for` and `close` may be called from different tasks.
pub struct ReadOnlyProcess<M: OutputMode> {
    engine: Arc<Engine<M>>,
}

/// Instance whose `execute` returns the collected output.
pub type BlockingProcess = ReadOnlyProcess<Blocking>;

/// Instance whose output is delivered to a callback from a worker task.
pub type BackgroundProcess = ReadOnlyProcess<Background>;

impl<M: OutputMode> ReadOnlyProcess<M> {
    /// Build an instance and register it for shutdown cleanup.
    pub fn new(executable: impl AsRef<Path>, config: LaunchConfig, mode: M) -> Self {
        Self::with_launcher(executable, config, mode, MergedLauncher)
    }

    /// Like [`new`](Self::new), but every run is spawned through `launcher`.
    pub fn with_launcher(
        executable: impl AsRef<Path>,
        config: LaunchConfig,
        mode: M,
        launcher: impl Launcher + 'static,
    ) -> Self {
        let executable = absolute(executable.as_ref());
        let engine = Arc::new(Engine::new(executable, config, mode, Box::new(launcher)));

        let weak: Weak<dyn Closeable> = Arc::downgrade(&engine) as Weak<dyn Closeable>;
        if !registry::global().register(weak) {
            debug!(
                program = %engine.executable().display(),
                "shutdown already in progress; instance not tracked"
            );
        }

        Self { engine }
    }

    /// Run the executable with the arguments in `command`, in the
    /// executable's parent directory.
    ///
    /// Blocking instances return the output; background instances and
    /// rejected calls (a run is already in progress) return `None`.
    pub async fn execute(&self, command: &str) -> Result<Option<String>> {
        self.engine.execute(command, None).await
    }

    /// Like [`execute`](Self::execute), but in `directory`.
    pub async fn execute_in(
        &self,
        command: &str,
        directory: impl AsRef<Path>,
    ) -> Result<Option<String>> {
        self.engine.execute(command, Some(directory.as_ref())).await
    }

    /// Wait for the current process to exit and return its code.
    ///
    /// Returns immediately with `Ok(None)` if nothing was ever started. A
    /// background instance also waits for its worker to deliver the remaining
    /// lines, then re-raises (once) any failure the worker captured.
    pub async fn wait_for(&self) -> Result<Option<i32>> {
        M::wait_for(&self.engine).await
    }

    pub fn process(&self) -> Option<ProcessHandle> {
        self.engine.process()
    }

    pub fn is_running(&self) -> bool {
        self.engine.is_running()
    }

    pub fn is_done(&self) -> bool {
        self.engine.is_done()
    }

    /// Kill the process if still alive and release the output stream.
    ///
    /// Idempotent and safe to call concurrently.
    pub async fn close(&self) -> Result<()> {
        M::dispose(&self.engine).await
    }

    pub fn executable(&self) -> &Path {
        self.engine.executable()
    }

    pub fn config(&self) -> &LaunchConfig {
        self.engine.config()
    }
}

impl<M: OutputMode> Clone for ReadOnlyProcess<M> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<M: OutputMode> fmt::Debug for ReadOnlyProcess<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOnlyProcess")
            .field("executable", &self.engine.executable())
            .field("state", &self.engine.state().get())
            .finish()
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
