// src/exec/engine.rs

//! Lifecycle engine shared by both execution modes.
//!
//! The engine owns the executable path, the [`StateRegister`] and the slot
//! holding the current run's OS process and output stream. The two modes plug
//! in through [`OutputMode`]: what to do with each line, and how a started run
//! turns into a result.
//!
//! Every `execute` gets a fresh run id. Cleanup that belongs to one run (end of
//! the read loop, a worker disposing its own run) is ignored once a newer run
//! has been installed, so a finishing run never tears down its successor.
//!
//! The exit-status receiver of the latest run outlives its process handle, so
//! `wait_for` still resolves while a concurrent `close` is killing the child.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::command;
use crate::config::LaunchConfig;
use crate::errors::{ProcstreamError, Result};
use crate::exec::output::{Launcher, OutputStream};
use crate::exec::reaper::{ExitState, Reaper};
use crate::registry::Closeable;
use crate::state::{StateRegister, flags};

/// Sentinel stored in the exit-code cache while no code is known.
pub const EXIT_UNSET: i32 = i32::MIN;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Mode-specific behaviour plugged into the [`Engine`].
pub trait OutputMode: Send + Sync + Sized + 'static {
    /// Receive one line of output, in the order the process produced it.
    fn consume_line(&self, line: &str);

    /// Drive a freshly started run.
    ///
    /// Called once per successful start with the run id assigned to it.
    fn produce_result(
        engine: Arc<Engine<Self>>,
        run: u64,
    ) -> BoxFuture<'static, Result<Option<String>>>;

    /// Release everything owned by the instance. Must be idempotent.
    fn dispose(engine: &Engine<Self>) -> BoxFuture<'_, Result<()>> {
        Box::pin(engine.release(None))
    }

    /// Wait for the current run to finish and return its exit code.
    fn wait_for(engine: &Engine<Self>) -> BoxFuture<'_, Result<Option<i32>>> {
        Box::pin(engine.wait_for())
    }
}

/// OS process and output stream of one run. Always installed and removed
/// together.
struct Attached {
    run: u64,
    reaper: Reaper,
    output: Arc<OutputStream>,
}

#[derive(Default)]
struct Slot {
    attached: Option<Attached>,
    /// Exit status of the most recent run; kept after `attached` is taken.
    last_status: Option<(u64, watch::Receiver<ExitState>)>,
}

pub struct Engine<M> {
    executable: PathBuf,
    config: LaunchConfig,
    launcher: Box<dyn Launcher>,
    state: StateRegister,
    slot: Mutex<Slot>,
    exit_code: AtomicI32,
    runs: AtomicU64,
    mode: M,
}

impl<M: OutputMode> Engine<M> {
    pub fn new(
        executable: PathBuf,
        config: LaunchConfig,
        mode: M,
        launcher: Box<dyn Launcher>,
    ) -> Self {
        Self {
            executable,
            config,
            launcher,
            state: StateRegister::new(flags::NONE),
            slot: Mutex::new(Slot::default()),
            exit_code: AtomicI32::new(EXIT_UNSET),
            runs: AtomicU64::new(0),
            mode,
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    pub fn mode(&self) -> &M {
        &self.mode
    }

    pub fn state(&self) -> &StateRegister {
        &self.state
    }

    /// Start the executable with the arguments in `command`.
    ///
    /// Returns `Ok(None)` without doing anything if a run is already starting
    /// or running, or if the instance was closed while this call was starting
    /// it.
    pub async fn execute(
        self: &Arc<Self>,
        command: &str,
        directory: Option<&Path>,
    ) -> Result<Option<String>> {
        // DONE and DISPOSED left over from an earlier run are dropped here, so
        // a DISPOSED seen later can only come from a concurrent close.
        if !self.state.compare_and_replace(
            flags::NONE,
            flags::INITIALIZING | flags::RUNNING,
            flags::INITIALIZING,
        ) {
            debug!(
                program = %self.executable.display(),
                "execute rejected; instance is already starting or running"
            );
            return Ok(None);
        }

        let run = match self.start(command, directory) {
            Ok(Some(run)) => run,
            Ok(None) => return Ok(None),
            Err(err) => {
                self.state.unset(flags::INITIALIZING);
                return Err(err);
            }
        };

        M::produce_result(Arc::clone(self), run).await
    }

    fn start(&self, command: &str, directory: Option<&Path>) -> Result<Option<u64>> {
        let args = command::extract(command);
        let dir = directory
            .or_else(|| self.executable.parent())
            .filter(|d| !d.as_os_str().is_empty());

        // Spawn under the slot lock: a close either lands before (and is seen
        // here) or after the run is installed (and kills it).
        let mut slot = lock(&self.slot);
        if self.state.is(flags::DISPOSED) {
            self.state.unset(flags::INITIALIZING);
            debug!(
                program = %self.executable.display(),
                "instance closed while starting; not spawning"
            );
            return Ok(None);
        }

        info!(
            program = %self.executable.display(),
            ?args,
            dir = ?dir,
            "starting process"
        );

        let (child, merged) = self
            .launcher
            .launch(&self.executable, &args, dir, &self.config)
            .map_err(|source| ProcstreamError::Start {
                program: self.executable.clone(),
                source,
            })?;

        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(previous) = slot.attached.take() {
            debug!(
                run = previous.run,
                "dropping leftover resources of previous run"
            );
        }

        let reaper = Reaper::spawn(child, run, self.config.kill_on_drop);
        self.exit_code.store(EXIT_UNSET, Ordering::SeqCst);
        slot.last_status = Some((run, reaper.subscribe()));
        slot.attached = Some(Attached {
            run,
            reaper,
            output: Arc::new(OutputStream::new(merged, self.config.buffer_capacity)),
        });
        self.state.clear(flags::RUNNING);

        Ok(Some(run))
    }

    /// The read loop: hand every line of `run`'s output to the mode, then move
    /// the state from RUNNING to DONE.
    ///
    /// A read error ends the loop and is returned once the state has moved.
    pub async fn drain(&self, run: u64) -> io::Result<()> {
        let mut result = Ok(());

        while self.state.is(flags::RUNNING) || self.is_process_alive() {
            let Some(output) = self.output_of(run) else {
                break;
            };

            match output.read_line().await {
                Ok(Some(line)) => self.mode.consume_line(&line),
                Ok(None) => break,
                Err(e) => {
                    debug!(run, error = %e, "output read failed; ending read loop");
                    result = Err(e);
                    break;
                }
            }
        }

        self.finish_run(run);
        result
    }

    fn output_of(&self, run: u64) -> Option<Arc<OutputStream>> {
        lock(&self.slot)
            .attached
            .as_ref()
            .filter(|attached| attached.run == run)
            .map(|attached| Arc::clone(&attached.output))
    }

    fn finish_run(&self, run: u64) {
        let _slot = lock(&self.slot);
        if self.runs.load(Ordering::SeqCst) == run {
            self.state.unset(flags::RUNNING);
            self.state.set(flags::DONE);
        } else {
            debug!(run, "read loop of a superseded run finished");
        }
    }

    pub fn is_process_alive(&self) -> bool {
        lock(&self.slot)
            .attached
            .as_ref()
            .is_some_and(|attached| attached.reaper.is_alive())
    }

    /// Block until the current process exits and return its exit code.
    ///
    /// Returns the cached code if it is already known, and `Ok(None)` if no
    /// process was ever started.
    pub async fn wait_for(&self) -> Result<Option<i32>> {
        if let Some(code) = self.cached_exit_code() {
            return Ok(Some(code));
        }

        let Some((run, mut status)) = lock(&self.slot).last_status.clone() else {
            return Ok(self.cached_exit_code());
        };

        let state = status
            .wait_for(|state| !state.is_running())
            .await
            .map(|state| state.clone())
            .map_err(|_| {
                ProcstreamError::Wait(Arc::new(io::Error::other(
                    "process status channel closed before an exit status was published",
                )))
            })?;

        match state {
            ExitState::Exited(code) => Ok(Some(self.record_exit(run, code))),
            ExitState::Failed(e) => Err(ProcstreamError::Wait(e)),
            ExitState::Running => unreachable!("status watch returned a running state"),
        }
    }

    pub fn cached_exit_code(&self) -> Option<i32> {
        match self.exit_code.load(Ordering::SeqCst) {
            EXIT_UNSET => None,
            code => Some(code),
        }
    }

    /// Store `code` for `run` unless a code is already known. Returns the code
    /// that `run` ended with.
    fn record_exit(&self, run: u64, code: i32) -> i32 {
        let _slot = lock(&self.slot);
        if self.runs.load(Ordering::SeqCst) != run {
            return code;
        }

        match self
            .exit_code
            .compare_exchange(EXIT_UNSET, code, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => code,
            Err(existing) => existing,
        }
    }

    /// Mark the instance DISPOSED, then kill the process if it is still alive
    /// and close its output.
    ///
    /// With `Some(run)`, nothing happens unless `run` is still the current run.
    /// All steps run even if one fails; the first failure is returned at the
    /// end.
    pub async fn release(&self, run: Option<u64>) -> Result<()> {
        let attached = {
            let mut slot = lock(&self.slot);
            if let Some(run) = run {
                if self.runs.load(Ordering::SeqCst) != run {
                    debug!(run, "release of a superseded run ignored");
                    return Ok(());
                }
            }
            self.state.unset(flags::RUNNING);
            self.state.set(flags::DISPOSED);
            slot.attached.take()
        };

        let Some(Attached {
            run,
            reaper,
            output,
        }) = attached
        else {
            return Ok(());
        };

        let pid = reaper.pid();
        let mut failure = None;

        match reaper.terminate().await {
            Ok(Some(code)) => {
                self.record_exit(run, code);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(run, ?pid, error = %e, "failed to terminate process");
                failure = Some(ProcstreamError::Dispose(e));
            }
        }

        output.close().await;
        debug!(run, ?pid, "released process resources");

        failure.map_or(Ok(()), Err)
    }

    /// Snapshot of the current run's OS process.
    pub fn process(&self) -> Option<ProcessHandle> {
        lock(&self.slot).attached.as_ref().map(|attached| ProcessHandle {
            run: attached.run,
            pid: attached.reaper.pid(),
            status: attached.reaper.subscribe(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.state.is(flags::RUNNING)
    }

    pub fn is_done(&self) -> bool {
        self.state.is(flags::DONE)
    }
}

impl<M: OutputMode> Closeable for Engine<M> {
    fn close(&self) -> BoxFuture<'_, Result<()>> {
        M::dispose(self)
    }
}

/// Read-only view of a spawned OS process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    run: u64,
    pid: Option<u32>,
    status: watch::Receiver<ExitState>,
}

impl ProcessHandle {
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Generation of the `execute` call that started this process.
    pub fn run(&self) -> u64 {
        self.run
    }

    pub fn is_alive(&self) -> bool {
        self.status.borrow().is_running()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.status.borrow().code()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
