// src/exec/reaper.rs

//! Per-run task that owns the OS child.
//!
//! The reaper is the only place that waits on the child, so any number of
//! callers can observe the exit status through a `watch` channel without
//! racing each other for `&mut Child`. A forced kill is requested over a
//! oneshot; dropping the [`Reaper`] without a request also kills the child
//! unless the run was configured otherwise.

use std::io;
use std::process::ExitStatus;
use std::sync::Arc;

use tokio::process::Child;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info};

/// Exit status as published by the reaper.
#[derive(Debug, Clone)]
pub enum ExitState {
    Running,
    Exited(i32),
    Failed(Arc<io::Error>),
}

impl ExitState {
    pub fn is_running(&self) -> bool {
        matches!(self, ExitState::Running)
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitState::Exited(code) => Some(*code),
            _ => None,
        }
    }

    fn from_wait(result: io::Result<ExitStatus>) -> Self {
        match result {
            Ok(status) => ExitState::Exited(exit_code(status)),
            Err(e) => ExitState::Failed(Arc::new(e)),
        }
    }
}

type KillAck = oneshot::Sender<io::Result<()>>;

/// Handle to a running reaper task.
#[derive(Debug)]
pub struct Reaper {
    pid: Option<u32>,
    kill: oneshot::Sender<KillAck>,
    status: watch::Receiver<ExitState>,
}

impl Reaper {
    /// Take ownership of `child` and start waiting on it.
    ///
    /// With `kill_on_drop` unset, dropping the handle leaves the child running
    /// until it exits on its own.
    pub fn spawn(mut child: Child, run: u64, kill_on_drop: bool) -> Self {
        let pid = child.id();
        let (status_tx, status) = watch::channel(ExitState::Running);
        let (kill, kill_rx) = oneshot::channel::<KillAck>();

        tokio::spawn(async move {
            tokio::select! {
                waited = child.wait() => {
                    publish(&status_tx, run, pid, waited);
                }

                request = kill_rx => match request {
                    Ok(ack) => kill_and_publish(&mut child, &status_tx, run, pid, Some(ack)).await,
                    Err(_) if kill_on_drop => {
                        kill_and_publish(&mut child, &status_tx, run, pid, None).await
                    }
                    Err(_) => {
                        debug!(run, ?pid, "process handle dropped; leaving process running");
                        let waited = child.wait().await;
                        publish(&status_tx, run, pid, waited);
                    }
                },
            }
        });

        Self { pid, kill, status }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn subscribe(&self) -> watch::Receiver<ExitState> {
        self.status.clone()
    }

    pub fn is_alive(&self) -> bool {
        self.status.borrow().is_running()
    }

    /// Force-kill the child if it is still running and return its exit code.
    pub async fn terminate(self) -> io::Result<Option<i32>> {
        let (ack_tx, ack_rx) = oneshot::channel();

        // A send failure means the child already exited and was reaped.
        if self.kill.send(ack_tx).is_ok() {
            if let Ok(killed) = ack_rx.await {
                killed?;
            }
        }

        let code = self.status.borrow().code();
        Ok(code)
    }
}

fn publish(
    status_tx: &watch::Sender<ExitState>,
    run: u64,
    pid: Option<u32>,
    waited: io::Result<ExitStatus>,
) {
    let state = ExitState::from_wait(waited);
    info!(run, ?pid, exit_code = ?state.code(), "process exited");
    status_tx.send_replace(state);
}

async fn kill_and_publish(
    child: &mut Child,
    status_tx: &watch::Sender<ExitState>,
    run: u64,
    pid: Option<u32>,
    ack: Option<KillAck>,
) {
    debug!(run, ?pid, "forcibly terminating process");

    match child.kill().await {
        Ok(()) => {
            let waited = child.wait().await;
            publish(status_tx, run, pid, waited);
            if let Some(ack) = ack {
                let _ = ack.send(Ok(()));
            }
        }
        Err(e) => {
            // Report the failure first; the child may still exit on its own.
            if let Some(ack) = ack {
                let _ = ack.send(Err(e));
            }
            let waited = child.wait().await;
            publish(status_tx, run, pid, waited);
        }
    }
}

/// Map an exit status to an integer code; signals report `128 + signal`.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}
