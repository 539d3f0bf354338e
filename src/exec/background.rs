// src/exec/background.rs

//! Background mode: a worker task runs the read loop and forwards each line to
//! an optional callback while the caller carries on.
//!
//! - The worker races its body (read loop, exit wait) against a oneshot cancel
//!   signal.
//! - Anything that fails on the worker is parked in a single slot and handed
//!   to the next `wait_for` caller.
//! - `close` cancels the worker, waits for it to stop and only then releases
//!   the process, so the callback is never invoked after `close` returns.
//!   Concurrent closers all wait for the same worker. Lines the process
//!   already wrote but the worker had not read yet are dropped.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::{ProcstreamError, Result};
use crate::exec::engine::{BoxFuture, Engine, OutputMode, lock};

/// Receives every line of output, in order, on the worker task.
pub type LineCallback = Arc<dyn Fn(&str) + Send + Sync>;

struct Worker {
    run: u64,
    /// Taken by whoever stops the worker first.
    stop: Option<WorkerStop>,
    /// Closed when the worker task ends, however it ends.
    finished: watch::Receiver<()>,
}

struct WorkerStop {
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct Background {
    callback: Option<LineCallback>,
    worker: Mutex<Option<Worker>>,
    pending_failure: Mutex<Option<ProcstreamError>>,
}

impl fmt::Debug for Background {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Background")
            .field("has_callback", &self.callback.is_some())
            .field("has_worker", &lock(&self.worker).is_some())
            .finish()
    }
}

impl Background {
    pub fn new(callback: Option<LineCallback>) -> Self {
        Self {
            callback,
            worker: Mutex::new(None),
            pending_failure: Mutex::new(None),
        }
    }

    fn capture(&self, err: ProcstreamError) {
        debug!(error = %err, "captured background worker failure");
        *lock(&self.pending_failure) = Some(err);
    }

    fn take_failure(&self) -> Option<ProcstreamError> {
        lock(&self.pending_failure).take()
    }

    /// Drop the worker entry only if it still belongs to `run`.
    fn forget_worker(&self, run: u64) {
        let mut worker = lock(&self.worker);
        if worker.as_ref().is_some_and(|w| w.run == run) {
            worker.take();
        }
    }

    /// Cancel the current worker (if any) and wait until it has stopped.
    ///
    /// Only the first caller cancels and joins; later callers wait for the
    /// same worker to end.
    async fn stop_current(&self) {
        let claimed = lock(&self.worker)
            .as_mut()
            .map(|w| (w.run, w.stop.take(), w.finished.clone()));
        let Some((run, stop, mut finished)) = claimed else {
            return;
        };

        if let Some(stop) = stop {
            self.join(run, stop, true).await;
        }
        while finished.changed().await.is_ok() {}

        self.forget_worker(run);
    }

    /// Wait for the current worker (if any) to end on its own.
    async fn settle(&self) {
        let current = lock(&self.worker)
            .as_ref()
            .map(|w| (w.run, w.finished.clone()));
        let Some((run, mut finished)) = current else {
            return;
        };

        while finished.changed().await.is_ok() {}

        // A worker that died without cleaning up (a panicking callback) is
        // still in the slot; join it so the panic is captured.
        let stop = match lock(&self.worker).as_mut() {
            Some(w) if w.run == run => w.stop.take(),
            _ => None,
        };
        if let Some(stop) = stop {
            self.join(run, stop, false).await;
        }

        self.forget_worker(run);
    }

    async fn join(&self, run: u64, stop: WorkerStop, cancel: bool) {
        let WorkerStop {
            cancel: cancel_tx,
            handle,
        } = stop;

        if cancel && cancel_tx.send(()).is_err() {
            debug!(run, "background worker already past cancellation point");
        }

        if let Err(e) = handle.await {
            if e.is_panic() {
                warn!(run, "background worker panicked");
                self.capture(ProcstreamError::Worker(format!(
                    "worker for run {run} panicked"
                )));
            }
        }
    }
}

impl OutputMode for Background {
    fn consume_line(&self, line: &str) {
        if let Some(callback) = &self.callback {
            callback(line);
        }
    }

    fn produce_result(
        engine: Arc<Engine<Self>>,
        run: u64,
    ) -> BoxFuture<'static, Result<Option<String>>> {
        Box::pin(async move {
            // At most one worker per instance: retire whatever the previous
            // run left behind before starting a new one.
            engine.mode().stop_current().await;
            engine.mode().take_failure();

            let (cancel, cancel_rx) = oneshot::channel();
            let (finished_tx, finished) = watch::channel(());
            let worker_engine = Arc::clone(&engine);

            let mut slot = lock(&engine.mode().worker);
            let handle = tokio::spawn(async move {
                let _finished = finished_tx;
                run_worker(worker_engine, run, cancel_rx).await;
            });
            *slot = Some(Worker {
                run,
                stop: Some(WorkerStop { cancel, handle }),
                finished,
            });

            Ok(None)
        })
    }

    fn dispose(engine: &Engine<Self>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            engine.mode().stop_current().await;
            engine.release(None).await
        })
    }

    fn wait_for(engine: &Engine<Self>) -> BoxFuture<'_, Result<Option<i32>>> {
        Box::pin(async move {
            let code = engine.wait_for().await?;
            engine.mode().settle().await;

            match engine.mode().take_failure() {
                Some(err) => Err(err),
                None => Ok(code),
            }
        })
    }
}

async fn run_worker(
    engine: Arc<Engine<Background>>,
    run: u64,
    mut cancel: oneshot::Receiver<()>,
) {
    let outcome = tokio::select! {
        biased;

        _ = &mut cancel => {
            debug!(run, "background worker cancelled");
            return;
        }

        outcome = async {
            match engine.drain(run).await {
                Ok(()) => engine.wait_for().await,
                Err(e) => Err(ProcstreamError::Read(e)),
            }
        } => outcome,
    };

    // Past the select: releasing our own run can no longer be interrupted by
    // a cancel, and never waits on this task's own handle.
    let released = engine.release(Some(run)).await;
    engine.mode().forget_worker(run);

    if let Err(err) = outcome.and(released) {
        engine.mode().capture(err);
    }
}
