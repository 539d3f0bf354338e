// src/registry.rs

//! Process-wide shutdown registry.
//!
//! Every instance built through the factories is tracked here by a weak
//! reference, so the registry never keeps an instance alive on its own. When
//! the host shuts down, [`terminate`] closes everything that is still
//! reachable so no child process outlives the host. Cleanup is best-effort:
//! errors are logged and swallowed.
//!
//! Rust has no shutdown hooks, so the host either calls [`terminate`] on its
//! exit path or installs [`spawn_shutdown_listener`] to run it on Ctrl-C.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock, Weak};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::exec::engine::{BoxFuture, lock};

/// Something the registry can force-close.
pub trait Closeable: Send + Sync {
    fn close(&self) -> BoxFuture<'_, Result<()>>;
}

type ShutdownHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
pub struct Registry {
    entries: Mutex<Vec<Weak<dyn Closeable>>>,
    hooks: Mutex<Vec<ShutdownHook>>,
    terminating: AtomicBool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `instance`. Returns `false` once termination has started.
    ///
    /// Entries whose instance has already been dropped are pruned here.
    pub fn register(&self, instance: Weak<dyn Closeable>) -> bool {
        if self.is_terminating() {
            return false;
        }

        let mut entries = lock(&self.entries);
        entries.retain(|entry| entry.strong_count() > 0);
        entries.push(instance);
        true
    }

    /// Run `hook` once, after all instances have been closed.
    ///
    /// Returns `false` (and drops the hook) once termination has started.
    pub fn on_shutdown(&self, hook: impl FnOnce() + Send + 'static) -> bool {
        if self.is_terminating() {
            return false;
        }

        lock(&self.hooks).push(Box::new(hook));
        true
    }

    /// Number of tracked instances that are still alive.
    pub fn live_count(&self) -> usize {
        lock(&self.entries)
            .iter()
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }

    /// Close every reachable instance, then run the shutdown hooks.
    ///
    /// Only the first call does anything; it returns the number of instances
    /// it closed. Later calls return `0`.
    pub async fn terminate(&self) -> usize {
        if self
            .terminating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("registry already terminating");
            return 0;
        }

        let entries = std::mem::take(&mut *lock(&self.entries));
        let mut closed = 0;

        for entry in entries {
            let Some(instance) = entry.upgrade() else {
                continue;
            };

            match instance.close().await {
                Ok(()) => closed += 1,
                Err(e) => warn!(error = %e, "failed to close instance during shutdown"),
            }
        }

        let hooks = std::mem::take(&mut *lock(&self.hooks));
        for hook in hooks {
            hook();
        }

        info!(closed, "shutdown registry terminated");
        closed
    }
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// The process-wide registry used by the factories.
pub fn global() -> &'static Registry {
    GLOBAL.get_or_init(Registry::new)
}

/// Register a hook on the global registry.
pub fn on_shutdown(hook: impl FnOnce() + Send + 'static) -> bool {
    global().on_shutdown(hook)
}

/// Terminate the global registry.
pub async fn terminate() -> usize {
    global().terminate().await
}

/// Spawn a task that terminates the global registry on Ctrl-C.
pub fn spawn_shutdown_listener() -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            return;
        }
        info!("Ctrl+C received; closing tracked processes");
        terminate().await;
    })
}
