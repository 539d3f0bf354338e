// src/lib.rs

//! Run an external executable and stream its merged stdout/stderr line by
//! line.
//!
//! Two flavours share one lifecycle engine:
//! - [`create_blocking`]: `execute` runs the process to completion on the
//!   calling task and returns everything it printed.
//! - [`create_background`]: `execute` returns immediately; a worker task reads
//!   the output and hands each line to a callback.
//!
//! Instances are tracked by the [`registry`] so they can all be force-closed
//! when the host shuts down.
//!
//! ```no_run
//! # async fn demo() -> procstream::errors::Result<()> {
//! let sh = procstream::create_blocking("/bin/sh");
//! let output = sh.execute("-c 'echo hello'").await?;
//! assert_eq!(output.as_deref(), Some("hello\n"));
//! assert_eq!(sh.wait_for().await?, Some(0));
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod registry;
pub mod state;

use std::path::Path;
use std::sync::Arc;

pub use config::LaunchConfig;
pub use errors::{ProcstreamError, Result};
pub use exec::{
    Background, BackgroundProcess, Blocking, BlockingProcess, Launcher, LineCallback,
    MergedLauncher, MergedOutput, OutputMode, ProcessHandle, ReadOnlyProcess,
};

/// Blocking instance with the default [`LaunchConfig`].
pub fn create_blocking(executable: impl AsRef<Path>) -> BlockingProcess {
    ReadOnlyProcess::new(executable, LaunchConfig::default(), Blocking::new())
}

/// Blocking instance with an explicit, validated [`LaunchConfig`].
pub fn create_blocking_with(
    executable: impl AsRef<Path>,
    config: LaunchConfig,
) -> Result<BlockingProcess> {
    config.validate()?;
    Ok(ReadOnlyProcess::new(executable, config, Blocking::new()))
}

/// Background instance with the default [`LaunchConfig`].
///
/// Without a callback the output is read and discarded.
pub fn create_background(
    executable: impl AsRef<Path>,
    callback: Option<LineCallback>,
) -> BackgroundProcess {
    ReadOnlyProcess::new(executable, LaunchConfig::default(), Background::new(callback))
}

/// Background instance with an explicit, validated [`LaunchConfig`].
pub fn create_background_with(
    executable: impl AsRef<Path>,
    callback: Option<LineCallback>,
    config: LaunchConfig,
) -> Result<BackgroundProcess> {
    config.validate()?;
    Ok(ReadOnlyProcess::new(executable, config, Background::new(callback)))
}

/// Wrap a closure as a [`LineCallback`].
pub fn line_callback<F>(callback: F) -> LineCallback
where
    F: Fn(&str) + Send + Sync + 'static,
{
    Arc::new(callback)
}
