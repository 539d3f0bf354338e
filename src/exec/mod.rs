// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`engine`] owns the lifecycle shared by both modes: start, read loop,
//!   exit-code cache and disposal.
//! - [`blocking`] and [`background`] are the two [`OutputMode`]s.
//! - [`output`] spawns the child with merged stdout/stderr (behind the
//!   [`Launcher`] seam) and wraps the result in a closable line stream.
//! - [`reaper`] owns each run's `tokio::process::Child`.
//! - [`process`] is the public handle, [`ReadOnlyProcess`].

pub mod background;
pub mod blocking;
pub mod engine;
pub mod output;
pub mod process;
pub mod reaper;

pub use background::{Background, LineCallback};
pub use blocking::Blocking;
pub use engine::{Engine, OutputMode, ProcessHandle};
pub use output::{Launcher, MergedLauncher, MergedOutput};
pub use process::{BackgroundProcess, BlockingProcess, ReadOnlyProcess};
