// src/exec/output.rs

//! Spawning a child with merged stdout/stderr, and the line stream over it.
//!
//! On unix both child descriptors are pointed at the write end of a single OS
//! pipe, so the interleaving the child produced is preserved byte for byte.
//! Elsewhere the two pipes are pumped line by line into one in-memory duplex.

use std::io;
use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, watch};

use crate::config::LaunchConfig;

/// Read half of the merged child output.
pub type MergedOutput = Box<dyn AsyncRead + Send + Unpin>;

/// Spawn `program` with `args` in `dir` (inheriting the cwd when `None`).
pub fn spawn_merged(
    program: &Path,
    args: &[String],
    dir: Option<&Path>,
    config: &LaunchConfig,
) -> io::Result<(Child, MergedOutput)> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .kill_on_drop(config.kill_on_drop);

    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    if !config.inherit_env {
        cmd.env_clear();
    }
    cmd.envs(&config.env);

    // `cmd` holds our copies of the pipe write end; it is dropped when this
    // function returns so the reader sees EOF once the child is gone.
    spawn_with_merged_pipes(cmd)
}

/// How the engine creates a run's child process and its merged output.
///
/// [`MergedLauncher`] is the one used in production; tests can hand in their
/// own to control what the read loop sees.
pub trait Launcher: Send + Sync {
    fn launch(
        &self,
        program: &Path,
        args: &[String],
        dir: Option<&Path>,
        config: &LaunchConfig,
    ) -> io::Result<(Child, MergedOutput)>;
}

/// Spawns through [`spawn_merged`].
#[derive(Debug, Default, Clone, Copy)]
pub struct MergedLauncher;

impl Launcher for MergedLauncher {
    fn launch(
        &self,
        program: &Path,
        args: &[String],
        dir: Option<&Path>,
        config: &LaunchConfig,
    ) -> io::Result<(Child, MergedOutput)> {
        spawn_merged(program, args, dir, config)
    }
}

#[cfg(unix)]
fn spawn_with_merged_pipes(mut cmd: Command) -> io::Result<(Child, MergedOutput)> {
    use std::os::fd::OwnedFd;
    use tokio::net::unix::pipe;

    let (reader, writer) = std::io::pipe()?;
    cmd.stdout(writer.try_clone()?).stderr(writer);

    let child = cmd.spawn()?;
    let receiver = pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?;

    Ok((child, Box::new(receiver)))
}

#[cfg(not(unix))]
fn spawn_with_merged_pipes(mut cmd: Command) -> io::Result<(Child, MergedOutput)> {
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;

    const DUPLEX_CAPACITY: usize = 64 * 1024;

    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn()?;

    let (read_half, write_half) = tokio::io::duplex(DUPLEX_CAPACITY);
    let write_half = Arc::new(Mutex::new(write_half));

    async fn pump<R: AsyncRead + Unpin>(
        source: R,
        sink: Arc<Mutex<tokio::io::DuplexStream>>,
    ) {
        let mut reader = BufReader::new(source);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if sink.lock().await.write_all(&line).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump(stdout, Arc::clone(&write_half)));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump(stderr, write_half));
    }

    Ok((child, Box::new(read_half)))
}

/// Line reader over one run's merged output.
///
/// `close` wakes a reader blocked in [`OutputStream::read_line`] and drops the
/// underlying pipe.
pub struct OutputStream {
    reader: Mutex<Option<BufReader<MergedOutput>>>,
    closed: watch::Sender<bool>,
}

impl OutputStream {
    pub fn new(output: MergedOutput, capacity: usize) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            reader: Mutex::new(Some(BufReader::with_capacity(capacity, output))),
            closed,
        }
    }

    /// Read the next line without its terminator.
    ///
    /// `Ok(None)` means end of output or that the stream was closed.
    pub async fn read_line(&self) -> io::Result<Option<String>> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Ok(None);
        }

        let mut guard = self.reader.lock().await;
        let Some(reader) = guard.as_mut() else {
            return Ok(None);
        };

        let mut buf = Vec::new();
        tokio::select! {
            biased;

            _ = async { let _ = closed.wait_for(|c| *c).await; } => Ok(None),

            read = reader.read_until(b'\n', &mut buf) => {
                match read? {
                    0 => Ok(None),
                    _ => Ok(Some(decode_line(buf))),
                }
            }
        }
    }

    /// Signal any pending reader and release the pipe.
    pub async fn close(&self) {
        self.closed.send_replace(true);
        self.reader.lock().await.take();
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

/// Strip a trailing `\n` or `\r\n` and decode as UTF-8 (lossily).
fn decode_line(mut buf: Vec<u8>) -> String {
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }

    match String::from_utf8(buf) {
        Ok(line) => line,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}
