// src/errors.rs

//! Crate-wide error aliases and helpers.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcstreamError {
    #[error("failed to start '{}': {source}", program.display())]
    Start {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("reading process output failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("waiting for process exit failed: {0}")]
    Wait(#[source] Arc<std::io::Error>),

    #[error("failed to release process resources: {0}")]
    Dispose(#[source] std::io::Error),

    #[error("background worker failed: {0}")]
    Worker(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ProcstreamError>;
