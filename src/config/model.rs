// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [launch]
/// buffer_capacity = 16384
/// inherit_env = false
/// kill_on_drop = true
///
/// [launch.env]
/// LANG = "C.UTF-8"
/// ```
///
/// The `[launch]` section is optional; every field has a default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub launch: LaunchConfig,
}

/// How a [`ReadOnlyProcess`](crate::ReadOnlyProcess) launches its executable.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Capacity in bytes of the line reader wrapped around the merged output.
    pub buffer_capacity: usize,

    /// Whether the child inherits the parent's environment.
    pub inherit_env: bool,

    /// Extra environment variables set on the child.
    pub env: BTreeMap<String, String>,

    /// Kill the child if its handle is dropped without an explicit close.
    pub kill_on_drop: bool,
}

pub const DEFAULT_BUFFER_CAPACITY: usize = 8 * 1024;

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            inherit_env: true,
            env: BTreeMap::new(),
            kill_on_drop: true,
        }
    }
}

impl LaunchConfig {
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_inherit_env(mut self, inherit: bool) -> Self {
        self.inherit_env = inherit;
        self
    }
}
