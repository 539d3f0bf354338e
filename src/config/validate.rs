// src/config/validate.rs

use crate::config::model::LaunchConfig;
use crate::errors::{ProcstreamError, Result};

impl LaunchConfig {
    /// Reject values that would make every launch fail.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 {
            return Err(ProcstreamError::ConfigError(
                "[launch].buffer_capacity must be >= 1 (got 0)".to_string(),
            ));
        }

        for key in self.env.keys() {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(ProcstreamError::ConfigError(format!(
                    "[launch.env] has invalid variable name '{}'",
                    key
                )));
            }
        }

        Ok(())
    }
}
