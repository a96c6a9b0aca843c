//! Shell executable resolution.

use std::path::Path;
use tracing::debug;

use crate::config::ShellFileConfig;
use crate::error::MuxError;

/// Picks the shell a new session runs.
///
/// Resolution order: an explicit override (which must exist), the
/// environment's default shell (if it exists on disk), then the fallback
/// list in order.
#[derive(Clone, Debug)]
pub struct ShellResolver {
    env_shell: Option<String>,
    fallbacks: Vec<String>,
}

impl ShellResolver {
    pub fn new(env_shell: Option<String>, fallbacks: Vec<String>) -> Self {
        Self {
            env_shell: env_shell.filter(|s| !s.is_empty()),
            fallbacks,
        }
    }

    /// Build a resolver reading the default shell from the configured env var.
    pub fn from_config(config: &ShellFileConfig) -> Self {
        Self::new(std::env::var(&config.env_var).ok(), config.fallbacks.clone())
    }

    pub fn resolve(&self, explicit: Option<&str>) -> Result<String, MuxError> {
        if let Some(shell) = explicit {
            if Path::new(shell).exists() {
                return Ok(shell.to_string());
            }
            return Err(MuxError::ShellNotFound(shell.to_string()));
        }

        if let Some(shell) = &self.env_shell {
            if Path::new(shell).exists() {
                return Ok(shell.clone());
            }
            debug!(shell = %shell, "default shell does not exist, trying fallbacks");
        }

        self.fallbacks
            .iter()
            .find(|candidate| Path::new(candidate).exists())
            .cloned()
            .ok_or_else(|| MuxError::NoShellAvailable {
                tried: self.fallbacks.clone(),
            })
    }
}

impl Default for ShellResolver {
    fn default() -> Self {
        Self::from_config(&ShellFileConfig::default())
    }
}
