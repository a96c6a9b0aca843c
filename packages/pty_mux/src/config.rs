use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::scrollback::DEFAULT_MAX_LINES;

// =============================================================================
// Layered config: struct defaults → optional TOML file → PTYMUX_* env vars
// =============================================================================
//
//   config.toml:     [scrollback]
//                    max_lines = 5000
//
//   env var:         PTYMUX_SCROLLBACK__MAX_LINES=5000   (double underscore = nesting)

/// Top-level configuration for a session registry.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MuxConfig {
    #[serde(default)]
    pub scrollback: ScrollbackFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
    #[serde(default)]
    pub shell: ShellFileConfig,
}

/// Lives under `[scrollback]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScrollbackFileConfig {
    /// Terminated lines kept per session
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
}

impl Default for ScrollbackFileConfig {
    fn default() -> Self {
        Self {
            max_lines: default_max_lines(),
        }
    }
}

/// Defaults for sessions whose create options leave fields unset (`[session]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFileConfig {
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
    /// Working directory; the host process's cwd when unset
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default = "default_term")]
    pub term: String,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            cols: default_cols(),
            rows: default_rows(),
            cwd: None,
            term: default_term(),
        }
    }
}

impl SessionFileConfig {
    pub fn resolved_cwd(&self) -> String {
        self.cwd
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("/"))
            .to_string_lossy()
            .to_string()
    }
}

/// Shell resolution inputs (`[shell]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShellFileConfig {
    /// Environment variable naming the user's default shell
    #[serde(default = "default_shell_env_var")]
    pub env_var: String,
    #[serde(default = "default_fallbacks")]
    pub fallbacks: Vec<String>,
}

impl Default for ShellFileConfig {
    fn default() -> Self {
        Self {
            env_var: default_shell_env_var(),
            fallbacks: default_fallbacks(),
        }
    }
}

fn default_max_lines() -> usize {
    DEFAULT_MAX_LINES
}
fn default_cols() -> u16 {
    80
}
fn default_rows() -> u16 {
    24
}
fn default_term() -> String {
    "xterm-256color".to_string()
}
fn default_shell_env_var() -> String {
    "SHELL".to_string()
}
fn default_fallbacks() -> Vec<String> {
    ["/bin/zsh", "/bin/bash", "/bin/sh"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Build the figment: defaults → `config_file` (if given) → `PTYMUX_` env vars.
pub fn load_config(config_file: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut figment = Figment::from(Serialized::defaults(MuxConfig::default()));
    if let Some(path) = config_file {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed("PTYMUX_").split("__"))
}

impl MuxConfig {
    pub fn load(config_file: Option<&Path>) -> Result<Self, figment::Error> {
        load_config(config_file).extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::providers::{Format, Toml};

    #[test]
    fn defaults() {
        let config = MuxConfig::default();
        assert_eq!(config.scrollback.max_lines, 10_000);
        assert_eq!(config.session.cols, 80);
        assert_eq!(config.session.rows, 24);
        assert_eq!(config.shell.env_var, "SHELL");
        assert_eq!(config.shell.fallbacks.last().map(String::as_str), Some("/bin/sh"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: MuxConfig = figment::Figment::from(figment::providers::Serialized::defaults(
            MuxConfig::default(),
        ))
        .merge(Toml::string(
            r#"
            [scrollback]
            max_lines = 50

            [session]
            cwd = "/tmp"
            "#,
        ))
        .extract()
        .unwrap();

        assert_eq!(config.scrollback.max_lines, 50);
        assert_eq!(config.session.cwd, Some(PathBuf::from("/tmp")));
        assert_eq!(config.session.cols, 80);
        assert_eq!(config.session.term, "xterm-256color");
    }

    #[test]
    fn file_layer_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ptymux.toml");
        std::fs::write(&path, "[shell]\nfallbacks = [\"/bin/sh\"]\n").unwrap();

        let config: MuxConfig = load_config(Some(&path)).extract().unwrap();
        assert_eq!(config.shell.fallbacks, vec!["/bin/sh".to_string()]);
    }

    #[test]
    fn resolved_cwd_prefers_configured() {
        let session = SessionFileConfig {
            cwd: Some(PathBuf::from("/srv/work")),
            ..Default::default()
        };
        assert_eq!(session.resolved_cwd(), "/srv/work");
    }
}
