use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::paths::{expand_home, ProjectPaths};

/// Default script directory name, relative to the data directory
pub const DEFAULT_SCRIPT_DIR: &str = "lua_scripts";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Process-wide scripting configuration, loaded once and shared read-only by every session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Whether scripting is enabled at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory containing scripts (default: <data dir>/lua_scripts)
    #[serde(default)]
    pub script_dir: Option<PathBuf>,

    /// Keep stack tracebacks in logged script errors
    #[serde(default)]
    pub traceback: bool,

    /// Whether maps get their own script session
    #[serde(default = "default_true")]
    pub map_sessions: bool,

    /// Reload automatically when script files change
    #[serde(default)]
    pub hot_reload: bool,

    /// Hot reload scan interval in milliseconds
    #[serde(default = "default_hot_reload_interval")]
    pub hot_reload_interval_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_hot_reload_interval() -> u64 {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            script_dir: None,
            traceback: false,
            map_sessions: true,
            hot_reload: false,
            hot_reload_interval_ms: default_hot_reload_interval(),
        }
    }
}

impl EngineConfig {
    /// Script directory with `~` expanded (use provided or default)
    pub fn script_dir(&self) -> PathBuf {
        match &self.script_dir {
            Some(dir) => expand_home(dir),
            None => ProjectPaths::new("grimoire")
                .map(|p| p.data_dir().join(DEFAULT_SCRIPT_DIR))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SCRIPT_DIR)),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert!(config.enabled);
        assert!(config.map_sessions);
        assert!(!config.traceback);
        assert!(!config.hot_reload);
        assert_eq!(config.hot_reload_interval_ms, 1000);
        assert!(config.script_dir().ends_with(DEFAULT_SCRIPT_DIR));
    }

    #[test]
    fn test_explicit_values() {
        let config = EngineConfig::from_toml_str(
            r#"
            enabled = false
            script_dir = "/srv/scripts"
            traceback = true
            "#,
        )
        .unwrap();
        assert!(!config.enabled);
        assert!(config.traceback);
        assert_eq!(config.script_dir(), PathBuf::from("/srv/scripts"));
    }

    #[test]
    fn test_parse_error() {
        let err = EngineConfig::from_toml_str("enabled = \"yes\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
