use std::fs;
use std::path::{Path, PathBuf};

use grimoire_host::{ConfigError, EngineConfig, ProjectPaths};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const APP_NAME: &str = "grimoire";

/// Settings of the simulated world
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Milliseconds between world ticks
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Maps created at startup, each with its own script session
    #[serde(default)]
    pub maps: Vec<u32>,

    /// Players logged in at startup
    #[serde(default = "default_players")]
    pub players: Vec<String>,
}

fn default_tick_ms() -> u64 {
    100
}

fn default_players() -> Vec<String> {
    vec!["Alice".to_string()]
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            maps: Vec::new(),
            players: default_players(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to <data dir>/logs/grimoire.log
    #[serde(default)]
    pub file: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scripting: EngineConfig,

    #[serde(default)]
    pub world: WorldConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

const EXAMPLE_CONFIG: &str = r#"# Grimoire Configuration

[scripting]
enabled = true
# script_dir = "~/.local/share/grimoire/lua_scripts"
map_sessions = true
hot_reload = false

[world]
tick_ms = 100
maps = [0, 1]
players = ["Alice", "Bob"]

[logging]
file = false
"#;

impl AppConfig {
    /// Default location, `None` when no home directory can be found
    pub fn default_path() -> Option<PathBuf> {
        ProjectPaths::new(APP_NAME).map(|p| p.config_dir().join("config.toml"))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load `path`, writing the example config there first if it does not exist
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            write_example_config(path)?;
        }
        Self::load(path)
    }
}

fn write_example_config(path: &Path) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, EXAMPLE_CONFIG).map_err(io_err)?;
    info!("Created example config at {}", path.display());
    Ok(())
}
