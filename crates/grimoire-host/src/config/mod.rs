pub mod engine_config;
pub mod paths;

pub use engine_config::{ConfigError, EngineConfig};
pub use paths::ProjectPaths;
