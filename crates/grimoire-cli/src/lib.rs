pub mod app_config;
pub mod logging;
pub mod world;

pub use app_config::{AppConfig, LoggingConfig, WorldConfig};
pub use world::{host_builder, World, WorldStats};
