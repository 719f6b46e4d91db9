//! Application configuration management

pub mod app_config;
pub mod migration;

pub use app_config::{AppConfig, SyncConfig, CONFIG_FILE_NAME};
pub use migration::Migrate;
