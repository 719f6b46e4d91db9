//! Application configuration

use super::migration::Migrate;
use crate::infra::event::DEFAULT_CAPACITY;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// File name of the configuration inside the data directory
pub const CONFIG_FILE_NAME: &str = "siteledger.json";

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
	/// Config schema version
	pub version: u32,

	/// Data directory path
	pub data_dir: PathBuf,

	/// Default tracing directive, overridable through `RUST_LOG`
	pub log_level: String,

	/// Realtime sync configuration
	#[serde(default)]
	pub sync: SyncConfig,
}

/// Realtime channel and reconciliation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
	/// Name of the multiplexed realtime channel
	pub channel_name: String,

	/// Delay before resubscribing after CHANNEL_ERROR (ms)
	pub reconnect_after_error_ms: u64,

	/// Delay before resubscribing after TIMED_OUT (ms)
	pub reconnect_after_timeout_ms: u64,

	/// Delay before resubscribing after an unexpected CLOSED (ms)
	pub reconnect_after_close_ms: u64,

	/// How long a self-initiated close suppresses reconnects (ms)
	pub closing_grace_ms: u64,

	/// Age after which a pending-deletion marker is ignored (s)
	pub pending_delete_ttl_secs: u64,

	/// Capacity of the change notification channel
	pub notifier_capacity: usize,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			channel_name: "siteledger-realtime".to_string(),
			reconnect_after_error_ms: 5_000,
			reconnect_after_timeout_ms: 3_000,
			reconnect_after_close_ms: 5_000,
			closing_grace_ms: 1_000,
			pending_delete_ttl_secs: 300,
			notifier_capacity: DEFAULT_CAPACITY,
		}
	}
}

impl SyncConfig {
	pub fn reconnect_after_error(&self) -> Duration {
		Duration::from_millis(self.reconnect_after_error_ms)
	}

	pub fn reconnect_after_timeout(&self) -> Duration {
		Duration::from_millis(self.reconnect_after_timeout_ms)
	}

	pub fn reconnect_after_close(&self) -> Duration {
		Duration::from_millis(self.reconnect_after_close_ms)
	}

	pub fn closing_grace(&self) -> Duration {
		Duration::from_millis(self.closing_grace_ms)
	}

	pub fn pending_delete_ttl(&self) -> chrono::Duration {
		chrono::Duration::seconds(i64::try_from(self.pending_delete_ttl_secs).unwrap_or(i64::MAX))
	}
}

impl AppConfig {
	/// Load configuration from the default location
	pub fn load() -> Result<Self> {
		let data_dir = sl_config::default_data_dir()?;
		Self::load_from(&data_dir)
	}

	/// Load configuration from a specific data directory, creating a default one if absent
	pub fn load_from(data_dir: &Path) -> Result<Self> {
		let config_path = data_dir.join(CONFIG_FILE_NAME);

		if config_path.exists() {
			info!("Loading config from {:?}", config_path);
			let json = fs::read_to_string(&config_path)
				.with_context(|| format!("Failed to read {}", config_path.display()))?;
			let mut config: AppConfig = serde_json::from_str(&json)
				.with_context(|| format!("Failed to parse {}", config_path.display()))?;

			if config.needs_migration() {
				info!(
					"Migrating config from v{} to v{}",
					config.version,
					Self::target_version()
				);
				config.migrate()?;
				config.save()?;
			}

			Ok(config)
		} else {
			warn!("No config found, creating default at {:?}", config_path);
			let config = Self::default_with_dir(data_dir.to_path_buf());
			config.save()?;
			Ok(config)
		}
	}

	/// Create default configuration with specific data directory
	pub fn default_with_dir(data_dir: PathBuf) -> Self {
		Self {
			version: Self::target_version(),
			data_dir,
			log_level: "info".to_string(),
			sync: SyncConfig::default(),
		}
	}

	/// Save configuration to disk
	pub fn save(&self) -> Result<()> {
		fs::create_dir_all(&self.data_dir)?;

		let config_path = self.data_dir.join(CONFIG_FILE_NAME);
		let json = serde_json::to_string_pretty(self)?;
		fs::write(&config_path, json)?;
		info!("Saved config to {:?}", config_path);
		Ok(())
	}

	/// Get the path for the record store directory
	pub fn store_dir(&self) -> PathBuf {
		sl_config::store_dir(&self.data_dir)
	}

	/// Get the path for logs directory
	pub fn logs_dir(&self) -> PathBuf {
		sl_config::logs_dir(&self.data_dir)
	}

	/// Ensure all required directories exist
	pub fn ensure_directories(&self) -> Result<()> {
		fs::create_dir_all(&self.data_dir)?;
		fs::create_dir_all(self.store_dir())?;
		fs::create_dir_all(self.logs_dir())?;
		Ok(())
	}
}

impl Migrate for AppConfig {
	fn current_version(&self) -> u32 {
		self.version
	}

	fn target_version() -> u32 {
		2
	}

	fn migrate(&mut self) -> Result<()> {
		match self.version {
			0 => {
				self.version = 1;
				self.migrate()
			}
			1 => {
				// v2 split the reconnect delay per status
				self.sync = SyncConfig::default();
				self.version = 2;
				Ok(())
			}
			2 => Ok(()),
			v => Err(anyhow!("Unknown config version: {}", v)),
		}
	}
}
