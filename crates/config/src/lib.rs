use anyhow::{anyhow, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the platform data directory
pub const DATA_DIR_ENV: &str = "SITELEDGER_DATA_DIR";

/// Platform-specific data directory resolution
pub fn default_data_dir() -> Result<PathBuf> {
	if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
		return ensure_dir(PathBuf::from(dir));
	}

	#[cfg(target_os = "macos")]
	let dir = dirs::data_dir()
		.ok_or_else(|| anyhow!("Could not determine data directory"))?
		.join("SiteLedger");

	#[cfg(target_os = "windows")]
	let dir = dirs::data_dir()
		.ok_or_else(|| anyhow!("Could not determine data directory"))?
		.join("SiteLedger");

	#[cfg(not(any(target_os = "macos", target_os = "windows")))]
	let dir = dirs::data_local_dir()
		.ok_or_else(|| anyhow!("Could not determine data directory"))?
		.join("siteledger");

	ensure_dir(dir)
}

/// Directory holding the local record store files
pub fn store_dir(data_dir: &Path) -> PathBuf {
	data_dir.join("store")
}

/// Directory holding rolling log files
pub fn logs_dir(data_dir: &Path) -> PathBuf {
	data_dir.join("logs")
}

fn ensure_dir(dir: PathBuf) -> Result<PathBuf> {
	// Create directory if it doesn't exist
	fs::create_dir_all(&dir)?;

	Ok(dir)
}
