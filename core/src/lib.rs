//! SiteLedger core
//!
//! Local-first sync engine for the SiteLedger timesheet app. Remote change
//! notifications are merged into a partitioned local record store, offline
//! writes are applied speculatively and reconciled once the backend confirms
//! them.

pub mod config;
pub mod domain;
pub mod infra;
pub mod service;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{
	filter::LevelFilter,
	fmt::{self, Layer},
	prelude::*,
	EnvFilter,
};

pub use config::{AppConfig, SyncConfig};
pub use domain::{ChangeEvent, ChangeKind, FieldKey, Record, Table};
pub use infra::event::{ChangeNotifier, TableChanged};
pub use infra::store::{FileStore, LocalStore, MemoryStore, RecordStore};
pub use infra::transport::{ChannelStatus, RealtimeTransport};
pub use service::sync::{NetworkStatus, RealtimeSyncService, SyncError, SyncStats};

#[cfg(debug_assertions)]
const CONSOLE_LOG_FILTER: LevelFilter = LevelFilter::DEBUG;

#[cfg(not(debug_assertions))]
const CONSOLE_LOG_FILTER: LevelFilter = LevelFilter::INFO;

/// Install the global tracing subscriber: console output plus a daily rolling
/// file under `<data_dir>/logs`. Keep the returned guard alive to flush the file.
pub fn init_logging(config: &AppConfig) -> Result<WorkerGuard> {
	let logs_dir = config.logs_dir();
	std::fs::create_dir_all(&logs_dir)?;

	let (non_blocking, guard) = tracing_appender::non_blocking(rolling::daily(&logs_dir, "siteledger.log"));

	let filter = EnvFilter::builder()
		.with_default_directive(config.log_level.parse()?)
		.from_env_lossy();

	tracing_subscriber::registry()
		.with(filter)
		.with(fmt::layer().with_filter(CONSOLE_LOG_FILTER))
		.with(
			Layer::default()
				.with_writer(non_blocking)
				.with_ansi(false)
				.with_filter(LevelFilter::DEBUG),
		)
		.try_init()?;

	Ok(guard)
}
