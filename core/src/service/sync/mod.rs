//! Realtime Sync Service - keeps the local cache in step with the backend
//!
//! Background service that subscribes to the backend's change feed and merges
//! every notification into local storage:
//! - one supervised channel carries all tables
//! - events are applied in delivery order by a single consumer task
//! - speculative offline records are retired when their confirmed copy arrives

pub mod dedup;
pub mod local_write;
pub mod metrics;
pub mod network;
pub mod reconciler;
pub mod resolver;
pub mod supervisor;

use crate::config::{AppConfig, SyncConfig};
use crate::domain::ChangeEvent;
use crate::infra::event::{ChangeNotifier, TableChanged};
use crate::infra::queue::MutationQueue;
use crate::infra::store::{FileStore, LocalStore, PendingDeletions, RecordStore, StoreError};
use crate::infra::transport::{RealtimeTransport, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use dedup::{suppress_duplicates, DuplicateSuppressor, Suppression};
pub use local_write::{LocalWriteError, LocalWriter};
pub use metrics::{SyncMetrics, SyncStats};
pub use network::{NetworkModeController, NetworkStatus};
pub use reconciler::{ChangeReconciler, Outcome, ReconcileError};
pub use resolver::{IdentityResolver, ResolutionSource, Resolved};
pub use supervisor::{ChannelSupervisor, SupervisorTimings};

#[derive(Debug, Error)]
pub enum SyncError {
	#[error("Sync service has been shut down")]
	ShutDown,

	#[error("Malformed change notification: {0}")]
	Decode(#[from] serde_json::Error),

	#[error("Change queue closed")]
	QueueClosed,

	#[error(transparent)]
	Transport(#[from] TransportError),

	#[error(transparent)]
	Reconcile(#[from] ReconcileError),

	#[error(transparent)]
	Store(#[from] StoreError),
}

/// Realtime sync service
///
/// Owns the channel supervisor, the network controller and the consumer task.
/// A service that has been shut down cannot be started again.
pub struct RealtimeSyncService {
	config: Arc<SyncConfig>,
	store: LocalStore,
	pending: PendingDeletions,
	notifier: ChangeNotifier,
	reconciler: ChangeReconciler,
	supervisor: ChannelSupervisor,
	network: Arc<NetworkModeController>,
	metrics: Arc<SyncMetrics>,

	events_tx: async_channel::Sender<ChangeEvent>,
	events_rx: async_channel::Receiver<ChangeEvent>,

	/// Whether the consumer task is running
	is_running: Arc<AtomicBool>,

	consumer: Mutex<Option<JoinHandle<()>>>,
	network_watch: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeSyncService {
	pub fn new(
		config: SyncConfig,
		backend: Arc<dyn RecordStore>,
		transport: Arc<dyn RealtimeTransport>,
	) -> Self {
		let config = Arc::new(config);
		let store = LocalStore::new(backend);
		let pending = PendingDeletions::new(store.clone(), config.pending_delete_ttl());
		let notifier = ChangeNotifier::new(config.notifier_capacity);
		let metrics = Arc::new(SyncMetrics::new());

		let reconciler = ChangeReconciler::new(
			store.clone(),
			IdentityResolver::new(store.clone(), pending.clone()),
			DuplicateSuppressor::new(store.clone()),
			notifier.clone(),
		);

		let (events_tx, events_rx) = async_channel::unbounded();
		let supervisor = ChannelSupervisor::new(
			transport,
			config.channel_name.clone(),
			events_tx.clone(),
			SupervisorTimings::from(config.as_ref()),
			metrics.clone(),
		);
		let network = Arc::new(NetworkModeController::with_status(
			supervisor.clone(),
			NetworkStatus::Online,
		));

		info!(
			channel = %config.channel_name,
			pending_delete_ttl_secs = config.pending_delete_ttl_secs,
			"Created realtime sync service"
		);

		Self {
			config,
			store,
			pending,
			notifier,
			reconciler,
			supervisor,
			network,
			metrics,
			events_tx,
			events_rx,
			is_running: Arc::new(AtomicBool::new(false)),
			consumer: Mutex::new(None),
			network_watch: Mutex::new(None),
		}
	}

	/// Build a service over the file store in the configured data directory
	pub fn open(config: &AppConfig, transport: Arc<dyn RealtimeTransport>) -> anyhow::Result<Self> {
		config.ensure_directories()?;
		let backend = FileStore::open(config.store_dir())?;
		Ok(Self::new(config.sync.clone(), Arc::new(backend), transport))
	}

	pub fn config(&self) -> &Arc<SyncConfig> {
		&self.config
	}

	pub fn store(&self) -> &LocalStore {
		&self.store
	}

	pub fn pending_deletions(&self) -> &PendingDeletions {
		&self.pending
	}

	pub fn supervisor(&self) -> &ChannelSupervisor {
		&self.supervisor
	}

	pub fn notifier(&self) -> &ChangeNotifier {
		&self.notifier
	}

	/// Subscribe to table change notifications
	pub fn subscribe_changes(&self) -> broadcast::Receiver<TableChanged> {
		self.notifier.subscribe()
	}

	pub fn metrics(&self) -> &Arc<SyncMetrics> {
		&self.metrics
	}

	pub fn stats(&self) -> SyncStats {
		self.metrics.snapshot()
	}

	pub fn is_running(&self) -> bool {
		self.is_running.load(Ordering::SeqCst)
	}

	/// Writer for optimistic local changes, queueing replays on `queue`
	pub fn local_writer(&self, queue: Arc<dyn MutationQueue>) -> LocalWriter {
		LocalWriter::new(self.store.clone(), self.pending.clone(), queue, self.notifier.clone())
	}

	/// Start consuming events and open the channel.
	///
	/// A backend that is unreachable at start is not an error: the supervisor
	/// keeps retrying on its fixed schedule.
	pub async fn start(&self) -> Result<(), SyncError> {
		if self.supervisor.is_shutdown() {
			return Err(SyncError::ShutDown);
		}
		if self.is_running.swap(true, Ordering::SeqCst) {
			warn!("Realtime sync service already running");
			return Ok(());
		}

		info!(channel = %self.config.channel_name, "Starting realtime sync service");

		match self.pending.prune_expired() {
			Ok(0) => {}
			Ok(pruned) => info!(pruned, "Pruned expired pending-deletion markers"),
			Err(e) => warn!(error = %e, "Failed to prune pending-deletion markers"),
		}

		let events = self.events_rx.clone();
		let reconciler = self.reconciler.clone();
		let metrics = self.metrics.clone();
		let is_running = self.is_running.clone();
		*self.consumer.lock().await = Some(tokio::spawn(async move {
			run_consumer(events, reconciler, metrics).await;
			is_running.store(false, Ordering::SeqCst);
		}));

		if let Err(e) = self.supervisor.start().await {
			warn!(error = %e, "Initial subscribe failed, retry scheduled");
		}

		info!("Realtime sync service started");
		Ok(())
	}

	/// Follow a connectivity feed in the background
	pub async fn watch_network(&self, statuses: watch::Receiver<NetworkStatus>) {
		let network = self.network.clone();
		let handle = tokio::spawn(async move {
			network.run(statuses).await;
		});
		if let Some(previous) = self.network_watch.lock().await.replace(handle) {
			previous.abort();
		}
	}

	/// Apply a connectivity transition directly
	pub async fn set_network_status(&self, status: NetworkStatus) {
		self.network.handle(status).await;
	}

	/// Decode a raw notification and queue it behind every event already received
	pub async fn ingest_json(&self, raw: &str) -> Result<(), SyncError> {
		let event: ChangeEvent = match serde_json::from_str(raw) {
			Ok(event) => event,
			Err(e) => {
				self.metrics.record_decode_failure();
				warn!(error = %e, "Dropping malformed change notification");
				return Err(e.into());
			}
		};
		self.enqueue(event).await
	}

	/// Queue an already decoded event
	pub async fn enqueue(&self, event: ChangeEvent) -> Result<(), SyncError> {
		self.events_tx
			.send(event)
			.await
			.map_err(|_| SyncError::QueueClosed)
	}

	/// Close the channel, stop reconnecting and drain the queue
	pub async fn shutdown(&self) {
		info!("Stopping realtime sync service");

		if let Some(handle) = self.network_watch.lock().await.take() {
			handle.abort();
		}

		self.supervisor.shutdown().await;

		// Closing the queue lets the consumer finish what was already delivered
		self.events_tx.close();
		if let Some(handle) = self.consumer.lock().await.take() {
			if let Err(e) = handle.await {
				error!(error = %e, "Change consumer task failed");
			}
		}

		self.is_running.store(false, Ordering::SeqCst);
		info!("Realtime sync service stopped");
	}
}

/// Apply events one at a time in delivery order until the queue closes
async fn run_consumer(
	events: async_channel::Receiver<ChangeEvent>,
	reconciler: ChangeReconciler,
	metrics: Arc<SyncMetrics>,
) {
	debug!("Change consumer started");

	while let Ok(event) = events.recv().await {
		metrics.record_received();
		match reconciler.apply(&event) {
			Ok(outcome) => metrics.record_outcome(&outcome),
			Err(e) => {
				metrics.record_failed();
				error!(
					table = %event.table,
					kind = %event.kind,
					error = %e,
					"Failed to reconcile change"
				);
			}
		}
	}

	debug!("Change consumer stopped");
}
