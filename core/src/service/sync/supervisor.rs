//! Realtime channel supervision
//!
//! Owns the one subscription channel and keeps it alive. Error, timeout and
//! unexpected close statuses schedule a resubscribe after a fixed delay. Two
//! flags suppress that: `is_closing` while the supervisor itself is tearing
//! the channel down, and `is_offline` while the network controller reports no
//! connectivity. Every timer re-checks state when it fires.
//!
//! Transports may report statuses from their own threads, so timers are
//! spawned on the runtime the supervisor was opened on, never on the caller's.

use super::metrics::SyncMetrics;
use crate::config::SyncConfig;
use crate::domain::{ChangeEvent, Table};
use crate::infra::transport::{
	ChannelStatus, RealtimeTransport, StatusSink, SubscribeRequest, SubscriptionId, TableFilter,
	TransportError,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Fixed delays driving the reconnect state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorTimings {
	pub reconnect_after_error: Duration,
	pub reconnect_after_timeout: Duration,
	pub reconnect_after_close: Duration,
	pub closing_grace: Duration,
}

impl From<&SyncConfig> for SupervisorTimings {
	fn from(config: &SyncConfig) -> Self {
		Self {
			reconnect_after_error: config.reconnect_after_error(),
			reconnect_after_timeout: config.reconnect_after_timeout(),
			reconnect_after_close: config.reconnect_after_close(),
			closing_grace: config.closing_grace(),
		}
	}
}

impl Default for SupervisorTimings {
	fn default() -> Self {
		Self::from(&SyncConfig::default())
	}
}

#[derive(Clone)]
pub struct ChannelSupervisor {
	inner: Arc<Inner>,
}

struct Inner {
	transport: Arc<dyn RealtimeTransport>,
	channel_name: String,
	filters: Vec<TableFilter>,
	events: async_channel::Sender<ChangeEvent>,
	timings: SupervisorTimings,
	metrics: Arc<SyncMetrics>,

	/// Runtime that owns the timers, captured at construction or first open
	runtime: OnceLock<Handle>,

	/// Active subscription, if any
	channel: tokio::sync::Mutex<Option<SubscriptionId>>,

	is_closing: AtomicBool,
	is_offline: AtomicBool,
	is_shutdown: AtomicBool,

	/// Bumped on every close so a stale grace timer leaves a newer close armed
	closing_epoch: AtomicU64,

	/// Bumped on every schedule or cancel so a superseded timer does nothing
	reconnect_generation: AtomicU64,
	pending_reconnect: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelSupervisor {
	pub fn new(
		transport: Arc<dyn RealtimeTransport>,
		channel_name: impl Into<String>,
		events: async_channel::Sender<ChangeEvent>,
		timings: SupervisorTimings,
		metrics: Arc<SyncMetrics>,
	) -> Self {
		Self {
			inner: Arc::new(Inner {
				transport,
				channel_name: channel_name.into(),
				filters: Table::all().map(TableFilter::all_events).collect(),
				events,
				timings,
				metrics,
				runtime: Handle::try_current().map(OnceLock::from).unwrap_or_default(),
				channel: tokio::sync::Mutex::new(None),
				is_closing: AtomicBool::new(false),
				is_offline: AtomicBool::new(false),
				is_shutdown: AtomicBool::new(false),
				closing_epoch: AtomicU64::new(0),
				reconnect_generation: AtomicU64::new(0),
				pending_reconnect: Mutex::new(None),
			}),
		}
	}

	fn from_inner(inner: Arc<Inner>) -> Self {
		Self { inner }
	}

	pub fn channel_name(&self) -> &str {
		&self.inner.channel_name
	}

	pub fn is_closing(&self) -> bool {
		self.inner.is_closing.load(Ordering::SeqCst)
	}

	pub fn is_offline(&self) -> bool {
		self.inner.is_offline.load(Ordering::SeqCst)
	}

	pub fn is_shutdown(&self) -> bool {
		self.inner.is_shutdown.load(Ordering::SeqCst)
	}

	pub fn set_offline(&self, offline: bool) {
		self.inner.is_offline.store(offline, Ordering::SeqCst);
	}

	/// Currently held subscription
	pub async fn active_channel(&self) -> Option<SubscriptionId> {
		*self.inner.channel.lock().await
	}

	pub fn has_pending_reconnect(&self) -> bool {
		self.pending_slot()
			.as_ref()
			.is_some_and(|handle| !handle.is_finished())
	}

	/// Open the channel unless offline
	pub async fn start(&self) -> Result<(), TransportError> {
		if self.is_offline() {
			info!(channel = %self.inner.channel_name, "Offline at start, channel deferred until online");
			return Ok(());
		}
		self.open().await
	}

	/// Replace any open channel with a fresh subscription.
	///
	/// Returns once the subscribe request is issued; confirmation arrives later as
	/// [`ChannelStatus::Subscribed`]. A failed subscribe schedules a retry the same
	/// way a channel error does, and the error is returned to the caller.
	pub async fn open(&self) -> Result<(), TransportError> {
		if self.is_shutdown() {
			debug!(channel = %self.inner.channel_name, "Supervisor shut down, not opening channel");
			return Ok(());
		}

		self.inner.runtime.get_or_init(Handle::current);

		let mut channel = self.inner.channel.lock().await;
		if let Some(previous) = channel.take() {
			debug!(channel = %self.inner.channel_name, subscription = %previous, "Closing previous channel before reopening");
			self.release(previous).await;
		}

		self.inner.metrics.record_subscribe_attempt();
		match self.inner.transport.subscribe(self.request()).await {
			Ok(id) => {
				info!(channel = %self.inner.channel_name, subscription = %id, "Subscribe request issued");
				*channel = Some(id);
				Ok(())
			}
			Err(e) => {
				drop(channel);
				warn!(channel = %self.inner.channel_name, error = %e, "Subscribe failed");
				self.handle_status(ChannelStatus::ChannelError);
				Err(e)
			}
		}
	}

	/// Intentionally tear down the active channel, if any
	pub async fn close(&self) {
		let mut channel = self.inner.channel.lock().await;
		if let Some(id) = channel.take() {
			self.release(id).await;
		}
	}

	/// Stop for good: no reconnects, no new channels
	pub async fn shutdown(&self) {
		self.inner.is_shutdown.store(true, Ordering::SeqCst);
		self.cancel_reconnect();
		self.close().await;
		info!(channel = %self.inner.channel_name, "Channel supervisor shut down");
	}

	/// React to a lifecycle status reported by the transport
	pub fn handle_status(&self, status: ChannelStatus) {
		let channel = &self.inner.channel_name;
		match status {
			ChannelStatus::Subscribed => {
				info!(%channel, "Realtime channel subscribed");
			}
			ChannelStatus::ChannelError | ChannelStatus::TimedOut => {
				if self.is_offline() || self.is_shutdown() {
					debug!(%channel, %status, "Ignoring channel failure while offline");
					return;
				}
				let delay = if status == ChannelStatus::ChannelError {
					self.inner.timings.reconnect_after_error
				} else {
					self.inner.timings.reconnect_after_timeout
				};
				warn!(%channel, %status, delay_ms = delay.as_millis() as u64, "Realtime channel failed, reconnecting");
				self.schedule_reconnect(delay);
			}
			ChannelStatus::Closed => {
				if self.is_closing() {
					debug!(%channel, "Channel closed by supervisor");
					return;
				}
				if self.is_offline() || self.is_shutdown() {
					debug!(%channel, "Channel closed while offline");
					return;
				}
				let delay = self.inner.timings.reconnect_after_close;
				warn!(%channel, delay_ms = delay.as_millis() as u64, "Realtime channel closed unexpectedly, reconnecting");
				self.schedule_reconnect(delay);
			}
		}
	}

	/// Drop the pending reconnect timer, if any
	pub fn cancel_reconnect(&self) {
		self.inner.reconnect_generation.fetch_add(1, Ordering::SeqCst);
		if let Some(handle) = self.pending_slot().take() {
			handle.abort();
			debug!(channel = %self.inner.channel_name, "Pending reconnect cancelled");
		}
	}

	fn schedule_reconnect(&self, delay: Duration) {
		let generation = self.inner.reconnect_generation.fetch_add(1, Ordering::SeqCst) + 1;
		self.inner.metrics.record_reconnect_scheduled();

		let weak = Arc::downgrade(&self.inner);
		let spawned = self.spawn(async move {
			tokio::time::sleep(delay).await;
			let Some(inner) = weak.upgrade() else {
				return;
			};
			let supervisor = ChannelSupervisor::from_inner(inner);

			{
				let mut slot = supervisor.pending_slot();
				if supervisor.inner.reconnect_generation.load(Ordering::SeqCst) != generation {
					return;
				}
				slot.take();
			}

			if supervisor.is_offline() || supervisor.is_shutdown() {
				debug!(channel = %supervisor.inner.channel_name, "Reconnect skipped, no longer wanted");
				return;
			}

			info!(channel = %supervisor.inner.channel_name, "Reconnecting realtime channel");
			if let Err(e) = supervisor.open().await {
				debug!(channel = %supervisor.inner.channel_name, error = %e, "Reconnect attempt failed");
			}
		});
		let Some(handle) = spawned else {
			return;
		};

		if let Some(previous) = self.pending_slot().replace(handle) {
			previous.abort();
		}
	}

	/// Unsubscribe with the closing flag armed, then disarm it after the grace period
	async fn release(&self, id: SubscriptionId) {
		self.inner.is_closing.store(true, Ordering::SeqCst);
		let epoch = self.inner.closing_epoch.fetch_add(1, Ordering::SeqCst) + 1;

		if let Err(e) = self.inner.transport.unsubscribe(id).await {
			warn!(channel = %self.inner.channel_name, subscription = %id, error = %e, "Unsubscribe failed");
		}

		let inner = self.inner.clone();
		self.spawn(async move {
			tokio::time::sleep(inner.timings.closing_grace).await;
			if inner.closing_epoch.load(Ordering::SeqCst) == epoch {
				inner.is_closing.store(false, Ordering::SeqCst);
			}
		});
	}

	/// Spawn a timer task on the supervisor's runtime, whatever thread calls this
	fn spawn<F>(&self, task: F) -> Option<JoinHandle<()>>
	where
		F: Future<Output = ()> + Send + 'static,
	{
		match self.inner.runtime.get() {
			Some(runtime) => Some(runtime.spawn(task)),
			None => {
				warn!(channel = %self.inner.channel_name, "No runtime available, timer dropped");
				None
			}
		}
	}

	fn request(&self) -> SubscribeRequest {
		let weak: Weak<Inner> = Arc::downgrade(&self.inner);
		SubscribeRequest {
			channel_name: self.inner.channel_name.clone(),
			filters: self.inner.filters.clone(),
			events: self.inner.events.clone(),
			status: StatusSink::new(move |status| {
				if let Some(inner) = weak.upgrade() {
					ChannelSupervisor::from_inner(inner).handle_status(status);
				}
			}),
		}
	}

	fn pending_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
		self.inner
			.pending_reconnect
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}

impl Drop for Inner {
	fn drop(&mut self) {
		if let Some(handle) = self
			.pending_reconnect
			.get_mut()
			.ok()
			.and_then(|slot| slot.take())
		{
			handle.abort();
		}
	}
}
