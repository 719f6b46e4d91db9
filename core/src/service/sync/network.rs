//! Connectivity transitions
//!
//! Going offline tears the channel down and silences the reconnect machinery;
//! coming back online opens a fresh channel. There is no debounce, so a
//! flapping link reopens the channel on every transition.

use super::supervisor::ChannelSupervisor;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use strum::Display;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NetworkStatus {
	Online,
	Offline,
}

pub struct NetworkModeController {
	supervisor: ChannelSupervisor,
	last: Mutex<Option<NetworkStatus>>,
}

impl NetworkModeController {
	pub fn new(supervisor: ChannelSupervisor) -> Self {
		Self {
			supervisor,
			last: Mutex::new(None),
		}
	}

	/// Controller that treats `status` as already applied
	pub fn with_status(supervisor: ChannelSupervisor, status: NetworkStatus) -> Self {
		Self {
			supervisor,
			last: Mutex::new(Some(status)),
		}
	}

	/// Apply a connectivity transition; repeating the current status does nothing
	pub async fn handle(&self, status: NetworkStatus) {
		{
			let mut last = self
				.last
				.lock()
				.unwrap_or_else(|poisoned| poisoned.into_inner());
			if *last == Some(status) {
				debug!(%status, "Network status unchanged");
				return;
			}
			*last = Some(status);
		}

		match status {
			NetworkStatus::Offline => {
				info!("Network offline, closing realtime channel");
				self.supervisor.set_offline(true);
				self.supervisor.cancel_reconnect();
				self.supervisor.close().await;
			}
			NetworkStatus::Online => {
				info!("Network online, opening realtime channel");
				self.supervisor.set_offline(false);
				if let Err(e) = self.supervisor.open().await {
					warn!(error = %e, "Failed to open realtime channel after reconnecting");
				}
			}
		}
	}

	/// Follow a status feed until its sender goes away
	pub async fn run(&self, mut statuses: watch::Receiver<NetworkStatus>) {
		let initial = *statuses.borrow_and_update();
		self.handle(initial).await;

		while statuses.changed().await.is_ok() {
			let status = *statuses.borrow_and_update();
			self.handle(status).await;
		}

		debug!("Network status feed closed");
	}
}
