//! Realtime notification transport boundary
//!
//! The remote backend multiplexes change notifications for every table over one
//! logical channel. Implementations push decoded events into the request's
//! event sender and report lifecycle transitions through its [`StatusSink`].

use crate::domain::{ChangeEvent, ChangeKind, Table};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use strum::{AsRefStr, Display};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TransportError {
	#[error("Transport unavailable: {0}")]
	Unavailable(String),

	#[error("Subscription rejected: {0}")]
	Rejected(String),

	#[error("Unknown subscription {0}")]
	UnknownSubscription(SubscriptionId),
}

/// Subscription lifecycle as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
	Subscribed,
	ChannelError,
	TimedOut,
	Closed,
}

/// Which operations of a table a subscription receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventFilter {
	All,
	Only(ChangeKind),
}

impl EventFilter {
	pub fn matches(&self, kind: ChangeKind) -> bool {
		match self {
			EventFilter::All => true,
			EventFilter::Only(only) => *only == kind,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFilter {
	pub table: Table,
	pub events: EventFilter,
}

impl TableFilter {
	pub fn all_events(table: Table) -> Self {
		Self {
			table,
			events: EventFilter::All,
		}
	}

	pub fn matches(&self, event: &ChangeEvent) -> bool {
		self.table == event.table && self.events.matches(event.kind)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for SubscriptionId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for SubscriptionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

/// Callback through which a transport reports [`ChannelStatus`] transitions
#[derive(Clone)]
pub struct StatusSink {
	callback: Arc<dyn Fn(ChannelStatus) + Send + Sync>,
}

impl StatusSink {
	pub fn new(callback: impl Fn(ChannelStatus) + Send + Sync + 'static) -> Self {
		Self {
			callback: Arc::new(callback),
		}
	}

	pub fn report(&self, status: ChannelStatus) {
		(self.callback)(status);
	}
}

impl fmt::Debug for StatusSink {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("StatusSink").finish_non_exhaustive()
	}
}

/// Everything a transport needs to open one channel
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
	pub channel_name: String,
	pub filters: Vec<TableFilter>,
	pub events: async_channel::Sender<ChangeEvent>,
	pub status: StatusSink,
}

impl SubscribeRequest {
	/// Whether an event passes this request's table filters
	pub fn accepts(&self, event: &ChangeEvent) -> bool {
		self.filters.iter().any(|filter| filter.matches(event))
	}
}

#[async_trait]
pub trait RealtimeTransport: Send + Sync + 'static {
	/// Open a channel. Confirmation arrives later as [`ChannelStatus::Subscribed`].
	async fn subscribe(&self, request: SubscribeRequest) -> Result<SubscriptionId, TransportError>;

	/// Release a channel. The backend may still report [`ChannelStatus::Closed`] afterwards.
	async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), TransportError>;
}
