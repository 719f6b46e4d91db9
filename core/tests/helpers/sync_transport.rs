//! Mock realtime transport for sync integration tests

use async_trait::async_trait;
use sl_core::domain::ChangeEvent;
use sl_core::infra::transport::{
	ChannelStatus, RealtimeTransport, SubscribeRequest, SubscriptionId, TransportError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-process transport that records every call and lets tests drive statuses
pub struct MockTransport {
	active: Mutex<Vec<(SubscriptionId, SubscribeRequest)>>,
	/// Most recent request, kept after unsubscribe so late statuses can still be reported
	last_request: Mutex<Option<SubscribeRequest>>,
	subscribe_calls: AtomicUsize,
	unsubscribe_calls: AtomicUsize,
	failures_pending: AtomicUsize,
	/// Report CLOSED synchronously from `unsubscribe`, like the real backend does
	close_on_unsubscribe: bool,
}

impl MockTransport {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::build(true))
	}

	/// Transport whose `unsubscribe` stays silent
	pub fn quiet() -> Arc<Self> {
		Arc::new(Self::build(false))
	}

	fn build(close_on_unsubscribe: bool) -> Self {
		Self {
			active: Mutex::new(Vec::new()),
			last_request: Mutex::new(None),
			subscribe_calls: AtomicUsize::new(0),
			unsubscribe_calls: AtomicUsize::new(0),
			failures_pending: AtomicUsize::new(0),
			close_on_unsubscribe,
		}
	}

	/// Make the next `count` subscribe calls fail
	pub fn fail_next_subscribes(&self, count: usize) {
		self.failures_pending.store(count, Ordering::SeqCst);
	}

	pub fn subscribe_calls(&self) -> usize {
		self.subscribe_calls.load(Ordering::SeqCst)
	}

	pub fn unsubscribe_calls(&self) -> usize {
		self.unsubscribe_calls.load(Ordering::SeqCst)
	}

	pub fn active_channels(&self) -> usize {
		self.active.lock().unwrap().len()
	}

	pub fn last_request(&self) -> Option<SubscribeRequest> {
		self.last_request.lock().unwrap().clone()
	}

	/// Report a status on the most recent channel
	pub fn report(&self, status: ChannelStatus) {
		let request = self.last_request().expect("no channel was ever subscribed");
		request.status.report(status);
	}

	/// Deliver an event on every active channel that accepts it; returns deliveries
	pub async fn push(&self, event: ChangeEvent) -> usize {
		let senders: Vec<_> = self
			.active
			.lock()
			.unwrap()
			.iter()
			.filter(|(_, request)| request.accepts(&event))
			.map(|(_, request)| request.events.clone())
			.collect();

		let mut delivered = 0;
		for sender in senders {
			if sender.send(event.clone()).await.is_ok() {
				delivered += 1;
			}
		}
		delivered
	}
}

#[async_trait]
impl RealtimeTransport for MockTransport {
	async fn subscribe(&self, request: SubscribeRequest) -> Result<SubscriptionId, TransportError> {
		self.subscribe_calls.fetch_add(1, Ordering::SeqCst);

		let failing = self
			.failures_pending
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();
		if failing {
			tracing::debug!("[MockTransport] Failing subscribe");
			return Err(TransportError::Unavailable("mock failure".into()));
		}

		let id = SubscriptionId::new();
		*self.last_request.lock().unwrap() = Some(request.clone());
		self.active.lock().unwrap().push((id, request));
		tracing::debug!(subscription = %id, "[MockTransport] Subscribed");
		Ok(id)
	}

	async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), TransportError> {
		self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);

		let removed = {
			let mut active = self.active.lock().unwrap();
			let index = active
				.iter()
				.position(|(active_id, _)| *active_id == id)
				.ok_or(TransportError::UnknownSubscription(id))?;
			active.remove(index)
		};

		tracing::debug!(subscription = %id, "[MockTransport] Unsubscribed");
		if self.close_on_unsubscribe {
			removed.1.status.report(ChannelStatus::Closed);
		}
		Ok(())
	}
}
