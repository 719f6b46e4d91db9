//! Change notifications for presentation layers
//!
//! After a change is reconciled into local storage, the engine announces which
//! table and partition moved so views can refresh. Delivery is fire-and-forget:
//! the local store is the source of truth, so a notification nobody hears only
//! delays a refresh.

use crate::domain::{FieldKey, Table};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Default capacity of the notification channel
pub const DEFAULT_CAPACITY: usize = 1024;

/// A logical table changed in local storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableChanged {
	pub table: Table,
	/// Partition that changed; `None` after a cross-partition sweep
	pub partition: Option<FieldKey>,
	pub timestamp: DateTime<Utc>,
}

impl TableChanged {
	pub fn new(table: Table, partition: Option<FieldKey>) -> Self {
		Self {
			table,
			partition,
			timestamp: Utc::now(),
		}
	}
}

/// Broadcast bus for [`TableChanged`] notifications
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
	sender: broadcast::Sender<TableChanged>,
}

impl ChangeNotifier {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity.max(1));
		Self { sender }
	}

	/// Announce a change; returns the number of subscribers that received it
	pub fn emit(&self, event: TableChanged) -> usize {
		let table = event.table;
		let partition = event.partition.clone();

		match self.sender.send(event) {
			Ok(count) => {
				debug!(
					%table,
					partition = ?partition,
					subscribers = count,
					"Table change emitted"
				);
				count
			}
			Err(_) => {
				// Nobody listening, the store already holds the data
				debug!(%table, partition = ?partition, "Table change emitted but no subscribers");
				0
			}
		}
	}

	pub fn subscribe(&self) -> broadcast::Receiver<TableChanged> {
		self.sender.subscribe()
	}

	pub fn subscriber_count(&self) -> usize {
		self.sender.receiver_count()
	}
}

impl Default for ChangeNotifier {
	fn default() -> Self {
		Self::new(DEFAULT_CAPACITY)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_emit_with_no_subscribers() {
		let notifier = ChangeNotifier::default();
		assert_eq!(notifier.subscriber_count(), 0);
		assert_eq!(
			notifier.emit(TableChanged::new(Table::Attendance, Some(FieldKey::new("P1")))),
			0
		);
	}

	#[tokio::test]
	async fn test_emit_reaches_every_subscriber() {
		let notifier = ChangeNotifier::default();
		let mut first = notifier.subscribe();
		let mut second = notifier.subscribe();

		let count = notifier.emit(TableChanged::new(Table::Employee, None));
		assert_eq!(count, 2);

		let a = first.recv().await.unwrap();
		let b = second.recv().await.unwrap();
		assert_eq!(a.table, Table::Employee);
		assert!(a.partition.is_none());
		assert_eq!(a, b);
	}

	#[tokio::test]
	async fn test_lag_with_small_capacity() {
		let notifier = ChangeNotifier::new(2);
		let mut subscriber = notifier.subscribe();

		for _ in 0..10 {
			notifier.emit(TableChanged::new(Table::Expense, Some(FieldKey::new("P1"))));
		}

		match subscriber.recv().await {
			Err(broadcast::error::RecvError::Lagged(skipped)) => assert!(skipped > 0),
			other => panic!("Expected lag error, got {other:?}"),
		}
	}
}
