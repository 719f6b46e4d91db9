//! Offline mutation queue contract
//!
//! Writes made while the channel is down are handed to a queue that replays
//! them against the backend once connectivity returns. The engine relies only
//! on eventual replay and on `correlation_id` staying stable, so the confirmed
//! record can later be matched against its speculative local copy.

use crate::domain::{ChangeKind, Table};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
	#[error("Mutation rejected: {0}")]
	Rejected(String),

	#[error("Queue lock poisoned")]
	Poisoned,
}

/// A write waiting to be replayed against the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
	pub kind: ChangeKind,
	pub table: Table,
	pub payload: Value,
	pub correlation_id: String,
	/// Human-readable description shown in pending-sync lists
	pub label: String,
}

pub trait MutationQueue: Send + Sync + 'static {
	fn enqueue(&self, mutation: PendingMutation) -> Result<(), QueueError>;
}

/// FIFO queue held in memory; the host drains it when it replays writes
#[derive(Debug, Default)]
pub struct MemoryQueue {
	pending: Mutex<VecDeque<PendingMutation>>,
}

impl MemoryQueue {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.pending.lock().map(|pending| pending.len()).unwrap_or(0)
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Remove and return every queued mutation in enqueue order
	pub fn drain(&self) -> Result<Vec<PendingMutation>, QueueError> {
		let mut pending = self.pending.lock().map_err(|_| QueueError::Poisoned)?;
		Ok(pending.drain(..).collect())
	}
}

impl MutationQueue for MemoryQueue {
	fn enqueue(&self, mutation: PendingMutation) -> Result<(), QueueError> {
		if mutation.correlation_id.is_empty() {
			return Err(QueueError::Rejected("empty correlation id".into()));
		}
		let mut pending = self.pending.lock().map_err(|_| QueueError::Poisoned)?;
		pending.push_back(mutation);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn mutation(correlation_id: &str) -> PendingMutation {
		PendingMutation {
			kind: ChangeKind::Insert,
			table: Table::Attendance,
			payload: json!({"record_id": correlation_id}),
			correlation_id: correlation_id.into(),
			label: "attendance".into(),
		}
	}

	#[test]
	fn test_drain_preserves_order() {
		let queue = MemoryQueue::new();
		queue.enqueue(mutation("local_1")).unwrap();
		queue.enqueue(mutation("local_2")).unwrap();
		assert_eq!(queue.len(), 2);

		let drained = queue.drain().unwrap();
		assert_eq!(drained[0].correlation_id, "local_1");
		assert_eq!(drained[1].correlation_id, "local_2");
		assert!(queue.is_empty());
	}

	#[test]
	fn test_rejects_empty_correlation_id() {
		let queue = MemoryQueue::new();
		assert!(matches!(queue.enqueue(mutation("")), Err(QueueError::Rejected(_))));
	}
}
