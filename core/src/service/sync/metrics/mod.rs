//! Sync counters
//!
//! Lock-free counters updated by the consumer task and the channel supervisor,
//! read through [`SyncStats`] snapshots.

use super::reconciler::Outcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SyncMetrics {
	pub events_received: AtomicU64,
	pub events_applied: AtomicU64,
	/// Redelivered inserts and updates for unknown records
	pub events_skipped: AtomicU64,
	/// Events whose partition could not be determined
	pub events_unresolved: AtomicU64,
	pub events_failed: AtomicU64,
	pub decode_failures: AtomicU64,
	pub duplicates_suppressed: AtomicU64,
	pub sweeps: AtomicU64,
	pub reconnects_scheduled: AtomicU64,
	pub subscribe_attempts: AtomicU64,
}

impl SyncMetrics {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn record_received(&self) {
		self.events_received.fetch_add(1, Ordering::Relaxed);
	}

	/// Record the outcome of one reconciled event
	pub fn record_outcome(&self, outcome: &Outcome) {
		match outcome {
			Outcome::Inserted { suppressed, .. } => {
				self.events_applied.fetch_add(1, Ordering::Relaxed);
				self.duplicates_suppressed
					.fetch_add(*suppressed as u64, Ordering::Relaxed);
			}
			Outcome::Updated { .. } | Outcome::Deleted { .. } => {
				self.events_applied.fetch_add(1, Ordering::Relaxed);
			}
			Outcome::Swept { .. } => {
				self.events_applied.fetch_add(1, Ordering::Relaxed);
				self.sweeps.fetch_add(1, Ordering::Relaxed);
			}
			Outcome::AlreadyPresent { .. } | Outcome::UpdateDropped { .. } => {
				self.events_skipped.fetch_add(1, Ordering::Relaxed);
			}
			Outcome::Unresolved => {
				self.events_unresolved.fetch_add(1, Ordering::Relaxed);
			}
		}
	}

	pub fn record_failed(&self) {
		self.events_failed.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_decode_failure(&self) {
		self.decode_failures.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_reconnect_scheduled(&self) {
		self.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_subscribe_attempt(&self) {
		self.subscribe_attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub fn snapshot(&self) -> SyncStats {
		SyncStats {
			events_received: self.events_received.load(Ordering::Relaxed),
			events_applied: self.events_applied.load(Ordering::Relaxed),
			events_skipped: self.events_skipped.load(Ordering::Relaxed),
			events_unresolved: self.events_unresolved.load(Ordering::Relaxed),
			events_failed: self.events_failed.load(Ordering::Relaxed),
			decode_failures: self.decode_failures.load(Ordering::Relaxed),
			duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
			sweeps: self.sweeps.load(Ordering::Relaxed),
			reconnects_scheduled: self.reconnects_scheduled.load(Ordering::Relaxed),
			subscribe_attempts: self.subscribe_attempts.load(Ordering::Relaxed),
			taken_at: Utc::now(),
		}
	}
}

/// Point-in-time copy of [`SyncMetrics`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
	pub events_received: u64,
	pub events_applied: u64,
	pub events_skipped: u64,
	pub events_unresolved: u64,
	pub events_failed: u64,
	pub decode_failures: u64,
	pub duplicates_suppressed: u64,
	pub sweeps: u64,
	pub reconnects_scheduled: u64,
	pub subscribe_attempts: u64,
	pub taken_at: DateTime<Utc>,
}

impl SyncStats {
	/// Events the consumer has finished with, whatever the outcome
	pub fn processed(&self) -> u64 {
		self.events_applied + self.events_skipped + self.events_unresolved + self.events_failed
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::domain::FieldKey;

	#[test]
	fn test_outcomes_land_in_the_right_counters() {
		let metrics = SyncMetrics::new();
		let partition = FieldKey::new("P1");

		metrics.record_outcome(&Outcome::Inserted {
			partition: partition.clone(),
			suppressed: 2,
		});
		metrics.record_outcome(&Outcome::AlreadyPresent {
			partition: partition.clone(),
		});
		metrics.record_outcome(&Outcome::Swept { removed_from: 3 });
		metrics.record_outcome(&Outcome::Unresolved);
		metrics.record_failed();

		let stats = metrics.snapshot();
		assert_eq!(stats.events_applied, 2);
		assert_eq!(stats.events_skipped, 1);
		assert_eq!(stats.duplicates_suppressed, 2);
		assert_eq!(stats.sweeps, 1);
		assert_eq!(stats.events_unresolved, 1);
		assert_eq!(stats.events_failed, 1);
	}
}
