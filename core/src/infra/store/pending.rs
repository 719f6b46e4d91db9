//! Pending-deletion markers
//!
//! Some backends deliver delete notifications with the identity field only.
//! Right before issuing a delete, the writer records which partition the record
//! lived in; the resolver consumes that marker when the notification arrives.

use super::{LocalStore, StoreError};
use crate::domain::{FieldKey, Table};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const PENDING_DELETE_PREFIX: &str = "pending_delete.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDeletion {
	pub partition: FieldKey,
	pub marked_at: DateTime<Utc>,
}

/// Short-lived markers keyed by (table, identity)
#[derive(Clone)]
pub struct PendingDeletions {
	store: LocalStore,
	ttl: Duration,
}

impl PendingDeletions {
	pub fn new(store: LocalStore, ttl: Duration) -> Self {
		Self { store, ttl }
	}

	fn key(table: Table, identity: &FieldKey) -> String {
		format!("{PENDING_DELETE_PREFIX}{table}.{identity}")
	}

	/// Record the partition of a record about to be deleted
	pub fn mark(
		&self,
		table: Table,
		identity: &FieldKey,
		partition: &FieldKey,
	) -> Result<(), StoreError> {
		let marker = PendingDeletion {
			partition: partition.clone(),
			marked_at: Utc::now(),
		};
		debug!(%table, %identity, %partition, "Marking pending deletion");
		self.store.write_value(&Self::key(table, identity), &marker)
	}

	/// Read and remove the marker; expired markers are discarded
	pub fn consume(&self, table: Table, identity: &FieldKey) -> Result<Option<FieldKey>, StoreError> {
		let Some(marker) = self
			.store
			.take_value::<PendingDeletion>(&Self::key(table, identity))?
		else {
			return Ok(None);
		};

		let age = Utc::now() - marker.marked_at;
		if age > self.ttl {
			warn!(
				%table,
				%identity,
				age_secs = age.num_seconds(),
				"Discarding expired pending-deletion marker"
			);
			return Ok(None);
		}

		Ok(Some(marker.partition))
	}

	/// Drop every expired marker, returning how many were removed
	pub fn prune_expired(&self) -> Result<usize, StoreError> {
		let now = Utc::now();
		let mut pruned = 0;
		for key in self.store.keys_with_prefix(PENDING_DELETE_PREFIX)? {
			let expired = match self.store.read_value::<PendingDeletion>(&key)? {
				Some(marker) => now - marker.marked_at > self.ttl,
				None => true,
			};
			if expired {
				self.store.remove(&key)?;
				pruned += 1;
			}
		}
		Ok(pruned)
	}
}
