//! Partition resolution for change events
//!
//! Delete notifications may carry the identity field only. Resolution tries,
//! in order: the record's own partition field, a pending-deletion marker left
//! by the writer, then a scan of the table's per-partition keys.

use crate::domain::{FieldKey, Record, TableDescriptor};
use crate::infra::store::{LocalStore, PendingDeletions, StoreError};
use std::fmt;
use tracing::{debug, warn};

/// How a partition was determined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
	/// The event's record carried the partition field
	Embedded,
	/// A pending-deletion marker recorded it before the delete was issued
	PendingMarker,
	/// Found by scanning the table's stored partitions
	StoreScan,
}

impl fmt::Display for ResolutionSource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			ResolutionSource::Embedded => "embedded",
			ResolutionSource::PendingMarker => "pending_marker",
			ResolutionSource::StoreScan => "store_scan",
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
	pub partition: FieldKey,
	pub source: ResolutionSource,
}

#[derive(Clone)]
pub struct IdentityResolver {
	store: LocalStore,
	pending: PendingDeletions,
}

impl IdentityResolver {
	pub fn new(store: LocalStore, pending: PendingDeletions) -> Self {
		Self { store, pending }
	}

	/// Determine the owning partition of `record`, or `None` if every strategy fails
	pub fn resolve(
		&self,
		descriptor: &TableDescriptor,
		record: &Record,
	) -> Result<Option<Resolved>, StoreError> {
		if let Some(partition) = descriptor.partition(record) {
			return Ok(Some(Resolved {
				partition,
				source: ResolutionSource::Embedded,
			}));
		}

		let Some(identity) = descriptor.identity(record) else {
			warn!(
				table = %descriptor.table,
				field = descriptor.identity_field,
				"Record carries neither partition nor identity"
			);
			return Ok(None);
		};

		// Marker lookups are best effort; a broken marker must not hide the scan
		match self.pending.consume(descriptor.table, &identity) {
			Ok(Some(partition)) => {
				debug!(table = %descriptor.table, %identity, %partition, "Resolved via pending marker");
				return Ok(Some(Resolved {
					partition,
					source: ResolutionSource::PendingMarker,
				}));
			}
			Ok(None) => {}
			Err(e) => {
				warn!(table = %descriptor.table, %identity, error = %e, "Pending marker lookup failed");
			}
		}

		if let Some(partition) = self.scan(descriptor, &identity)? {
			debug!(table = %descriptor.table, %identity, %partition, "Resolved via store scan");
			return Ok(Some(Resolved {
				partition,
				source: ResolutionSource::StoreScan,
			}));
		}

		Ok(None)
	}

	/// Drop the marker for a delete that was routed without it
	pub fn retire_marker(&self, descriptor: &TableDescriptor, identity: &FieldKey) {
		match self.pending.consume(descriptor.table, identity) {
			Ok(Some(marked)) => {
				debug!(table = %descriptor.table, %identity, %marked, "Pending marker retired by embedded partition");
			}
			Ok(None) => {}
			Err(e) => {
				warn!(table = %descriptor.table, %identity, error = %e, "Pending marker cleanup failed");
			}
		}
	}

	/// First per-partition key (sorted) holding a record with `identity`
	pub fn scan(
		&self,
		descriptor: &TableDescriptor,
		identity: &FieldKey,
	) -> Result<Option<FieldKey>, StoreError> {
		let Some(prefix) = descriptor.primary.scan_prefix() else {
			return Ok(None);
		};

		for key in self.store.keys_with_prefix(&prefix)? {
			let Some(partition) = descriptor.primary.partition_of(&key) else {
				continue;
			};
			let holds_identity = self
				.store
				.read_partition(&key)?
				.iter()
				.any(|record| descriptor.identity(record).as_ref() == Some(identity));
			if holds_identity {
				return Ok(Some(partition));
			}
		}

		Ok(None)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::domain::table::{ATTENDANCE, EMPLOYEE};
	use crate::domain::Table;
	use crate::infra::store::MemoryStore;
	use crate::record;
	use std::sync::Arc;

	fn resolver() -> (LocalStore, PendingDeletions, IdentityResolver) {
		let store = LocalStore::new(Arc::new(MemoryStore::new()));
		let pending = PendingDeletions::new(store.clone(), chrono::Duration::seconds(60));
		let resolver = IdentityResolver::new(store.clone(), pending.clone());
		(store, pending, resolver)
	}

	#[test]
	fn test_embedded_partition_wins() {
		let (_, pending, resolver) = resolver();
		pending
			.mark(Table::Attendance, &FieldKey::new("R1"), &FieldKey::new("P9"))
			.unwrap();

		let resolved = resolver
			.resolve(&ATTENDANCE, &record!({"record_id": "R1", "project_id": "P1"}))
			.unwrap()
			.unwrap();
		assert_eq!(resolved.partition, FieldKey::new("P1"));
		assert_eq!(resolved.source, ResolutionSource::Embedded);

		// Resolution alone leaves the marker for the delete that needs it
		assert_eq!(
			pending.consume(Table::Attendance, &FieldKey::new("R1")).unwrap(),
			Some(FieldKey::new("P9"))
		);
	}

	#[test]
	fn test_marker_is_consumed_before_scanning() {
		let (store, pending, resolver) = resolver();
		store
			.write_partition("attendance_P1", &[record!({"record_id": "R1", "project_id": "P1"})])
			.unwrap();
		pending
			.mark(Table::Attendance, &FieldKey::new("R1"), &FieldKey::new("P2"))
			.unwrap();

		let first = resolver.resolve(&ATTENDANCE, &record!({"record_id": "R1"})).unwrap().unwrap();
		assert_eq!(first.source, ResolutionSource::PendingMarker);
		assert_eq!(first.partition, FieldKey::new("P2"));

		// Marker consumed: the redelivered event falls through to the scan
		let second = resolver.resolve(&ATTENDANCE, &record!({"record_id": "R1"})).unwrap().unwrap();
		assert_eq!(second.source, ResolutionSource::StoreScan);
		assert_eq!(second.partition, FieldKey::new("P1"));
	}

	#[test]
	fn test_scan_ignores_alias_partitions() {
		let (store, _, resolver) = resolver();
		store
			.write_partition("work_records_P3", &[record!({"record_id": "R1"})])
			.unwrap();
		store
			.write_partition("attendance_P2", &[record!({"record_id": "R2"})])
			.unwrap();

		assert!(resolver.resolve(&ATTENDANCE, &record!({"record_id": "R1"})).unwrap().is_none());
	}

	#[test]
	fn test_scan_skips_corrupt_partitions() {
		let backend = MemoryStore::new()
			.with_raw("employees_P1", "{{{")
			.with_raw("employees_P2", r#"[{"employee_id": 7}]"#);
		let store = LocalStore::new(Arc::new(backend));
		let pending = PendingDeletions::new(store.clone(), chrono::Duration::seconds(60));
		let resolver = IdentityResolver::new(store, pending);

		let resolved = resolver.resolve(&EMPLOYEE, &record!({"employee_id": 7})).unwrap().unwrap();
		assert_eq!(resolved.partition, FieldKey::new("P2"));
	}

	#[test]
	fn test_missing_identity_is_unresolved() {
		let (_, _, resolver) = resolver();
		assert!(resolver.resolve(&ATTENDANCE, &record!({"note": "x"})).unwrap().is_none());
	}
}
