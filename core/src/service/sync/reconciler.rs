//! Change reconciliation
//!
//! Applies one [`ChangeEvent`] to local storage. The algorithm is the same for
//! every table; the [`TableDescriptor`] supplies the identity field, the
//! partition field and the alias keys that must stay consistent.
//!
//! Guarantees, per storage key:
//! - at most one record per identity value
//! - INSERT is idempotent under redelivery
//! - UPDATE never creates a record
//! - DELETE of an absent identity is a no-op

use super::dedup::DuplicateSuppressor;
use super::resolver::{IdentityResolver, ResolutionSource};
use crate::domain::{ChangeEvent, ChangeKind, FieldKey, PartitionLayout, Record, Table, TableDescriptor};
use crate::infra::event::{ChangeNotifier, TableChanged};
use crate::infra::store::{LocalStore, StoreError};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ReconcileError {
	#[error(transparent)]
	Store(#[from] StoreError),

	#[error("{kind} event for {table} carries no record")]
	MissingRecord { table: Table, kind: ChangeKind },

	#[error("{table} record has no identity field '{field}'")]
	MissingIdentity { table: Table, field: &'static str },
}

/// What applying one event did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
	Inserted { partition: FieldKey, suppressed: usize },
	/// Redelivered insert, every storage key already held the identity
	AlreadyPresent { partition: FieldKey },
	Updated { partition: FieldKey },
	/// Update for an identity not stored locally
	UpdateDropped { partition: FieldKey },
	Deleted {
		partition: FieldKey,
		source: ResolutionSource,
		removed: bool,
	},
	/// Unattributable delete removed from every partition of the table
	Swept { removed_from: usize },
	/// No partition could be determined, the event was dropped
	Unresolved,
}

impl Outcome {
	/// Notification to emit, if this outcome counts as an applied change
	fn notification(&self, table: Table) -> Option<TableChanged> {
		match self {
			Outcome::Inserted { partition, .. }
			| Outcome::Updated { partition }
			| Outcome::Deleted { partition, .. } => Some(TableChanged::new(table, Some(partition.clone()))),
			Outcome::Swept { .. } => Some(TableChanged::new(table, None)),
			Outcome::AlreadyPresent { .. } | Outcome::UpdateDropped { .. } | Outcome::Unresolved => None,
		}
	}

	/// Whether local storage now reflects the event
	pub fn is_applied(&self) -> bool {
		!matches!(self, Outcome::UpdateDropped { .. } | Outcome::Unresolved)
	}
}

#[derive(Clone)]
pub struct ChangeReconciler {
	store: LocalStore,
	resolver: IdentityResolver,
	suppressor: DuplicateSuppressor,
	notifier: ChangeNotifier,
}

impl ChangeReconciler {
	pub fn new(
		store: LocalStore,
		resolver: IdentityResolver,
		suppressor: DuplicateSuppressor,
		notifier: ChangeNotifier,
	) -> Self {
		Self {
			store,
			resolver,
			suppressor,
			notifier,
		}
	}

	/// Apply one event and announce the result
	pub fn apply(&self, event: &ChangeEvent) -> Result<Outcome, ReconcileError> {
		let descriptor = event.descriptor();
		let record = event
			.identity_source()
			.ok_or(ReconcileError::MissingRecord {
				table: event.table,
				kind: event.kind,
			})?;
		let identity = descriptor
			.identity(record)
			.ok_or(ReconcileError::MissingIdentity {
				table: event.table,
				field: descriptor.identity_field,
			})?;

		let outcome = match self.resolver.resolve(descriptor, record)? {
			Some(resolved) => match event.kind {
				ChangeKind::Insert => self.insert(descriptor, &resolved.partition, &identity, record)?,
				ChangeKind::Update => self.update(descriptor, &resolved.partition, &identity, record)?,
				ChangeKind::Delete => {
					if resolved.source == ResolutionSource::Embedded {
						self.resolver.retire_marker(descriptor, &identity);
					}
					let removed = self.delete(descriptor, &resolved.partition, &identity)?;
					Outcome::Deleted {
						partition: resolved.partition,
						source: resolved.source,
						removed,
					}
				}
			},
			None if event.kind == ChangeKind::Delete && descriptor.sweep_unresolved_deletes => {
				warn!(
					table = %event.table,
					%identity,
					"Delete could not be attributed to a partition, sweeping every partition"
				);
				self.sweep(descriptor, &identity)?
			}
			None => {
				warn!(
					table = %event.table,
					kind = %event.kind,
					%identity,
					"Event could not be attributed to a partition, dropping"
				);
				Outcome::Unresolved
			}
		};

		debug!(table = %event.table, kind = %event.kind, %identity, ?outcome, "Reconciled change");

		if let Some(notification) = outcome.notification(event.table) {
			self.notifier.emit(notification);
		}

		Ok(outcome)
	}

	fn insert(
		&self,
		descriptor: &TableDescriptor,
		partition: &FieldKey,
		identity: &FieldKey,
		record: &Record,
	) -> Result<Outcome, ReconcileError> {
		let mut inserted = false;
		let mut suppressed = 0;

		for key in descriptor.storage_keys(partition) {
			inserted |= self.store.modify_partition(&key, |records| {
				if position_of(descriptor, records, identity).is_some() {
					return false;
				}
				records.push(record.clone());
				true
			})?;

			suppressed += self.suppressor.suppress(descriptor, &key, record)?.removed.len();
		}

		Ok(if inserted {
			Outcome::Inserted {
				partition: partition.clone(),
				suppressed,
			}
		} else {
			Outcome::AlreadyPresent {
				partition: partition.clone(),
			}
		})
	}

	fn update(
		&self,
		descriptor: &TableDescriptor,
		partition: &FieldKey,
		identity: &FieldKey,
		record: &Record,
	) -> Result<Outcome, ReconcileError> {
		let mut found = false;

		for key in descriptor.storage_keys(partition) {
			found |= self.store.modify_partition(&key, |records| {
				match position_of(descriptor, records, identity) {
					Some(index) => {
						records[index] = record.clone();
						true
					}
					None => false,
				}
			})?;
		}

		if !found {
			debug!(table = %descriptor.table, %identity, %partition, "Update for unknown record dropped");
			return Ok(Outcome::UpdateDropped {
				partition: partition.clone(),
			});
		}

		Ok(Outcome::Updated {
			partition: partition.clone(),
		})
	}

	fn delete(
		&self,
		descriptor: &TableDescriptor,
		partition: &FieldKey,
		identity: &FieldKey,
	) -> Result<bool, ReconcileError> {
		let mut removed = false;
		for key in descriptor.storage_keys(partition) {
			removed |= self.remove_identity(descriptor, &key, identity)?;
		}
		Ok(removed)
	}

	/// Remove `identity` from every stored partition of the table, aliases included
	fn sweep(&self, descriptor: &TableDescriptor, identity: &FieldKey) -> Result<Outcome, ReconcileError> {
		let mut keys = BTreeSet::new();
		for layout in descriptor.layouts() {
			match layout {
				PartitionLayout::PerPartition(_) => {
					if let Some(prefix) = layout.scan_prefix() {
						keys.extend(self.store.keys_with_prefix(&prefix)?);
					}
				}
				PartitionLayout::Aggregate(key) => {
					keys.insert((*key).to_owned());
				}
			}
		}

		let mut removed_from = 0;
		for key in &keys {
			if self.remove_identity(descriptor, key, identity)? {
				removed_from += 1;
			}
		}

		Ok(Outcome::Swept { removed_from })
	}

	fn remove_identity(
		&self,
		descriptor: &TableDescriptor,
		key: &str,
		identity: &FieldKey,
	) -> Result<bool, StoreError> {
		self.store.modify_partition(key, |records| {
			let before = records.len();
			records.retain(|record| descriptor.identity(record).as_ref() != Some(identity));
			records.len() != before
		})
	}
}

fn position_of(descriptor: &TableDescriptor, records: &[Record], identity: &FieldKey) -> Option<usize> {
	records
		.iter()
		.position(|record| descriptor.identity(record).as_ref() == Some(identity))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::infra::store::{MemoryStore, PendingDeletions, PENDING_DELETE_PREFIX};
	use crate::record;
	use std::sync::Arc;
	use tracing_test::traced_test;

	struct Fixture {
		store: LocalStore,
		pending: PendingDeletions,
		notifier: ChangeNotifier,
		reconciler: ChangeReconciler,
	}

	fn fixture() -> Fixture {
		let store = LocalStore::new(Arc::new(MemoryStore::new()));
		let pending = PendingDeletions::new(store.clone(), chrono::Duration::seconds(60));
		let notifier = ChangeNotifier::default();
		let reconciler = ChangeReconciler::new(
			store.clone(),
			IdentityResolver::new(store.clone(), pending.clone()),
			DuplicateSuppressor::new(store.clone()),
			notifier.clone(),
		);
		Fixture {
			store,
			pending,
			notifier,
			reconciler,
		}
	}

	fn attendance(id: &str) -> Record {
		record!({"record_id": id, "employee_id": "E1", "project_id": "P1"})
	}

	#[test]
	fn test_insert_is_idempotent() {
		let f = fixture();
		let event = ChangeEvent::insert(Table::Attendance, attendance("R1"));

		assert!(matches!(f.reconciler.apply(&event).unwrap(), Outcome::Inserted { .. }));
		assert!(matches!(f.reconciler.apply(&event).unwrap(), Outcome::AlreadyPresent { .. }));

		assert_eq!(f.store.read_partition("attendance_P1").unwrap().len(), 1);
		assert_eq!(f.store.read_partition("work_records_P1").unwrap().len(), 1);
	}

	#[test]
	fn test_insert_fills_missing_alias() {
		let f = fixture();
		f.store.write_partition("attendance_P1", &[attendance("R1")]).unwrap();

		let outcome = f
			.reconciler
			.apply(&ChangeEvent::insert(Table::Attendance, attendance("R1")))
			.unwrap();

		assert!(matches!(outcome, Outcome::Inserted { .. }));
		assert_eq!(f.store.read_partition("attendance_P1").unwrap().len(), 1);
		assert_eq!(f.store.read_partition("work_records_P1").unwrap().len(), 1);
	}

	#[test]
	fn test_delete_with_embedded_partition_retires_marker() {
		let f = fixture();
		f.store
			.write_partition("attendance_P1", &[attendance("R1")])
			.unwrap();
		f.pending
			.mark(Table::Attendance, &FieldKey::new("R1"), &FieldKey::new("P1"))
			.unwrap();

		let outcome = f
			.reconciler
			.apply(&ChangeEvent::delete(Table::Attendance, attendance("R1")))
			.unwrap();

		assert!(matches!(
			outcome,
			Outcome::Deleted {
				source: ResolutionSource::Embedded,
				removed: true,
				..
			}
		));
		assert!(f.store.keys_with_prefix(PENDING_DELETE_PREFIX).unwrap().is_empty());
	}

	#[test]
	fn test_insert_leaves_marker_in_place() {
		let f = fixture();
		f.pending
			.mark(Table::Attendance, &FieldKey::new("R1"), &FieldKey::new("P1"))
			.unwrap();

		f.reconciler
			.apply(&ChangeEvent::insert(Table::Attendance, attendance("R1")))
			.unwrap();

		assert_eq!(f.store.keys_with_prefix(PENDING_DELETE_PREFIX).unwrap().len(), 1);
	}

	#[test]
	fn test_update_never_creates() {
		let f = fixture();
		let outcome = f
			.reconciler
			.apply(&ChangeEvent::update(Table::Attendance, attendance("R1")))
			.unwrap();

		assert_eq!(
			outcome,
			Outcome::UpdateDropped {
				partition: FieldKey::new("P1")
			}
		);
		assert!(f.store.backend().keys().unwrap().is_empty());
	}

	#[test]
	fn test_update_replaces_in_place() {
		let f = fixture();
		f.store
			.write_partition("attendance_P1", &[attendance("R0"), attendance("R1"), attendance("R2")])
			.unwrap();

		let mut changed = attendance("R1");
		changed.set("regular_hours", 9);
		f.reconciler
			.apply(&ChangeEvent::update(Table::Attendance, changed.clone()))
			.unwrap();

		let records = f.store.read_partition("attendance_P1").unwrap();
		assert_eq!(records, vec![attendance("R0"), changed, attendance("R2")]);
	}

	#[test]
	fn test_delete_uses_marker_and_tolerates_redelivery() {
		let f = fixture();
		f.reconciler
			.apply(&ChangeEvent::insert(Table::Attendance, attendance("R1")))
			.unwrap();
		f.pending
			.mark(Table::Attendance, &FieldKey::new("R1"), &FieldKey::new("P1"))
			.unwrap();

		let delete = ChangeEvent::delete(Table::Attendance, record!({"record_id": "R1"}));
		let first = f.reconciler.apply(&delete).unwrap();
		assert_eq!(
			first,
			Outcome::Deleted {
				partition: FieldKey::new("P1"),
				source: ResolutionSource::PendingMarker,
				removed: true
			}
		);

		// Redelivery: nothing left to find anywhere
		assert_eq!(f.reconciler.apply(&delete).unwrap(), Outcome::Unresolved);
		assert!(f.store.read_partition("attendance_P1").unwrap().is_empty());
		assert!(f.store.read_partition("work_records_P1").unwrap().is_empty());
	}

	#[test]
	fn test_unresolved_delete_is_dropped_for_non_employee_tables() {
		let f = fixture();
		f.store
			.write_partition("all_expenses", &[record!({"expense_id": "X1", "project_id": "P1"})])
			.unwrap();

		let outcome = f
			.reconciler
			.apply(&ChangeEvent::delete(Table::Expense, record!({"expense_id": "X1"})))
			.unwrap();

		assert_eq!(outcome, Outcome::Unresolved);
		assert_eq!(f.store.read_partition("all_expenses").unwrap().len(), 1);
	}

	#[test]
	fn test_unresolved_employee_delete_sweeps_every_partition() {
		let f = fixture();
		let mut notifications = f.notifier.subscribe();
		// Only the aggregate and a stale alias know E1, so the scan cannot find it
		f.store
			.write_partition("employees", &[record!({"employee_id": "E1"}), record!({"employee_id": "E2"})])
			.unwrap();
		f.store
			.write_partition("employees_P2", &[record!({"employee_id": "E2", "project_id": "P2"})])
			.unwrap();

		let outcome = f
			.reconciler
			.apply(&ChangeEvent::delete(Table::Employee, record!({"employee_id": "E1"})))
			.unwrap();

		assert_eq!(outcome, Outcome::Swept { removed_from: 1 });
		assert_eq!(f.store.read_partition("employees").unwrap(), vec![record!({"employee_id": "E2"})]);
		assert_eq!(f.store.read_partition("employees_P2").unwrap().len(), 1);

		let notification = notifications.try_recv().unwrap();
		assert_eq!(notification.table, Table::Employee);
		assert!(notification.partition.is_none());
	}

	#[test]
	fn test_partition_isolation() {
		let f = fixture();
		let other = vec![record!({"record_id": "R1", "project_id": "P2"})];
		f.store.write_partition("attendance_P2", &other).unwrap();

		f.reconciler
			.apply(&ChangeEvent::insert(Table::Attendance, attendance("R1")))
			.unwrap();
		let mut changed = attendance("R1");
		changed.set("regular_hours", 4);
		f.reconciler
			.apply(&ChangeEvent::update(Table::Attendance, changed))
			.unwrap();
		f.reconciler
			.apply(&ChangeEvent::delete(Table::Attendance, attendance("R1")))
			.unwrap();

		assert_eq!(f.store.read_partition("attendance_P2").unwrap(), other);
	}

	#[test]
	fn test_notifications_only_for_applied_changes() {
		let f = fixture();
		let mut notifications = f.notifier.subscribe();
		let insert = ChangeEvent::insert(Table::Attendance, attendance("R1"));

		f.reconciler.apply(&insert).unwrap();
		f.reconciler.apply(&insert).unwrap();
		f.reconciler
			.apply(&ChangeEvent::update(Table::Attendance, attendance("R404")))
			.unwrap();

		let first = notifications.try_recv().unwrap();
		assert_eq!(first.partition, Some(FieldKey::new("P1")));
		assert!(notifications.try_recv().is_err());
	}

	#[test]
	fn test_missing_identity_is_an_error() {
		let f = fixture();
		let result = f
			.reconciler
			.apply(&ChangeEvent::insert(Table::Attendance, record!({"project_id": "P1"})));
		assert!(matches!(result, Err(ReconcileError::MissingIdentity { field: "record_id", .. })));
	}

	#[test]
	#[traced_test]
	fn test_dropped_delete_is_logged() {
		let f = fixture();
		let outcome = f
			.reconciler
			.apply(&ChangeEvent::delete(Table::Attendance, record!({"record_id": "R404"})))
			.unwrap();

		assert_eq!(outcome, Outcome::Unresolved);
		assert!(logs_contain("could not be attributed to a partition"));
	}
}
