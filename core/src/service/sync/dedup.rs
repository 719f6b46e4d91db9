//! Speculative record suppression
//!
//! Records written offline carry a placeholder identity that never equals the
//! one the server later issues, so superseded copies are found by business key.

use crate::domain::{Record, TableDescriptor};
use crate::infra::store::{LocalStore, StoreError};
use tracing::{debug, warn};

/// Outcome of suppressing duplicates in one partition
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Suppression {
	/// Records dropped from the partition
	pub removed: Vec<Record>,
	/// More than one non-speculative record shared the business key
	pub anomaly: bool,
}

impl Suppression {
	pub fn is_empty(&self) -> bool {
		self.removed.is_empty()
	}
}

/// Drop records superseded by `authoritative` from `records`.
///
/// Among records sharing the authoritative record's business key, the first
/// non-speculative one (by position) survives and every other match is removed.
/// If no non-speculative record matches, the partition is left as is.
pub fn suppress_duplicates(
	descriptor: &TableDescriptor,
	records: &mut Vec<Record>,
	authoritative: &Record,
) -> Suppression {
	let Some(key) = descriptor.business_key(authoritative) else {
		return Suppression::default();
	};

	let matches: Vec<usize> = records
		.iter()
		.enumerate()
		.filter(|(_, record)| descriptor.business_key(record).as_ref() == Some(&key))
		.map(|(index, _)| index)
		.collect();

	let confirmed: Vec<usize> = matches
		.iter()
		.copied()
		.filter(|&index| !records[index].is_speculative())
		.collect();

	let Some(&keep) = confirmed.first() else {
		return Suppression::default();
	};

	let mut suppression = Suppression {
		removed: Vec::new(),
		anomaly: confirmed.len() > 1,
	};

	// Walk backwards so earlier indices stay valid while removing
	for &index in matches.iter().rev() {
		if index != keep {
			suppression.removed.push(records.remove(index));
		}
	}
	suppression.removed.reverse();

	suppression
}

#[derive(Clone)]
pub struct DuplicateSuppressor {
	store: LocalStore,
}

impl DuplicateSuppressor {
	pub fn new(store: LocalStore) -> Self {
		Self { store }
	}

	/// Suppress duplicates of `authoritative` in the partition under `storage_key`,
	/// removing the sidecar keys of any speculative record dropped
	pub fn suppress(
		&self,
		descriptor: &TableDescriptor,
		storage_key: &str,
		authoritative: &Record,
	) -> Result<Suppression, StoreError> {
		let suppression = self.store.modify_partition(storage_key, |records| {
			suppress_duplicates(descriptor, records, authoritative)
		})?;

		if suppression.anomaly {
			warn!(
				table = %descriptor.table,
				key = storage_key,
				identity = ?descriptor.identity(authoritative),
				"Multiple confirmed records share one business key, kept the first"
			);
		}

		for removed in &suppression.removed {
			debug!(
				table = %descriptor.table,
				key = storage_key,
				identity = ?descriptor.identity(removed),
				speculative = removed.is_speculative(),
				"Suppressed duplicate record"
			);
			if !removed.is_speculative() {
				continue;
			}
			for sidecar in removed.sidecars() {
				if let Err(e) = self.store.remove(&sidecar) {
					warn!(key = %sidecar, error = %e, "Failed to remove sidecar of suppressed record");
				}
			}
		}

		Ok(suppression)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::domain::table::{ATTENDANCE, EMPLOYEE};
	use crate::infra::store::{MemoryStore, RecordStore};
	use crate::record;
	use std::sync::Arc;

	fn speculative(id: &str) -> Record {
		record!({
			"record_id": id,
			"employee_id": "E1",
			"project_id": "P1",
			"record_date": "2024-05-01",
			"work_type": "day",
			"_local": true
		})
	}

	fn confirmed(id: &str) -> Record {
		record!({
			"record_id": id,
			"employee_id": "E1",
			"project_id": "P1",
			"record_date": "2024-05-01",
			"work_type": "day"
		})
	}

	#[test]
	fn test_confirmed_record_supersedes_speculative() {
		let mut records = vec![speculative("local_1"), confirmed("R1")];
		let result = suppress_duplicates(&ATTENDANCE, &mut records, &confirmed("R1"));

		assert_eq!(records, vec![confirmed("R1")]);
		assert_eq!(result.removed, vec![speculative("local_1")]);
		assert!(!result.anomaly);
	}

	#[test]
	fn test_only_speculative_matches_are_left_alone() {
		let mut records = vec![speculative("local_1")];
		let result = suppress_duplicates(&ATTENDANCE, &mut records, &confirmed("R1"));

		assert!(result.is_empty());
		assert_eq!(records.len(), 1);
	}

	#[test]
	fn test_multiple_confirmed_keeps_first_and_flags_anomaly() {
		let mut records = vec![confirmed("R0"), speculative("local_1"), confirmed("R1")];
		let result = suppress_duplicates(&ATTENDANCE, &mut records, &confirmed("R1"));

		assert_eq!(records, vec![confirmed("R0")]);
		assert_eq!(result.removed, vec![speculative("local_1"), confirmed("R1")]);
		assert!(result.anomaly);
	}

	#[test]
	fn test_different_business_key_is_untouched() {
		let mut other_day = speculative("local_2");
		other_day.set("record_date", "2024-05-02");
		let mut records = vec![other_day.clone(), confirmed("R1")];

		let result = suppress_duplicates(&ATTENDANCE, &mut records, &confirmed("R1"));
		assert!(result.is_empty());
		assert_eq!(records, vec![other_day, confirmed("R1")]);
	}

	#[test]
	fn test_tables_without_business_key_are_skipped() {
		let mut records = vec![record!({"employee_id": "E1", "_local": true})];
		let result = suppress_duplicates(&EMPLOYEE, &mut records, &record!({"employee_id": "E2"}));
		assert!(result.is_empty());
		assert_eq!(records.len(), 1);
	}

	#[test]
	fn test_suppressor_removes_sidecars() {
		let backend = Arc::new(MemoryStore::new().with_raw("photo_local_1", "blob"));
		let store = LocalStore::new(backend.clone());

		let mut local = speculative("local_1");
		local.set("_sidecars", serde_json::json!(["photo_local_1"]));
		store
			.write_partition("attendance_P1", &[local, confirmed("R1")])
			.unwrap();

		let suppression = DuplicateSuppressor::new(store.clone())
			.suppress(&ATTENDANCE, "attendance_P1", &confirmed("R1"))
			.unwrap();

		assert_eq!(suppression.removed.len(), 1);
		assert_eq!(store.read_partition("attendance_P1").unwrap(), vec![confirmed("R1")]);
		assert!(backend.read("photo_local_1").unwrap().is_none());
	}
}
