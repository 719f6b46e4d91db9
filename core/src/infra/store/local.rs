use super::{RecordStore, StoreError};
use crate::domain::Record;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{trace, warn};

/// Partition-level view over a [`RecordStore`]
///
/// A partition that fails to decode is read as empty rather than surfaced as an
/// error, so one corrupt slot cannot block reconciliation of the others.
/// Read-modify-write cycles are serialised by an internal lock.
#[derive(Clone)]
pub struct LocalStore {
	backend: Arc<dyn RecordStore>,
	rmw: Arc<Mutex<()>>,
}

impl LocalStore {
	pub fn new(backend: Arc<dyn RecordStore>) -> Self {
		Self {
			backend,
			rmw: Arc::new(Mutex::new(())),
		}
	}

	pub fn backend(&self) -> &Arc<dyn RecordStore> {
		&self.backend
	}

	/// Records stored under `key`; missing or malformed partitions read as empty
	pub fn read_partition(&self, key: &str) -> Result<Vec<Record>, StoreError> {
		let Some(raw) = self.backend.read(key)? else {
			return Ok(Vec::new());
		};

		match serde_json::from_str::<Value>(&raw) {
			Ok(Value::Array(items)) => {
				let total = items.len();
				let records: Vec<Record> = items.into_iter().filter_map(Record::from_value).collect();
				if records.len() != total {
					warn!(
						key,
						skipped = total - records.len(),
						"Skipped non-record entries in partition"
					);
				}
				Ok(records)
			}
			Ok(other) => {
				warn!(key, kind = %json_kind(&other), "Partition is not an array, reading as empty");
				Ok(Vec::new())
			}
			Err(e) => {
				warn!(key, error = %e, "Malformed partition content, reading as empty");
				Ok(Vec::new())
			}
		}
	}

	pub fn write_partition(&self, key: &str, records: &[Record]) -> Result<(), StoreError> {
		let encoded = serde_json::to_string(records).map_err(|source| StoreError::Encode {
			key: key.to_owned(),
			source,
		})?;
		self.backend.write(key, &encoded)
	}

	/// Atomic read-modify-write of one partition.
	///
	/// The partition is written back only when `edit` changed it.
	pub fn modify_partition<T>(
		&self,
		key: &str,
		edit: impl FnOnce(&mut Vec<Record>) -> T,
	) -> Result<T, StoreError> {
		let _guard = self.rmw.lock().map_err(|_| StoreError::Poisoned)?;

		let before = self.read_partition(key)?;
		let mut records = before.clone();
		let result = edit(&mut records);

		if records != before {
			trace!(key, before = before.len(), after = records.len(), "Writing partition");
			self.write_partition(key, &records)?;
		}

		Ok(result)
	}

	/// Storage keys starting with `prefix`, sorted
	pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
		self.backend.keys_with_prefix(prefix)
	}

	/// Decode a JSON value stored under `key`; malformed content reads as `None`
	pub fn read_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
		let Some(raw) = self.backend.read(key)? else {
			return Ok(None);
		};
		match serde_json::from_str(&raw) {
			Ok(value) => Ok(Some(value)),
			Err(e) => {
				warn!(key, error = %e, "Malformed value, ignoring");
				Ok(None)
			}
		}
	}

	pub fn write_value<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
		let encoded = serde_json::to_string(value).map_err(|source| StoreError::Encode {
			key: key.to_owned(),
			source,
		})?;
		self.backend.write(key, &encoded)
	}

	/// Read a value and remove it in the same critical section
	pub fn take_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
		let _guard = self.rmw.lock().map_err(|_| StoreError::Poisoned)?;
		let value = self.read_value(key)?;
		self.backend.remove(key)?;
		Ok(value)
	}

	pub fn remove(&self, key: &str) -> Result<(), StoreError> {
		self.backend.remove(key)
	}
}

fn json_kind(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "bool",
		Value::Number(_) => "number",
		Value::String(_) => "string",
		Value::Array(_) => "array",
		Value::Object(_) => "object",
	}
}
