//! Optimistic local writes
//!
//! Writes made by the app land in local storage first and are queued for
//! replay against the backend. Inserts get a placeholder identity and the
//! speculative flag until the confirmed record arrives over the realtime
//! channel and the duplicate suppressor retires the local copy. Deletes leave
//! a pending-deletion marker so the echoed delete, which may carry only the
//! identity, can be routed to the right partition.

use crate::domain::{ChangeKind, FieldKey, Record, Table, PLACEHOLDER_PREFIX, SIDECARS_FIELD, SPECULATIVE_FLAGS};
use crate::infra::event::{ChangeNotifier, TableChanged};
use crate::infra::queue::{MutationQueue, PendingMutation, QueueError};
use crate::infra::store::{LocalStore, PendingDeletions, StoreError};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LocalWriteError {
	#[error(transparent)]
	Store(#[from] StoreError),

	#[error(transparent)]
	Queue(#[from] QueueError),

	#[error("{table} record has no partition field '{field}'")]
	MissingPartition { table: Table, field: &'static str },

	#[error("{table} record has no identity field '{field}'")]
	MissingIdentity { table: Table, field: &'static str },
}

#[derive(Clone)]
pub struct LocalWriter {
	store: LocalStore,
	pending: PendingDeletions,
	queue: Arc<dyn MutationQueue>,
	notifier: ChangeNotifier,
}

impl LocalWriter {
	pub fn new(
		store: LocalStore,
		pending: PendingDeletions,
		queue: Arc<dyn MutationQueue>,
		notifier: ChangeNotifier,
	) -> Self {
		Self {
			store,
			pending,
			queue,
			notifier,
		}
	}

	/// Store `record` locally as speculative and queue its insert.
	///
	/// Returns the record as stored, carrying its placeholder identity.
	pub fn insert_speculative(
		&self,
		table: Table,
		mut record: Record,
		label: impl Into<String>,
	) -> Result<Record, LocalWriteError> {
		let descriptor = table.descriptor();
		let partition = descriptor
			.partition(&record)
			.ok_or(LocalWriteError::MissingPartition {
				table,
				field: descriptor.partition_field,
			})?;

		let placeholder = match descriptor.identity(&record) {
			Some(identity) if identity.is_placeholder() => identity,
			_ => FieldKey::new(format!("{PLACEHOLDER_PREFIX}{}", Uuid::new_v4())),
		};
		record.set(descriptor.identity_field, placeholder.as_str());
		record.set(SPECULATIVE_FLAGS[0], true);

		for key in descriptor.storage_keys(&partition) {
			self.store.modify_partition(&key, |records| {
				records.retain(|existing| descriptor.identity(existing).as_ref() != Some(&placeholder));
				records.push(record.clone());
			})?;
		}

		self.queue.enqueue(PendingMutation {
			kind: ChangeKind::Insert,
			table,
			payload: server_payload(&record, descriptor.identity_field),
			correlation_id: placeholder.to_string(),
			label: label.into(),
		})?;

		info!(%table, %partition, correlation_id = %placeholder, "Speculative record written");
		self.notifier.emit(TableChanged::new(table, Some(partition)));

		Ok(record)
	}

	/// Remove `record` locally, leave a pending-deletion marker and queue the delete
	pub fn delete(&self, table: Table, record: &Record, label: impl Into<String>) -> Result<(), LocalWriteError> {
		let descriptor = table.descriptor();
		let identity = descriptor
			.identity(record)
			.ok_or(LocalWriteError::MissingIdentity {
				table,
				field: descriptor.identity_field,
			})?;
		let partition = descriptor
			.partition(record)
			.ok_or(LocalWriteError::MissingPartition {
				table,
				field: descriptor.partition_field,
			})?;

		// A placeholder never reached the server, so no delete will be echoed back
		if identity.is_placeholder() {
			debug!(%table, %identity, "Deleting speculative record, no marker needed");
		} else {
			self.pending.mark(table, &identity, &partition)?;
		}

		let mut sidecars = Vec::new();
		for key in descriptor.storage_keys(&partition) {
			self.store.modify_partition(&key, |records| {
				records.retain(|existing| {
					if descriptor.identity(existing).as_ref() != Some(&identity) {
						return true;
					}
					if existing.is_speculative() {
						sidecars.extend(existing.sidecars());
					}
					false
				});
			})?;
		}
		sidecars.sort();
		sidecars.dedup();
		for sidecar in sidecars {
			self.store.remove(&sidecar)?;
		}

		let mut payload = serde_json::Map::new();
		payload.insert(descriptor.identity_field.to_string(), Value::String(identity.to_string()));
		self.queue.enqueue(PendingMutation {
			kind: ChangeKind::Delete,
			table,
			payload: Value::Object(payload),
			correlation_id: identity.to_string(),
			label: label.into(),
		})?;

		info!(%table, %partition, %identity, "Local delete queued");
		self.notifier.emit(TableChanged::new(table, Some(partition)));

		Ok(())
	}
}

/// The record as the backend should receive it: no local-only fields, no placeholder identity
fn server_payload(record: &Record, identity_field: &str) -> Value {
	let mut payload = record.clone();
	for flag in SPECULATIVE_FLAGS {
		payload.remove(flag);
	}
	payload.remove(SIDECARS_FIELD);
	payload.remove(identity_field);
	payload.into_value()
}
