//! Local record store
//!
//! A set of named, durable key-value slots holding JSON text. Partitions are
//! JSON arrays of records; pending-deletion markers and sidecar blobs live in
//! the same keyspace under their own prefixes.
//!
//! Backends only move strings around. Decoding, malformed-content recovery and
//! read-modify-write serialisation happen in [`LocalStore`].

mod file;
mod local;
mod memory;
mod pending;

pub use file::FileStore;
pub use local::LocalStore;
pub use memory::MemoryStore;
pub use pending::{PendingDeletion, PendingDeletions, PENDING_DELETE_PREFIX};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("IO error on key '{key}': {source}")]
	Io {
		key: String,
		#[source]
		source: std::io::Error,
	},

	#[error("Failed to encode value for key '{key}': {source}")]
	Encode {
		key: String,
		#[source]
		source: serde_json::Error,
	},

	#[error("Invalid storage key '{0}'")]
	InvalidKey(String),

	#[error("Store lock poisoned")]
	Poisoned,
}

/// Durable key-value backend
pub trait RecordStore: Send + Sync + 'static {
	/// Raw contents stored under `key`, `None` if the key was never written
	fn read(&self, key: &str) -> Result<Option<String>, StoreError>;

	fn write(&self, key: &str, value: &str) -> Result<(), StoreError>;

	/// Remove a key; removing a missing key is not an error
	fn remove(&self, key: &str) -> Result<(), StoreError>;

	/// All stored keys, sorted
	fn keys(&self) -> Result<Vec<String>, StoreError>;

	/// Stored keys starting with `prefix`, sorted
	fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
		Ok(self
			.keys()?
			.into_iter()
			.filter(|key| key.starts_with(prefix))
			.collect())
	}
}
