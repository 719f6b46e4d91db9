use super::{RecordStore, StoreError};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// In-process store, used by tests and by hosts that persist elsewhere
#[derive(Debug, Default)]
pub struct MemoryStore {
	slots: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Seed a key with raw content, bypassing any encoding
	pub fn with_raw(self, key: &str, value: &str) -> Self {
		if let Ok(mut slots) = self.slots.write() {
			slots.insert(key.to_owned(), value.to_owned());
		}
		self
	}
}

impl RecordStore for MemoryStore {
	fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
		let slots = self.slots.read().map_err(|_| StoreError::Poisoned)?;
		Ok(slots.get(key).cloned())
	}

	fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
		let mut slots = self.slots.write().map_err(|_| StoreError::Poisoned)?;
		slots.insert(key.to_owned(), value.to_owned());
		Ok(())
	}

	fn remove(&self, key: &str) -> Result<(), StoreError> {
		let mut slots = self.slots.write().map_err(|_| StoreError::Poisoned)?;
		slots.remove(key);
		Ok(())
	}

	fn keys(&self) -> Result<Vec<String>, StoreError> {
		let slots = self.slots.read().map_err(|_| StoreError::Poisoned)?;
		Ok(slots.keys().cloned().collect())
	}

	fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
		let slots = self.slots.read().map_err(|_| StoreError::Poisoned)?;
		Ok(slots
			.range(prefix.to_owned()..)
			.map(|(key, _)| key)
			.take_while(|key| key.starts_with(prefix))
			.cloned()
			.collect())
	}
}
