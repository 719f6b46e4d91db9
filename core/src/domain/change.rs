//! Remote change notifications

use super::record::Record;
use super::table::{Table, TableDescriptor};
use serde::{Deserialize, Deserializer, Serialize};
use strum::{AsRefStr, Display};

/// Operation carried by a change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ChangeKind {
	Insert,
	Update,
	Delete,
}

/// One remote change to one record of one table
///
/// Wire form follows the realtime backend: `{"eventType", "table", "new", "old"}`,
/// where an empty `new`/`old` object means the side is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
	#[serde(rename = "eventType")]
	pub kind: ChangeKind,
	pub table: Table,
	#[serde(rename = "new", default, deserialize_with = "non_empty_record")]
	pub new_record: Option<Record>,
	#[serde(rename = "old", default, deserialize_with = "non_empty_record")]
	pub old_record: Option<Record>,
}

impl ChangeEvent {
	pub fn insert(table: Table, record: Record) -> Self {
		Self {
			kind: ChangeKind::Insert,
			table,
			new_record: Some(record),
			old_record: None,
		}
	}

	pub fn update(table: Table, record: Record) -> Self {
		Self {
			kind: ChangeKind::Update,
			table,
			new_record: Some(record),
			old_record: None,
		}
	}

	pub fn delete(table: Table, old: Record) -> Self {
		Self {
			kind: ChangeKind::Delete,
			table,
			new_record: None,
			old_record: Some(old),
		}
	}

	pub fn descriptor(&self) -> &'static TableDescriptor {
		self.table.descriptor()
	}

	/// The record authoritative for identity: `new` for writes, `old` for deletes
	pub fn identity_source(&self) -> Option<&Record> {
		match self.kind {
			ChangeKind::Insert | ChangeKind::Update => self.new_record.as_ref(),
			ChangeKind::Delete => self.old_record.as_ref(),
		}
	}
}

fn non_empty_record<'de, D>(deserializer: D) -> Result<Option<Record>, D::Error>
where
	D: Deserializer<'de>,
{
	let value = Option::<serde_json::Value>::deserialize(deserializer)?;
	Ok(value.and_then(Record::from_value))
}
