//! Logical tables and their storage descriptors
//!
//! Every table is reconciled by the same algorithm. What differs between tables
//! (identity field, partition field, legacy storage aliases, business key) lives
//! in a static [`TableDescriptor`], so supporting a new table is a data change.

use super::record::{FieldKey, Record};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

/// Logical tables carried over the realtime channel
#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	Hash,
	Serialize,
	Deserialize,
	AsRefStr,
	Display,
	EnumString,
	EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Table {
	Attendance,
	Settlement,
	Expense,
	Employee,
}

impl Table {
	pub fn descriptor(self) -> &'static TableDescriptor {
		match self {
			Table::Attendance => &ATTENDANCE,
			Table::Settlement => &SETTLEMENT,
			Table::Expense => &EXPENSE,
			Table::Employee => &EMPLOYEE,
		}
	}

	pub fn all() -> impl Iterator<Item = Table> {
		Table::iter()
	}
}

/// How a table's records are laid out in the key-value store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionLayout {
	/// One storage key per owning partition: `{prefix}_{partition_id}`
	PerPartition(&'static str),
	/// A single storage key holding records of every partition
	Aggregate(&'static str),
}

impl PartitionLayout {
	/// Storage key for the given partition
	pub fn storage_key(&self, partition: &FieldKey) -> String {
		match self {
			PartitionLayout::PerPartition(prefix) => format!("{prefix}_{partition}"),
			PartitionLayout::Aggregate(key) => (*key).to_owned(),
		}
	}

	/// Prefix shared by every per-partition key, `None` for aggregates
	pub fn scan_prefix(&self) -> Option<String> {
		match self {
			PartitionLayout::PerPartition(prefix) => Some(format!("{prefix}_")),
			PartitionLayout::Aggregate(_) => None,
		}
	}

	/// Recover the partition id from a storage key of this layout
	pub fn partition_of(&self, storage_key: &str) -> Option<FieldKey> {
		let prefix = self.scan_prefix()?;
		storage_key
			.strip_prefix(&prefix)
			.filter(|id| !id.is_empty())
			.map(FieldKey::new)
	}
}

/// Fields that together identify the same real-world fact, independent of identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessKeyFields {
	pub owner: &'static str,
	pub date: &'static str,
	pub category: &'static str,
}

/// Business identity of a record: (owner, partition, date, category)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BusinessKey {
	pub owner: FieldKey,
	pub partition: FieldKey,
	pub date: FieldKey,
	pub category: FieldKey,
}

/// Static per-table reconciliation parameters
#[derive(Debug)]
pub struct TableDescriptor {
	pub table: Table,
	pub identity_field: &'static str,
	pub partition_field: &'static str,
	pub primary: PartitionLayout,
	/// Legacy storage keys kept consistent for backward compatibility
	pub aliases: &'static [PartitionLayout],
	pub business_key: Option<BusinessKeyFields>,
	/// Remove unattributable deletes from every partition instead of dropping them
	pub sweep_unresolved_deletes: bool,
}

impl TableDescriptor {
	pub fn identity(&self, record: &Record) -> Option<FieldKey> {
		record.key(self.identity_field)
	}

	pub fn partition(&self, record: &Record) -> Option<FieldKey> {
		record.key(self.partition_field)
	}

	/// Every layout that must reflect a change: primary first, then aliases
	pub fn layouts(&self) -> impl Iterator<Item = &PartitionLayout> {
		std::iter::once(&self.primary).chain(self.aliases.iter())
	}

	/// Storage keys of the primary partition and all its aliases
	pub fn storage_keys(&self, partition: &FieldKey) -> Vec<String> {
		self.layouts()
			.map(|layout| layout.storage_key(partition))
			.collect()
	}

	/// Business key of a record, `None` if the table has none or a component is missing
	pub fn business_key(&self, record: &Record) -> Option<BusinessKey> {
		let fields = self.business_key?;
		Some(BusinessKey {
			owner: record.key(fields.owner)?,
			partition: self.partition(record)?,
			date: record.key(fields.date)?,
			category: record.key(fields.category)?,
		})
	}
}

pub static ATTENDANCE: TableDescriptor = TableDescriptor {
	table: Table::Attendance,
	identity_field: "record_id",
	partition_field: "project_id",
	primary: PartitionLayout::PerPartition("attendance"),
	aliases: &[PartitionLayout::PerPartition("work_records")],
	business_key: Some(BusinessKeyFields {
		owner: "employee_id",
		date: "record_date",
		category: "work_type",
	}),
	sweep_unresolved_deletes: false,
};

pub static SETTLEMENT: TableDescriptor = TableDescriptor {
	table: Table::Settlement,
	identity_field: "settlement_id",
	partition_field: "project_id",
	primary: PartitionLayout::PerPartition("settlement"),
	aliases: &[
		PartitionLayout::PerPartition("settlements"),
		PartitionLayout::Aggregate("all_settlements"),
	],
	business_key: Some(BusinessKeyFields {
		owner: "employee_id",
		date: "record_date",
		category: "record_type",
	}),
	sweep_unresolved_deletes: false,
};

pub static EXPENSE: TableDescriptor = TableDescriptor {
	table: Table::Expense,
	identity_field: "expense_id",
	partition_field: "project_id",
	primary: PartitionLayout::PerPartition("expense"),
	aliases: &[PartitionLayout::Aggregate("all_expenses")],
	business_key: Some(BusinessKeyFields {
		owner: "payer_id",
		date: "expense_date",
		category: "expense_type",
	}),
	sweep_unresolved_deletes: false,
};

pub static EMPLOYEE: TableDescriptor = TableDescriptor {
	table: Table::Employee,
	identity_field: "employee_id",
	partition_field: "project_id",
	primary: PartitionLayout::PerPartition("employees"),
	aliases: &[PartitionLayout::Aggregate("employees")],
	business_key: None,
	sweep_unresolved_deletes: true,
};
