//! Flat records as stored in local partitions

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Flags that mark a record as created locally and not yet confirmed by the server
pub const SPECULATIVE_FLAGS: [&str; 2] = ["_local", "is_local"];

/// Field listing local-only storage keys owned by a speculative record
pub const SIDECARS_FIELD: &str = "_sidecars";

/// Prefix of client-generated placeholder identities
pub const PLACEHOLDER_PREFIX: &str = "local_";

/// A flat mapping of field name to value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
	pub fn new() -> Self {
		Self(Map::new())
	}

	/// Build a record from a JSON value, returning `None` for anything but a non-empty object
	pub fn from_value(value: Value) -> Option<Self> {
		match value {
			Value::Object(map) if !map.is_empty() => Some(Self(map)),
			_ => None,
		}
	}

	pub fn get(&self, field: &str) -> Option<&Value> {
		self.0.get(field)
	}

	pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
		self.0.insert(field.into(), value.into());
	}

	pub fn remove(&mut self, field: &str) -> Option<Value> {
		self.0.remove(field)
	}

	/// Read a field as a normalised key.
	///
	/// Strings and numbers both qualify; empty strings, nulls and nested values do not.
	pub fn key(&self, field: &str) -> Option<FieldKey> {
		FieldKey::from_value(self.0.get(field)?)
	}

	/// Whether the record was created locally and is awaiting server confirmation
	pub fn is_speculative(&self) -> bool {
		SPECULATIVE_FLAGS
			.iter()
			.any(|flag| matches!(self.0.get(*flag), Some(Value::Bool(true))))
	}

	/// Local-only storage keys this record created
	pub fn sidecars(&self) -> Vec<String> {
		match self.0.get(SIDECARS_FIELD) {
			Some(Value::Array(items)) => items
				.iter()
				.filter_map(|item| item.as_str().map(str::to_owned))
				.collect(),
			_ => Vec::new(),
		}
	}

	pub fn into_value(self) -> Value {
		Value::Object(self.0)
	}
}

impl From<Map<String, Value>> for Record {
	fn from(map: Map<String, Value>) -> Self {
		Self(map)
	}
}

/// Normalised scalar used for identity and partition comparisons
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldKey(String);

impl FieldKey {
	pub fn new(key: impl Into<String>) -> Self {
		Self(key.into())
	}

	pub fn from_value(value: &Value) -> Option<Self> {
		match value {
			Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
			Value::Number(n) => Some(Self(n.to_string())),
			_ => None,
		}
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Whether this is a client-generated placeholder rather than a server-issued identity
	pub fn is_placeholder(&self) -> bool {
		self.0.starts_with(PLACEHOLDER_PREFIX)
	}
}

impl fmt::Display for FieldKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for FieldKey {
	fn from(key: &str) -> Self {
		Self(key.to_owned())
	}
}

/// Build a record from a `json!` literal
#[macro_export]
macro_rules! record {
	($($json:tt)+) => {
		$crate::domain::Record::from_value(::serde_json::json!($($json)+))
			.expect("record! requires a non-empty JSON object")
	};
}
