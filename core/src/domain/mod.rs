//! Domain models for the realtime sync engine
//!
//! - Record: a flat row as cached locally
//! - Table: the logical tables and their storage descriptors
//! - ChangeEvent: a remote insert/update/delete notification

pub mod change;
pub mod record;
pub mod table;

// Re-export commonly used types
pub use change::{ChangeEvent, ChangeKind};
pub use record::{FieldKey, Record, PLACEHOLDER_PREFIX, SIDECARS_FIELD, SPECULATIVE_FLAGS};
pub use table::{BusinessKey, BusinessKeyFields, PartitionLayout, Table, TableDescriptor};
