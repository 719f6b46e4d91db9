use super::{RecordStore, StoreError};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const EXTENSION: &str = "json";
const ESCAPE: char = '%';

/// Directory-backed store: one file per key, written via temp file and rename.
///
/// Keys carry arbitrary partition and identity values, so each one is escaped
/// into a portable file name and unescaped again when listing.
#[derive(Debug, Clone)]
pub struct FileStore {
	root: PathBuf,
}

impl FileStore {
	pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
		let root = root.as_ref().to_path_buf();
		fs::create_dir_all(&root).map_err(|source| StoreError::Io {
			key: root.display().to_string(),
			source,
		})?;
		debug!(root = %root.display(), "Opened file store");
		Ok(Self { root })
	}

	fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
		if key.is_empty() {
			return Err(StoreError::InvalidKey(key.to_owned()));
		}
		Ok(self.root.join(format!("{}.{EXTENSION}", encode_key(key))))
	}
}

fn is_portable(byte: u8) -> bool {
	byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-' | b'.')
}

/// Escape every byte outside `[A-Za-z0-9_.-]` as `%XX`, plus a leading dot
fn encode_key(key: &str) -> String {
	let mut name = String::with_capacity(key.len());
	for (i, &byte) in key.as_bytes().iter().enumerate() {
		if is_portable(byte) && !(i == 0 && byte == b'.') {
			name.push(byte as char);
		} else {
			name.push(ESCAPE);
			name.push_str(&hex::encode_upper([byte]));
		}
	}
	name
}

/// Inverse of [`encode_key`]; `None` for names this store did not write
fn decode_key(name: &str) -> Option<String> {
	let mut bytes = Vec::with_capacity(name.len());
	let mut rest = name.as_bytes();
	while let Some((&byte, tail)) = rest.split_first() {
		if byte == ESCAPE as u8 {
			let digits = tail.get(..2)?;
			bytes.extend(hex::decode(digits).ok()?);
			rest = &tail[2..];
		} else {
			bytes.push(byte);
			rest = tail;
		}
	}
	String::from_utf8(bytes).ok()
}

impl RecordStore for FileStore {
	fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
		let path = self.path_for(key)?;
		match fs::read_to_string(&path) {
			Ok(contents) => Ok(Some(contents)),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
			Err(source) => Err(StoreError::Io {
				key: key.to_owned(),
				source,
			}),
		}
	}

	fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
		let path = self.path_for(key)?;
		let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
		let io_err = |source: std::io::Error| StoreError::Io {
			key: key.to_owned(),
			source,
		};
		fs::write(&tmp, value).map_err(io_err)?;
		fs::rename(&tmp, &path).map_err(io_err)
	}

	fn remove(&self, key: &str) -> Result<(), StoreError> {
		let path = self.path_for(key)?;
		match fs::remove_file(&path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(source) => Err(StoreError::Io {
				key: key.to_owned(),
				source,
			}),
		}
	}

	fn keys(&self) -> Result<Vec<String>, StoreError> {
		let entries = fs::read_dir(&self.root).map_err(|source| StoreError::Io {
			key: self.root.display().to_string(),
			source,
		})?;

		let mut keys = Vec::new();
		for entry in entries.flatten() {
			let path = entry.path();
			if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
				continue;
			}
			let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
				continue;
			};
			match decode_key(stem) {
				Some(key) => keys.push(key),
				None => warn!(file = %path.display(), "Skipping file with undecodable name"),
			}
		}
		keys.sort();
		Ok(keys)
	}
}
