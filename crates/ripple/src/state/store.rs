use super::tag::StateTag;
use crate::value::Value;
use sha2::{Digest, Sha256};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(Debug)]
pub enum StoreError {
    Io { path: PathBuf, error: io::Error },
    Json { path: PathBuf, error: serde_json::Error },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io { path, error } => write!(f, "{}: {error}", path.display()),
            StoreError::Json { path, error } => {
                write!(f, "{}: invalid state: {error}", path.display())
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io { error, .. } => Some(error),
            StoreError::Json { error, .. } => Some(error),
        }
    }
}

/// Raw storage backend addressed by [`StateTag`].
pub trait Store {
    fn load(&self, tag: &StateTag) -> Result<Option<Value>, StoreError>;
    fn save(&self, tag: &StateTag, value: &Value) -> Result<(), StoreError>;
    fn remove(&self, tag: &StateTag) -> Result<(), StoreError>;
}

/// In-memory store. Clones share the same cells, so handing a clone to a
/// second context models a process restart over the same storage.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    cells: Rc<RefCell<BTreeMap<StateTag, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cells.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.borrow().is_empty()
    }

    pub fn tags(&self) -> Vec<StateTag> {
        self.cells.borrow().keys().cloned().collect()
    }
}

impl Store for MemoryStore {
    fn load(&self, tag: &StateTag) -> Result<Option<Value>, StoreError> {
        Ok(self.cells.borrow().get(tag).cloned())
    }

    fn save(&self, tag: &StateTag, value: &Value) -> Result<(), StoreError> {
        self.cells.borrow_mut().insert(tag.clone(), value.clone());
        Ok(())
    }

    fn remove(&self, tag: &StateTag) -> Result<(), StoreError> {
        self.cells.borrow_mut().remove(tag);
        Ok(())
    }
}

/// Longest hex-encoded key kept verbatim in a file name.
const MAX_HEX_KEY: usize = 160;

/// One JSON file per tag under a base directory.
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).map_err(|error| StoreError::Io {
            path: base_path.clone(),
            error,
        })?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// `<element>-<kind>[-<hex of key json>].json`, with keys too long for a
    /// file name replaced by `sha256-<digest>`.
    fn path(&self, tag: &StateTag) -> PathBuf {
        let mut name = format!("{}-{}", tag.element, tag.kind.name());
        if let Some(key) = &tag.key {
            let json = key.to_json().to_string();
            name.push('-');
            if json.len() * 2 <= MAX_HEX_KEY {
                name.push_str(&hex::encode(json));
            } else {
                name.push_str("sha256-");
                name.push_str(&hex::encode(Sha256::digest(json.as_bytes())));
            }
        }
        self.base_path.join(format!("{name}.json"))
    }
}

impl Store for FileStore {
    fn load(&self, tag: &StateTag) -> Result<Option<Value>, StoreError> {
        let path = self.path(tag);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(StoreError::Io { path, error }),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|error| StoreError::Json { path, error })
    }

    fn save(&self, tag: &StateTag, value: &Value) -> Result<(), StoreError> {
        let path = self.path(tag);
        let text = match serde_json::to_string(value) {
            Ok(text) => text,
            Err(error) => return Err(StoreError::Json { path, error }),
        };
        fs::write(&path, text).map_err(|error| StoreError::Io { path, error })
    }

    fn remove(&self, tag: &StateTag) -> Result<(), StoreError> {
        let path = self.path(tag);
        match fs::remove_file(&path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => {
                Err(StoreError::Io { path, error })
            }
            _ => Ok(()),
        }
    }
}
