//! Best-effort persistence of the state tree to a keyed storage slot.
//!
//! # Document layout
//!
//! The slot holds the state serialized as JSON (optionally passed through a
//! caller-supplied transform first). When a [`Migration`] is configured, every
//! write stamps a reserved top-level `__version` integer. The field is
//! stripped from the state on load; a document without it counts as
//! version 0.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Fallback |
//! |---------|-------|----------|
//! | Read error | I/O, backend failure | Initial state, error logged |
//! | Parse error | Corrupt or foreign document | Initial state, error logged |
//! | Validation failure | Stored state no longer valid | Initial state, error logged |
//! | Write error | I/O, backend failure | In-memory commit kept, error logged |

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path as FsPath, PathBuf};
use std::rc::Rc;

use neutrix_core::Value;

use crate::error::PersistError;

/// Reserved top-level field carrying the schema version of a persisted document.
pub const VERSION_KEY: &str = "__version";

thread_local! {
    static SHARED_STORAGE: MemoryStorage = MemoryStorage::new();
}

/// A keyed durable-storage slot map.
pub trait StorageBackend {
    /// Read the document stored under `key`, if any.
    fn read(&self, key: &str) -> Result<Option<String>, PersistError>;

    /// Replace the document stored under `key`.
    fn write(&self, key: &str, data: &str) -> Result<(), PersistError>;

    /// Delete the document stored under `key`. Missing keys are not an error.
    fn remove(&self, key: &str) -> Result<(), PersistError>;
}

// ---------------------------------------------------------------------------
// MemoryStorage
// ---------------------------------------------------------------------------

/// In-process storage. Clones share the same slots.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    slots: Rc<RefCell<HashMap<String, String>>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The thread's shared storage, used when persistence is enabled without
    /// an explicit backend.
    #[must_use]
    pub fn shared() -> Self {
        SHARED_STORAGE.with(Clone::clone)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.slots.borrow().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, data: impl Into<String>) {
        self.slots.borrow_mut().insert(key.into(), data.into());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }
}

impl fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("slots", &self.slots.borrow().len())
            .finish()
    }
}

impl StorageBackend for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<String>, PersistError> {
        Ok(self.get(key))
    }

    fn write(&self, key: &str, data: &str) -> Result<(), PersistError> {
        self.insert(key, data);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistError> {
        self.slots.borrow_mut().remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileStorage
// ---------------------------------------------------------------------------

/// One `<key>.json` file per slot under a directory.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// reader never observes a half-written document.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &FsPath {
        &self.dir
    }

    /// File backing `key`. Characters outside `[A-Za-z0-9._-]` become `_`.
    #[must_use]
    pub fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

impl StorageBackend for FileStorage {
    fn read(&self, key: &str) -> Result<Option<String>, PersistError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PersistError::Io { path, source }),
        }
    }

    fn write(&self, key: &str, data: &str) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir).map_err(|source| PersistError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data).map_err(|source| PersistError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| PersistError::Io { path, source })
    }

    fn remove(&self, key: &str) -> Result<(), PersistError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PersistError::Io { path, source }),
        }
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Function applied to the state before it is written.
pub type StateTransform = Rc<dyn Fn(&Value) -> Value>;

/// Whether and how the store persists its state.
#[derive(Clone, Default)]
pub enum Persist {
    #[default]
    Disabled,
    Enabled,
    /// Persist the output of the transform instead of the raw state.
    Transform(StateTransform),
}

impl Persist {
    /// Persist `f(state)` on every commit.
    pub fn transform(f: impl Fn(&Value) -> Value + 'static) -> Self {
        Persist::Transform(Rc::new(f))
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Persist::Disabled)
    }
}

impl From<bool> for Persist {
    fn from(enabled: bool) -> Self {
        if enabled {
            Persist::Enabled
        } else {
            Persist::Disabled
        }
    }
}

impl fmt::Debug for Persist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Persist::Disabled => f.write_str("Disabled"),
            Persist::Enabled => f.write_str("Enabled"),
            Persist::Transform(_) => f.write_str("Transform(..)"),
        }
    }
}

/// Upgrades persisted documents older than `version`.
#[derive(Clone)]
pub struct Migration {
    version: u64,
    migrate: Rc<dyn Fn(Value) -> Value>,
}

impl Migration {
    pub fn new(version: u64, migrate: impl Fn(Value) -> Value + 'static) -> Self {
        Self {
            version,
            migrate: Rc::new(migrate),
        }
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// A document read back from storage.
#[derive(Debug)]
pub(crate) struct Restored {
    pub state: Value,
    /// The migration ran; the slot should be rewritten with the new version.
    pub migrated: bool,
}

/// Binds a store to one storage slot.
pub(crate) struct Persistence {
    key: String,
    backend: Rc<dyn StorageBackend>,
    transform: Option<StateTransform>,
    migration: Option<Migration>,
}

impl Persistence {
    pub(crate) fn new(
        key: impl Into<String>,
        backend: Rc<dyn StorageBackend>,
        persist: &Persist,
        migration: Option<Migration>,
    ) -> Self {
        let transform = match persist {
            Persist::Transform(f) => Some(Rc::clone(f)),
            _ => None,
        };
        Self {
            key: key.into(),
            backend,
            transform,
            migration,
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    /// Read, parse, and migrate the stored document.
    pub(crate) fn load(&self) -> Result<Option<Restored>, PersistError> {
        let Some(raw) = self.backend.read(&self.key)? else {
            return Ok(None);
        };
        let parsed: serde_json::Value =
            serde_json::from_str(&raw).map_err(|source| PersistError::Json {
                key: self.key.clone(),
                source,
            })?;

        let mut state = Value::from(parsed);
        let stored_version = strip_version(&mut state).unwrap_or(0);

        let mut migrated = false;
        if let Some(migration) = &self.migration {
            if stored_version < migration.version {
                tracing::debug!(
                    key = %self.key,
                    from = stored_version,
                    to = migration.version,
                    "migrating persisted state"
                );
                state = (migration.migrate)(state);
                strip_version(&mut state);
                migrated = true;
            }
        }

        Ok(Some(Restored { state, migrated }))
    }

    /// Serialize `state` into the slot.
    pub(crate) fn save(&self, state: &Value) -> Result<(), PersistError> {
        let mut document = match &self.transform {
            Some(transform) => transform(state),
            None => state.clone(),
        };
        if let (Some(migration), Value::Map(map)) = (&self.migration, &mut document) {
            map.insert(VERSION_KEY.to_owned(), Value::from(migration.version));
        }
        let text = serde_json::to_string(&document).map_err(|source| PersistError::Json {
            key: self.key.clone(),
            source,
        })?;
        self.backend.write(&self.key, &text)
    }

    /// Delete the slot.
    pub(crate) fn clear(&self) -> Result<(), PersistError> {
        self.backend.remove(&self.key)
    }
}

fn strip_version(state: &mut Value) -> Option<u64> {
    match state {
        Value::Map(map) => map.remove(VERSION_KEY).and_then(|v| v.as_u64()),
        _ => None,
    }
}

impl fmt::Debug for Persistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persistence")
            .field("key", &self.key)
            .field("transform", &self.transform.is_some())
            .field("migration", &self.migration)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
