//! Store configuration.
//!
//! [`StoreOptions`] is the full construction-time configuration, including
//! the function-valued options (validator, migration, persistence transform)
//! and injected collaborators (storage backend, observer).
//!
//! [`StoreConfig`] is its data-only subset, loadable from TOML or JSON so a
//! host can keep store settings alongside the rest of its configuration:
//!
//! ```toml
//! name = "cart"
//! persist = true
//! dev_tools = false
//! cache_capacity = 256
//! storage_dir = "/var/lib/app/state"
//! ```

use std::fmt;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path as FsPath, PathBuf};
use std::rc::Rc;

use neutrix_core::{CacheError, Value};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::observer::StoreObserver;
use crate::persist::{FileStorage, Migration, Persist, StorageBackend};

/// Storage key and devtools label used when no name is configured.
pub const DEFAULT_STORE_NAME: &str = "neutrix-store";

/// Default number of computed results kept in the LRU cache.
pub const DEFAULT_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(n) => n,
    None => unreachable!(),
};

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Outcome of a state validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    Invalid,
    /// Rejected with a message that becomes the error detail.
    Rejected(String),
}

impl From<bool> for Validation {
    fn from(ok: bool) -> Self {
        if ok {
            Validation::Valid
        } else {
            Validation::Invalid
        }
    }
}

impl From<String> for Validation {
    fn from(message: String) -> Self {
        Validation::Rejected(message)
    }
}

impl From<&str> for Validation {
    fn from(message: &str) -> Self {
        Validation::Rejected(message.to_owned())
    }
}

impl From<Result<(), String>> for Validation {
    fn from(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Validation::Valid,
            Err(message) => Validation::Rejected(message),
        }
    }
}

/// Shared validator function.
pub type Validator = Rc<dyn Fn(&Value) -> Validation>;

// ---------------------------------------------------------------------------
// StoreOptions
// ---------------------------------------------------------------------------

/// Construction-time store configuration.
#[derive(Clone)]
pub struct StoreOptions {
    pub(crate) name: Option<String>,
    pub(crate) dev_tools: bool,
    pub(crate) persist: Persist,
    pub(crate) validator: Option<Validator>,
    pub(crate) migration: Option<Migration>,
    pub(crate) concurrent: bool,
    pub(crate) cache_capacity: NonZeroUsize,
    pub(crate) storage: Option<Rc<dyn StorageBackend>>,
    pub(crate) observer: Option<Rc<dyn StoreObserver>>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            name: None,
            dev_tools: false,
            persist: Persist::Disabled,
            validator: None,
            migration: None,
            concurrent: false,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            storage: None,
            observer: None,
        }
    }
}

impl StoreOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build options from a data-only [`StoreConfig`].
    ///
    /// A configured `storage_dir` selects [`FileStorage`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Capacity`] when `cache_capacity` is zero.
    pub fn from_config(config: &StoreConfig) -> Result<Self, ConfigError> {
        let mut options = Self::new()
            .with_dev_tools(config.dev_tools)
            .with_persist(config.persist)
            .with_concurrent(config.concurrent);
        if let Some(name) = &config.name {
            options = options.with_name(name.clone());
        }
        if let Some(capacity) = config.cache_capacity {
            let capacity =
                NonZeroUsize::new(capacity).ok_or(CacheError::InvalidCapacity { capacity })?;
            options = options.with_cache_capacity(capacity);
        }
        if let Some(dir) = &config.storage_dir {
            options = options.with_storage(FileStorage::new(dir.clone()));
        }
        Ok(options)
    }

    /// Storage key and devtools label.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Report lifecycle events to the configured observer.
    #[must_use]
    pub fn with_dev_tools(mut self, enabled: bool) -> Self {
        self.dev_tools = enabled;
        self
    }

    #[must_use]
    pub fn with_persist(mut self, persist: impl Into<Persist>) -> Self {
        self.persist = persist.into();
        self
    }

    /// Persist `f(state)` instead of the raw state.
    #[must_use]
    pub fn with_persist_transform(mut self, f: impl Fn(&Value) -> Value + 'static) -> Self {
        self.persist = Persist::transform(f);
        self
    }

    /// Validate every candidate state before it is committed.
    ///
    /// The validator may return `bool`, a rejection message, or a
    /// [`Validation`].
    #[must_use]
    pub fn with_validator<V: Into<Validation>>(
        mut self,
        validate: impl Fn(&Value) -> V + 'static,
    ) -> Self {
        self.validator = Some(Rc::new(move |state| validate(state).into()));
        self
    }

    #[must_use]
    pub fn with_migration(mut self, migration: Migration) -> Self {
        self.migration = Some(migration);
        self
    }

    /// Reserved scheduling hint for hosts with concurrent rendering. The
    /// engine records it but does not change behavior.
    #[must_use]
    pub fn with_concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Storage backend for persistence. Without one, persistence uses
    /// [`MemoryStorage::shared`](crate::MemoryStorage::shared).
    #[must_use]
    pub fn with_storage(mut self, storage: impl StorageBackend + 'static) -> Self {
        self.storage = Some(Rc::new(storage));
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: impl StoreObserver + 'static) -> Self {
        self.observer = Some(Rc::new(observer));
        self
    }

    /// The configured name, or [`DEFAULT_STORE_NAME`].
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_STORE_NAME)
    }

    #[must_use]
    pub fn dev_tools(&self) -> bool {
        self.dev_tools
    }

    #[must_use]
    pub fn persist(&self) -> &Persist {
        &self.persist
    }

    #[must_use]
    pub fn concurrent(&self) -> bool {
        self.concurrent
    }

    #[must_use]
    pub fn cache_capacity(&self) -> NonZeroUsize {
        self.cache_capacity
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("name", &self.name)
            .field("dev_tools", &self.dev_tools)
            .field("persist", &self.persist)
            .field("validator", &self.validator.is_some())
            .field("migration", &self.migration)
            .field("concurrent", &self.concurrent)
            .field("cache_capacity", &self.cache_capacity)
            .field("storage", &self.storage.is_some())
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

/// Data-only store settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub name: Option<String>,
    pub dev_tools: bool,
    pub persist: bool,
    pub concurrent: bool,
    pub cache_capacity: Option<usize>,
    pub storage_dir: Option<PathBuf>,
}

impl StoreConfig {
    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Toml`] on malformed input or unknown keys.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    /// Parse a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] on malformed input or unknown keys.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(input)?)
    }

    /// Load from a file; `.json` files are parsed as JSON, anything else as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or a parse error.
    pub fn load(path: impl AsRef<FsPath>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&text)
        } else {
            Self::from_toml_str(&text)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = StoreOptions::default();
        assert_eq!(options.name(), DEFAULT_STORE_NAME);
        assert!(!options.persist().is_enabled());
        assert_eq!(options.cache_capacity().get(), 100);
        assert!(!options.concurrent());
    }

    #[test]
    fn validation_conversions() {
        assert_eq!(Validation::from(true), Validation::Valid);
        assert_eq!(Validation::from(false), Validation::Invalid);
        assert_eq!(
            Validation::from("count must be positive"),
            Validation::Rejected("count must be positive".into())
        );
        assert_eq!(Validation::from(Ok::<(), String>(())), Validation::Valid);
    }

    #[test]
    fn toml_config() {
        let config = StoreConfig::from_toml_str(
            r#"
            name = "cart"
            persist = true
            cache_capacity = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.name.as_deref(), Some("cart"));
        assert!(config.persist);
        let options = StoreOptions::from_config(&config).unwrap();
        assert_eq!(options.name(), "cart");
        assert!(options.persist().is_enabled());
        assert_eq!(options.cache_capacity().get(), 8);
    }

    #[test]
    fn json_config_and_unknown_keys() {
        let config = StoreConfig::from_json_str(r#"{"dev_tools": true}"#).unwrap();
        assert!(config.dev_tools);
        assert!(matches!(
            StoreConfig::from_json_str(r#"{"devtools": true}"#),
            Err(ConfigError::Json(_))
        ));
        assert!(matches!(
            StoreConfig::from_toml_str("persist = 3"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let config = StoreConfig {
            cache_capacity: Some(0),
            ..StoreConfig::default()
        };
        assert!(matches!(
            StoreOptions::from_config(&config),
            Err(ConfigError::Capacity(CacheError::InvalidCapacity { capacity: 0 }))
        ));
    }

    #[test]
    fn load_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("store.toml");
        fs::write(&toml_path, "name = \"a\"\nstorage_dir = \"state\"\n").unwrap();
        let config = StoreConfig::load(&toml_path).unwrap();
        assert_eq!(config.storage_dir, Some(PathBuf::from("state")));

        let json_path = dir.path().join("store.JSON");
        fs::write(&json_path, r#"{"name": "b"}"#).unwrap();
        assert_eq!(StoreConfig::load(&json_path).unwrap().name.as_deref(), Some("b"));

        assert!(matches!(
            StoreConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
