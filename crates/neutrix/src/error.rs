//! Error taxonomy for the store engine and its optional subsystems.
//!
//! | Error | Raised by | State after |
//! |-------|-----------|-------------|
//! | [`StoreError::ValidationFailed`] | `set`, `batch`, `remove` | unchanged |
//! | [`StoreError::CircularReference`] | `set`, `batch` | unchanged |
//! | [`StoreError::PrototypePollution`] | `set`, `batch` | unchanged |
//! | [`StoreError::Middleware`] | `get`, `set`, `batch` | unchanged |
//! | [`StoreError::CircularDependency`] | `Computed::get` | cache entry left empty |
//! | [`PersistError`] | storage backends | reported via `tracing`, never returned by the store |
//!
//! Persistence and observer failures are isolated at their boundary: they are
//! logged and never roll back or block a commit.

use std::path::PathBuf;

pub use neutrix_core::CacheError;
use neutrix_core::Path;

/// Boxed error type returned by middleware hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced synchronously by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The configured validator rejected the candidate state.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// The candidate value nests deeper than [`neutrix_core::MAX_DEPTH`].
    #[error("circular reference detected while writing `{path}`")]
    CircularReference { path: Path },

    /// A computed value read itself, directly or transitively.
    #[error("circular dependency detected in computed value `{0}`")]
    CircularDependency(String),

    /// A path segment or payload key targets a reserved prototype key.
    #[error("refusing to write reserved key `{key}` under `{path}`")]
    PrototypePollution { key: String, path: Path },

    /// A middleware hook failed; the hook's own error is preserved as-is.
    #[error(transparent)]
    Middleware(BoxError),

    /// The state could not be serialized.
    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    /// Build a middleware error from any error type.
    pub fn middleware(error: impl Into<BoxError>) -> Self {
        StoreError::Middleware(error.into())
    }
}

/// Failures of the persistence adapter and storage backends.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("storage I/O failed for `{}`: {}", path.display(), source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("persisted state for `{key}` could not be encoded or decoded: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Failures loading a [`StoreConfig`](crate::StoreConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config `{}`: {}", path.display(), source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Capacity(#[from] CacheError),
}

/// Failure reported by a [`StoreObserver`](crate::StoreObserver).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("store observer failed: {0}")]
pub struct ObserverError(pub String);
