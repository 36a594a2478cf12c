#![forbid(unsafe_code)]

//! Reactive state store with path access, memoized computed values,
//! middleware, batching, and optional persistence.
//!
//! This crate provides:
//! - [`Store`]: a single state tree addressed by dotted paths, with
//!   subscribers, a middleware chain and an optional validator
//! - [`Computed`]: memoized derived values that are invalidated only when a
//!   path they read changes
//! - [`Action`] and [`Store::suspend`]: async helpers bound to a store
//! - [`connect_stores`]: one-way `when`/`then` reactions between stores
//! - [`StorageBackend`] implementations and [`Migration`] for persistence
//!
//! # Example
//!
//! ```
//! use neutrix::{Store, Value};
//! use serde_json::json;
//!
//! let store = Store::new(json!({"count": 1}));
//! let double = store.computed("double", |t| Ok(t.get("count").as_i64().unwrap_or(0) * 2));
//!
//! store.set("count", 4).unwrap();
//! assert_eq!(double.get().unwrap(), 8);
//! assert_eq!(store.get("count").unwrap(), Value::from(4));
//! ```

pub mod action;
pub mod computed;
pub mod config;
pub mod connect;
pub mod error;
pub mod middleware;
pub mod observer;
pub mod persist;
pub mod snapshot;
pub mod store;
pub mod suspend;

pub use action::Action;
pub use computed::{Computed, Tracker};
pub use config::{StoreConfig, StoreOptions, Validation, Validator};
pub use connect::{Connections, StoreConnection, connect_store, connect_stores};
pub use error::{BoxError, ConfigError, ObserverError, PersistError, StoreError};
pub use middleware::{Middleware, MiddlewareHandle, Updates};
pub use observer::{ObservedEvent, RecordingObserver, StoreObserver};
pub use persist::{FileStorage, MemoryStorage, Migration, Persist, StorageBackend};
pub use store::{Store, Subscription, WeakStore};
pub use suspend::{SuspendHandle, Suspense};

pub use neutrix_core::{CacheError, IntoPath, LruCache, MAX_DEPTH, Path, Value};
