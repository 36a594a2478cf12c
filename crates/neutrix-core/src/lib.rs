#![forbid(unsafe_code)]

//! Core primitives for the Neutrix state store.
//!
//! This crate provides the callback-free building blocks the store engine is
//! assembled from:
//!
//! - [`Value`]: the state tree. Maps and sequences are persistent
//!   collections, so cloning a tree is cheap and every update shares the
//!   branches it does not touch.
//! - [`Path`] and the [`path`] helpers: dotted-path normalization plus nested
//!   get/set/delete over a [`Value`] tree.
//! - [`LruCache`]: fixed-capacity cache with strict recency order, used to
//!   memoize computed values.
//! - [`DependencyGraph`]: path → dependent-id edges used to invalidate exactly
//!   the cache entries a change can affect.

pub mod error;
pub mod graph;
pub mod lru;
pub mod path;
pub mod value;

pub use error::CacheError;
pub use graph::DependencyGraph;
pub use lru::{CacheStats, LruCache};
pub use path::{IntoPath, Path, delete_in, get_in, is_reserved_key, resolve_path, set_in};
pub use value::{MAX_DEPTH, Value};
