//! Errors raised by the core primitives.

/// Construction errors for [`LruCache`](crate::LruCache).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// The requested capacity was zero.
    #[error("cache capacity must be greater than 0 (got {capacity})")]
    InvalidCapacity { capacity: usize },
}
