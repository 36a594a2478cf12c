//! Middleware hooks intercepting reads and writes.
//!
//! Middleware run in registration order. Each hook receives the output of the
//! previous one; an error from any hook aborts the operation and is returned
//! to the caller as [`StoreError::Middleware`] without retry.
//!
//! Every hook has a pass-through default, so an implementation only overrides
//! what it needs:
//!
//! ```ignore
//! struct Clamp;
//!
//! impl Middleware for Clamp {
//!     fn on_set(&self, path: &Path, next: Value, _prev: &Value) -> Result<Value, BoxError> {
//!         match next.as_i64() {
//!             Some(n) if path.to_dotted() == "count" => Ok(Value::from(n.max(0))),
//!             _ => Ok(next),
//!         }
//!     }
//! }
//! ```

use std::rc::{Rc, Weak};

use neutrix_core::{Path, Value};

use crate::error::{BoxError, StoreError};
use crate::store::Inner;

/// A batch as seen by [`Middleware::on_batch`].
pub type Updates = Vec<(Path, Value)>;

/// Interceptor for store reads and writes.
pub trait Middleware {
    /// Transform a value read by `get`.
    fn on_get(&self, path: &Path, value: Value) -> Result<Value, BoxError> {
        let _ = path;
        Ok(value)
    }

    /// Transform a value about to be written at `path`; `prev` is the value
    /// currently stored there (`Null` if missing).
    fn on_set(&self, path: &Path, next: Value, prev: &Value) -> Result<Value, BoxError> {
        let _ = (path, prev);
        Ok(next)
    }

    /// Rewrite a batch before its updates are applied.
    fn on_batch(&self, updates: Updates) -> Result<Updates, BoxError> {
        Ok(updates)
    }

    /// Observe a failed `set`, `batch`, or `remove`.
    fn on_error(&self, error: &StoreError) {
        let _ = error;
    }
}

impl<M: Middleware + ?Sized> Middleware for Rc<M> {
    fn on_get(&self, path: &Path, value: Value) -> Result<Value, BoxError> {
        (**self).on_get(path, value)
    }

    fn on_set(&self, path: &Path, next: Value, prev: &Value) -> Result<Value, BoxError> {
        (**self).on_set(path, next, prev)
    }

    fn on_batch(&self, updates: Updates) -> Result<Updates, BoxError> {
        (**self).on_batch(updates)
    }

    fn on_error(&self, error: &StoreError) {
        (**self).on_error(error);
    }
}

/// Registration guard returned by [`Store::use_middleware`](crate::Store::use_middleware).
///
/// Dropping the guard unregisters the middleware, like a
/// [`Subscription`](crate::Subscription). Use [`detach`](Self::detach) to keep
/// it registered for the life of the store.
#[derive(Debug)]
#[must_use = "dropping this guard removes the middleware"]
pub struct MiddlewareHandle {
    pub(crate) store: Weak<Inner>,
    pub(crate) id: u64,
}

impl MiddlewareHandle {
    /// Unregister the middleware. Calling this more than once is a no-op.
    pub fn remove(&self) {
        if let Some(inner) = self.store.upgrade() {
            let removed = crate::store::take_entry(&inner.middleware, self.id);
            drop(removed);
        }
    }

    /// Keep the middleware registered without holding the guard.
    pub fn detach(mut self) {
        self.store = Weak::new();
    }
}

impl Drop for MiddlewareHandle {
    fn drop(&mut self) {
        self.remove();
    }
}
