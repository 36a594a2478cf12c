//! Memoized values derived from store state.
//!
//! A computed function reads state through a [`Tracker`]. Every path it reads
//! is recorded as a dependency, and the result is cached in the store's LRU
//! under the computed id. A commit drops exactly the cached entries whose
//! dependencies are related to a changed path (equal, ancestor or
//! descendant).
//!
//! # Invariants
//!
//! 1. A cached entry is only served while none of its recorded dependencies
//!    has changed.
//! 2. An id never evaluates inside its own evaluation; re-entry fails with
//!    [`StoreError::CircularDependency`].
//! 3. When computed `outer` reads computed `inner`, `outer` also depends on
//!    everything `inner` reads, whether `inner` was evaluated or served from
//!    cache.
//! 4. Evicting an id from the LRU also drops its dependency edges.
//!
//! # Failure Modes
//!
//! | Failure | Effect |
//! |---------|--------|
//! | Computed function returns `Err` | Error propagates; the id is left uncached |
//! | State changes during evaluation | Result is returned but not cached |
//! | Cached entry has another type | Entry is re-evaluated and replaced |

use std::any::Any;
use std::fmt;
use std::num::NonZeroUsize;
use std::rc::Rc;

use neutrix_core::{DependencyGraph, IntoPath, LruCache, Path, Value, get_in};

use crate::error::StoreError;
use crate::store::{Inner, Store};

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

pub(crate) struct ComputedCache {
    values: LruCache<String, Rc<dyn Any>>,
    graph: DependencyGraph<String>,
}

impl ComputedCache {
    pub(crate) fn new(capacity: NonZeroUsize) -> Self {
        Self {
            values: LruCache::with_capacity(capacity),
            graph: DependencyGraph::new(),
        }
    }

    fn lookup(&mut self, id: &str) -> Option<Rc<dyn Any>> {
        self.values.get(id).cloned()
    }

    fn insert(&mut self, id: String, value: Rc<dyn Any>) {
        if let Some((evicted, _)) = self.values.set(id, value) {
            tracing::debug!(id = %evicted, "evicted computed value");
            self.graph.forget(&evicted);
        }
    }

    fn record(&mut self, path: &Path, ids: &[String]) {
        for id in ids {
            self.graph.record(path.clone(), id.clone());
        }
    }

    /// Copy `from`'s dependencies onto every id in `into`.
    fn inherit(&mut self, from: &str, into: &[String]) {
        for path in self.graph.dependencies_of(&from.to_owned()) {
            self.record(&path, into);
        }
    }

    fn forget(&mut self, id: &str) {
        self.values.delete(id);
        self.graph.forget(&id.to_owned());
    }

    /// Drop every entry depending on `changed`. Returns how many were dropped.
    pub(crate) fn invalidate(&mut self, changed: &Path) -> usize {
        let ids = self.graph.invalidate(changed);
        for id in &ids {
            self.values.delete(id.as_str());
        }
        ids.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    fn contains(&self, id: &str) -> bool {
        self.values.has(id)
    }

    fn dependencies_of(&self, id: &str) -> Vec<Path> {
        self.graph.dependencies_of(&id.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Read-only view handed to computed functions.
///
/// Reads bypass middleware and record dependencies for every computed value
/// currently being evaluated.
pub struct Tracker<'a> {
    store: &'a Store,
}

impl Tracker<'_> {
    /// Read `path` and depend on it. Missing paths read as `Null`.
    #[must_use]
    pub fn get(&self, path: impl IntoPath) -> Value {
        let path = path.into_path();
        self.store.track(&path);
        self.store.read_raw(&path)
    }

    /// Read the whole tree and depend on every path.
    #[must_use]
    pub fn state(&self) -> Value {
        self.get(Path::root())
    }

    /// Whether `path` exists. Counts as a read of `path`.
    #[must_use]
    pub fn has(&self, path: impl IntoPath) -> bool {
        let path = path.into_path();
        self.store.track(&path);
        get_in(&self.store.inner.state.borrow(), &path).is_some()
    }

    /// The store being read, for evaluating other computed values.
    #[must_use]
    pub fn store(&self) -> &Store {
        self.store
    }
}

// ---------------------------------------------------------------------------
// Computed
// ---------------------------------------------------------------------------

type EvalFn<T> = Rc<dyn Fn(&Tracker<'_>) -> Result<T, StoreError>>;

/// Handle to a memoized derived value, created by [`Store::computed`].
pub struct Computed<T> {
    store: Store,
    id: String,
    eval: EvalFn<T>,
}

impl<T: Clone + 'static> Computed<T> {
    /// The cached value, or a fresh evaluation if the cache entry is missing
    /// or stale.
    ///
    /// # Errors
    ///
    /// [`StoreError::CircularDependency`] if the value (transitively) reads
    /// itself, or whatever the computed function returns.
    pub fn get(&self) -> Result<T, StoreError> {
        self.store.evaluate(&self.id, self.eval.as_ref())
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether a cached value is currently held for this id.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.store.inner.computed.borrow().contains(&self.id)
    }

    /// Paths this value depended on at its last evaluation, sorted.
    #[must_use]
    pub fn dependencies(&self) -> Vec<Path> {
        self.store.inner.computed.borrow().dependencies_of(&self.id)
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            id: self.id.clone(),
            eval: Rc::clone(&self.eval),
        }
    }
}

impl<T> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed").field("id", &self.id).finish()
    }
}

/// Pops the evaluation stack when an evaluation ends, including by unwinding.
struct EvalFrame<'a> {
    inner: &'a Inner,
}

impl<'a> EvalFrame<'a> {
    fn push(inner: &'a Inner, id: &str) -> Self {
        inner.evaluating.borrow_mut().push(id.to_owned());
        Self { inner }
    }
}

impl Drop for EvalFrame<'_> {
    fn drop(&mut self) {
        self.inner.evaluating.borrow_mut().pop();
    }
}

impl Store {
    /// Register a computed value under `id`.
    ///
    /// Ids share one cache per store. Registering the same id twice with
    /// different functions makes them share a cache slot.
    pub fn computed<T, F>(&self, id: impl Into<String>, f: F) -> Computed<T>
    where
        T: Clone + 'static,
        F: Fn(&Tracker<'_>) -> Result<T, StoreError> + 'static,
    {
        Computed {
            store: self.clone(),
            id: id.into(),
            eval: Rc::new(f),
        }
    }

    /// Number of computed values currently cached.
    #[must_use]
    pub fn computed_cache_len(&self) -> usize {
        self.inner.computed.borrow().len()
    }

    fn track(&self, path: &Path) {
        let active = self.inner.evaluating.borrow().clone();
        if !active.is_empty() {
            self.inner.computed.borrow_mut().record(path, &active);
        }
    }

    fn evaluate<T: Clone + 'static>(
        &self,
        id: &str,
        eval: &dyn Fn(&Tracker<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let cached = self.inner.computed.borrow_mut().lookup(id);
        if let Some(value) = cached.as_deref().and_then(|any| any.downcast_ref::<T>()) {
            let active = self.inner.evaluating.borrow().clone();
            if !active.is_empty() {
                self.inner.computed.borrow_mut().inherit(id, &active);
            }
            return Ok(value.clone());
        }

        if self.inner.evaluating.borrow().iter().any(|active| active == id) {
            tracing::debug!(id, "computed value reads itself");
            return Err(StoreError::CircularDependency(id.to_owned()));
        }

        self.inner.computed.borrow_mut().forget(id);
        let version = self.version();
        let result = {
            let _frame = EvalFrame::push(&self.inner, id);
            eval(&Tracker { store: self })
        };

        match result {
            Ok(value) => {
                if self.version() == version {
                    self.inner
                        .computed
                        .borrow_mut()
                        .insert(id.to_owned(), Rc::new(value.clone()));
                } else {
                    self.inner.computed.borrow_mut().forget(id);
                }
                Ok(value)
            }
            Err(err) => {
                self.inner.computed.borrow_mut().forget(id);
                Err(err)
            }
        }
    }
}
