//! The store engine.
//!
//! A [`Store`] owns one state tree plus the subscriber set, middleware chain,
//! computed-value cache and dependency graph built around it. Handles are
//! cheap to clone and share the same engine.
//!
//! # Commit pipeline
//!
//! Every `set`, `batch`, `remove` and rehydrate goes through the same stages:
//!
//! ```text
//! Pending -> MiddlewareApplied -> Validated -> Committed -> Notified -> Persisted
//! ```
//!
//! Any failure before `Committed` leaves the state exactly as it was. After
//! `Committed`, observer and persistence failures are logged and never undo
//! the commit.
//!
//! # Invariants
//!
//! 1. The state tree is replaced, never mutated in place; snapshots returned
//!    by [`Store::get_state`] stay valid forever.
//! 2. An update whose middleware-transformed value equals the current value
//!    is a no-op: no commit, no notification, no persistence write.
//! 3. A batch commits at most once and notifies each subscriber at most once.
//! 4. No internal borrow is held while user code runs (subscribers,
//!    middleware, validators, computed functions, observers), so callbacks may
//!    call back into the store.
//!
//! # Threading
//!
//! The engine targets a single-threaded, run-to-completion host; `Store` is
//! neither `Send` nor `Sync`.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use neutrix_core::{IntoPath, MAX_DEPTH, Path, Value, delete_in, get_in, set_in};

use crate::computed::ComputedCache;
use crate::config::{StoreOptions, Validation, Validator};
use crate::error::{ObserverError, PersistError, StoreError};
use crate::middleware::{Middleware, MiddlewareHandle, Updates};
use crate::observer::StoreObserver;
use crate::persist::{MemoryStorage, Persistence, StorageBackend};
use crate::suspend::SuspendSlot;

type Subscriber = Rc<dyn Fn()>;

pub(crate) struct Inner {
    pub(crate) state: RefCell<Value>,
    version: Cell<u64>,
    next_id: Cell<u64>,
    pub(crate) subscribers: RefCell<Vec<(u64, Subscriber)>>,
    pub(crate) middleware: RefCell<Vec<(u64, Rc<dyn Middleware>)>>,
    pub(crate) computed: RefCell<ComputedCache>,
    /// Computed ids currently being evaluated, innermost last.
    pub(crate) evaluating: RefCell<Vec<String>>,
    pub(crate) suspended: RefCell<HashMap<String, SuspendSlot>>,
    name: String,
    concurrent: bool,
    validator: Option<Validator>,
    persistence: Option<Persistence>,
    observer: Option<Rc<dyn StoreObserver>>,
}

impl fmt::Debug for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inner")
            .field("name", &self.name)
            .field("version", &self.version.get())
            .finish_non_exhaustive()
    }
}

/// Shared handle to a state store.
#[derive(Clone)]
pub struct Store {
    pub(crate) inner: Rc<Inner>,
}

/// Non-owning handle to a [`Store`].
#[derive(Clone, Debug)]
pub struct WeakStore {
    inner: Weak<Inner>,
}

impl WeakStore {
    #[must_use]
    pub fn upgrade(&self) -> Option<Store> {
        self.inner.upgrade().map(|inner| Store { inner })
    }
}

impl Store {
    /// Create a store with default options.
    #[must_use]
    pub fn new(initial: impl Into<Value>) -> Self {
        Self::with_options(initial, StoreOptions::default())
    }

    /// Create a store.
    ///
    /// With persistence enabled, the stored document (if any) replaces
    /// `initial` after migration and validation. Any failure on that path is
    /// logged and the store starts from `initial`.
    #[must_use]
    pub fn with_options(initial: impl Into<Value>, options: StoreOptions) -> Self {
        let initial = initial.into();
        let StoreOptions {
            name,
            dev_tools,
            persist,
            validator,
            migration,
            concurrent,
            cache_capacity,
            storage,
            observer,
        } = options;
        let name = name.unwrap_or_else(|| crate::config::DEFAULT_STORE_NAME.to_owned());

        let persistence = persist.is_enabled().then(|| {
            let backend: Rc<dyn StorageBackend> =
                storage.unwrap_or_else(|| Rc::new(MemoryStorage::shared()));
            Persistence::new(name.clone(), backend, &persist, migration)
        });

        let (state, migrated) = match &persistence {
            Some(persistence) => restore(persistence, validator.as_ref(), initial),
            None => (initial, false),
        };

        let store = Store {
            inner: Rc::new(Inner {
                state: RefCell::new(state),
                version: Cell::new(0),
                next_id: Cell::new(0),
                subscribers: RefCell::new(Vec::new()),
                middleware: RefCell::new(Vec::new()),
                computed: RefCell::new(ComputedCache::new(cache_capacity)),
                evaluating: RefCell::new(Vec::new()),
                suspended: RefCell::new(HashMap::new()),
                name,
                concurrent,
                validator,
                persistence,
                observer: if dev_tools { observer } else { None },
            }),
        };

        if migrated {
            store.persist();
        }
        let name = store.inner.name.clone();
        store.observe(|observer, state| observer.on_init(&name, state));
        store
    }

    /// Non-owning handle, for callbacks that must not keep the store alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakStore {
        WeakStore {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Whether two handles refer to the same engine.
    #[must_use]
    pub fn ptr_eq(&self, other: &Store) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of commits since construction.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.inner.persistence.is_some()
    }

    /// Delete this store's persisted document. The in-memory state is kept.
    ///
    /// # Errors
    ///
    /// Returns the backend's [`PersistError`] if the slot cannot be removed.
    pub fn clear_persisted(&self) -> Result<(), PersistError> {
        match &self.inner.persistence {
            Some(persistence) => persistence.clear(),
            None => Ok(()),
        }
    }

    /// The reserved `concurrent` scheduling hint.
    #[must_use]
    pub fn is_concurrent(&self) -> bool {
        self.inner.concurrent
    }

    // -------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------

    /// Read `path` through every middleware's `on_get`.
    ///
    /// Missing paths read as `Null`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Middleware`] if a hook fails.
    pub fn get(&self, path: impl IntoPath) -> Result<Value, StoreError> {
        let path = path.into_path();
        let raw = self.read_raw(&path);
        self.middleware_snapshot()
            .iter()
            .try_fold(raw, |value, mw| {
                mw.on_get(&path, value).map_err(StoreError::Middleware)
            })
    }

    /// Whether a value exists at `path`. Bypasses middleware.
    #[must_use]
    pub fn has(&self, path: impl IntoPath) -> bool {
        get_in(&self.inner.state.borrow(), &path.into_path()).is_some()
    }

    /// Point-in-time snapshot of the whole tree.
    #[must_use]
    pub fn get_state(&self) -> Value {
        self.inner.state.borrow().clone()
    }

    pub(crate) fn read_raw(&self, path: &Path) -> Value {
        get_in(&self.inner.state.borrow(), path)
            .cloned()
            .unwrap_or_default()
    }

    // -------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------

    /// Write `value` at `path`.
    ///
    /// Returns `Ok(false)` when the update was a no-op.
    ///
    /// # Errors
    ///
    /// [`StoreError::PrototypePollution`], [`StoreError::CircularReference`],
    /// [`StoreError::ValidationFailed`] or [`StoreError::Middleware`]; the
    /// state is unchanged in every case.
    pub fn set(&self, path: impl IntoPath, value: impl Into<Value>) -> Result<bool, StoreError> {
        let path = path.into_path();
        let outcome = self.try_set(&path, value.into());
        self.report(outcome)
    }

    fn try_set(&self, path: &Path, value: Value) -> Result<bool, StoreError> {
        guard_path(path)?;
        let prev = self.read_raw(path);
        let next = self.apply_on_set(path, value, &prev)?;
        if next == prev {
            return Ok(false);
        }
        guard_value(path, &next)?;
        let candidate = set_in(&self.get_state(), path, next);
        self.validate(&candidate)?;
        self.commit(candidate, std::slice::from_ref(path), &format!("Set {path}"));
        Ok(true)
    }

    /// Apply several updates atomically.
    ///
    /// Updates are applied in order to a working copy, and the validator runs
    /// after each one. If any step fails, nothing is committed. Otherwise the
    /// working copy is installed once and subscribers are notified once.
    /// Returns `Ok(false)` when no update changed anything.
    ///
    /// # Errors
    ///
    /// Same as [`set`](Self::set).
    pub fn batch<I, P, V>(&self, updates: I) -> Result<bool, StoreError>
    where
        I: IntoIterator<Item = (P, V)>,
        P: IntoPath,
        V: Into<Value>,
    {
        let updates: Updates = updates
            .into_iter()
            .map(|(path, value)| (path.into_path(), value.into()))
            .collect();
        let outcome = self.try_batch(updates);
        self.report(outcome)
    }

    fn try_batch(&self, updates: Updates) -> Result<bool, StoreError> {
        let updates = self
            .middleware_snapshot()
            .iter()
            .try_fold(updates, |updates, mw| {
                mw.on_batch(updates).map_err(StoreError::Middleware)
            })?;

        let mut working = self.get_state();
        let mut changed = Vec::new();
        for (path, value) in updates {
            guard_path(&path)?;
            let prev = get_in(&working, &path).cloned().unwrap_or_default();
            let next = self.apply_on_set(&path, value, &prev)?;
            if next == prev {
                continue;
            }
            guard_value(&path, &next)?;
            working = set_in(&working, &path, next);
            self.validate(&working)?;
            changed.push(path);
        }

        if changed.is_empty() {
            return Ok(false);
        }
        self.commit(working, &changed, "Batch Update");
        Ok(true)
    }

    /// Delete the key or list element at `path`.
    ///
    /// Returns `Ok(false)` if nothing was there.
    ///
    /// # Errors
    ///
    /// [`StoreError::ValidationFailed`] if the state without the entry is rejected.
    pub fn remove(&self, path: impl IntoPath) -> Result<bool, StoreError> {
        let path = path.into_path();
        let outcome = self.try_remove(&path);
        self.report(outcome)
    }

    fn try_remove(&self, path: &Path) -> Result<bool, StoreError> {
        let current = self.get_state();
        if get_in(&current, path).is_none() {
            return Ok(false);
        }
        let candidate = delete_in(&current, path);
        if candidate == current {
            return Ok(false);
        }
        self.validate(&candidate)?;
        self.commit(candidate, std::slice::from_ref(path), &format!("Remove {path}"));
        Ok(true)
    }

    // -------------------------------------------------------------------
    // Subscribers and middleware
    // -------------------------------------------------------------------

    /// Call `f` after every commit.
    ///
    /// The callback stays registered while the returned guard is alive.
    pub fn subscribe(&self, f: impl Fn() + 'static) -> Subscription {
        let id = self.next_id();
        self.inner.subscribers.borrow_mut().push((id, Rc::new(f)));
        Subscription {
            store: Rc::downgrade(&self.inner),
            id,
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    /// Append `middleware` to the chain.
    pub fn use_middleware(&self, middleware: impl Middleware + 'static) -> MiddlewareHandle {
        let id = self.next_id();
        self.inner
            .middleware
            .borrow_mut()
            .push((id, Rc::new(middleware)));
        MiddlewareHandle {
            store: Rc::downgrade(&self.inner),
            id,
        }
    }

    #[must_use]
    pub fn middleware_count(&self) -> usize {
        self.inner.middleware.borrow().len()
    }

    fn next_id(&self) -> u64 {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        id
    }

    fn middleware_snapshot(&self) -> Vec<Rc<dyn Middleware>> {
        self.inner
            .middleware
            .borrow()
            .iter()
            .map(|(_, mw)| Rc::clone(mw))
            .collect()
    }

    fn apply_on_set(&self, path: &Path, value: Value, prev: &Value) -> Result<Value, StoreError> {
        self.middleware_snapshot()
            .iter()
            .try_fold(value, |next, mw| {
                mw.on_set(path, next, prev).map_err(StoreError::Middleware)
            })
    }

    fn report<T>(&self, outcome: Result<T, StoreError>) -> Result<T, StoreError> {
        if let Err(err) = &outcome {
            tracing::debug!(store = %self.inner.name, error = %err, "update rejected");
            for mw in self.middleware_snapshot() {
                mw.on_error(err);
            }
        }
        outcome
    }

    // -------------------------------------------------------------------
    // Commit pipeline
    // -------------------------------------------------------------------

    pub(crate) fn validate(&self, candidate: &Value) -> Result<(), StoreError> {
        check(self.inner.validator.as_ref(), candidate)
    }

    /// Install `next`, then notify, observe and persist.
    pub(crate) fn commit(&self, next: Value, changed: &[Path], label: &str) {
        let _span =
            tracing::debug_span!("store_commit", store = %self.inner.name, label).entered();

        let invalidated: usize = {
            let mut cache = self.inner.computed.borrow_mut();
            changed.iter().map(|path| cache.invalidate(path)).sum()
        };
        *self.inner.state.borrow_mut() = next;
        let version = self.inner.version.get() + 1;
        self.inner.version.set(version);
        tracing::debug!(version, invalidated, "committed");

        self.notify();
        self.observe(|observer, state| observer.on_commit(label, state));
        self.persist();
    }

    fn notify(&self) {
        let subscribers: Vec<Subscriber> = self
            .inner
            .subscribers
            .borrow()
            .iter()
            .map(|(_, f)| Rc::clone(f))
            .collect();
        for subscriber in subscribers {
            subscriber();
        }
    }

    pub(crate) fn observe(
        &self,
        event: impl FnOnce(&dyn StoreObserver, &Value) -> Result<(), ObserverError>,
    ) {
        let Some(observer) = &self.inner.observer else {
            return;
        };
        let state = self.get_state();
        if let Err(err) = event(observer.as_ref(), &state) {
            tracing::warn!(store = %self.inner.name, error = %err, "store observer failed");
        }
    }

    fn persist(&self) {
        let Some(persistence) = &self.inner.persistence else {
            return;
        };
        if let Err(err) = persistence.save(&self.get_state()) {
            tracing::error!(key = %persistence.key(), error = %err, "failed to persist state");
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.inner.name)
            .field("version", &self.inner.version.get())
            .field("subscribers", &self.inner.subscribers.borrow().len())
            .field("middleware", &self.inner.middleware.borrow().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// RAII guard for a subscriber registered with [`Store::subscribe`].
///
/// Dropping the guard unsubscribes. [`unsubscribe`](Self::unsubscribe) may be
/// called any number of times; only the first call has an effect.
#[must_use = "dropping this guard unsubscribes the callback"]
pub struct Subscription {
    store: Weak<Inner>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.store.upgrade() {
            // Dropping the callback may drop guards that touch this list.
            let removed = take_entry(&inner.subscribers, self.id);
            drop(removed);
        }
    }

    /// Keep the subscriber registered for the life of the store.
    pub fn detach(mut self) {
        self.store = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Remove the entry registered as `id`, returning it so the caller can drop
/// it after the borrow is released.
pub(crate) fn take_entry<T>(list: &RefCell<Vec<(u64, T)>>, id: u64) -> Option<T> {
    let mut entries = list.borrow_mut();
    let index = entries.iter().position(|(entry, _)| *entry == id)?;
    Some(entries.remove(index).1)
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

fn guard_path(path: &Path) -> Result<(), StoreError> {
    match path.reserved_segment() {
        Some(key) => Err(StoreError::PrototypePollution {
            key: key.to_owned(),
            path: path.clone(),
        }),
        None => Ok(()),
    }
}

/// Reject runaway nesting and reserved keys in a value about to be installed.
pub(crate) fn guard_value(path: &Path, value: &Value) -> Result<(), StoreError> {
    if value.exceeds_depth(MAX_DEPTH.saturating_sub(path.len())) {
        return Err(StoreError::CircularReference { path: path.clone() });
    }
    if let Some(key) = value.reserved_key() {
        return Err(StoreError::PrototypePollution {
            key: key.to_owned(),
            path: path.clone(),
        });
    }
    Ok(())
}

fn check(validator: Option<&Validator>, state: &Value) -> Result<(), StoreError> {
    let Some(validator) = validator else {
        return Ok(());
    };
    match validator(state) {
        Validation::Valid => Ok(()),
        Validation::Invalid => Err(StoreError::ValidationFailed(
            "state rejected by validator".to_owned(),
        )),
        Validation::Rejected(message) => Err(StoreError::ValidationFailed(message)),
    }
}

/// Load the persisted state, falling back to `initial` on any failure.
///
/// Returns the starting state and whether a migration ran.
fn restore(
    persistence: &Persistence,
    validator: Option<&Validator>,
    initial: Value,
) -> (Value, bool) {
    match persistence.load() {
        Ok(None) => (initial, false),
        Ok(Some(restored)) => match guard_value(&Path::root(), &restored.state)
            .and_then(|()| check(validator, &restored.state))
        {
            Ok(()) => {
                tracing::debug!(key = %persistence.key(), "restored persisted state");
                (restored.state, restored.migrated)
            }
            Err(err) => {
                tracing::error!(
                    key = %persistence.key(),
                    error = %err,
                    "persisted state failed validation; using initial state"
                );
                (initial, false)
            }
        },
        Err(err) => {
            tracing::error!(
                key = %persistence.key(),
                error = %err,
                "failed to restore persisted state; using initial state"
            );
            (initial, false)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
