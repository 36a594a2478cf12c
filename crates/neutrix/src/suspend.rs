//! Keyed async loading with a synchronous "not ready yet" signal.
//!
//! [`Store::suspend`] returns [`Suspense::Ready`] once the value for a key has
//! resolved, and [`Suspense::Pending`] with a [`SuspendHandle`] while it is
//! still loading. The host awaits the handle and asks again, the same
//! protocol a rendering layer uses to retry after a pending read.
//!
//! # Invariants
//!
//! 1. The factory for a key runs at most once while the key is pending or
//!    resolved; concurrent askers share one in-flight future.
//! 2. A resolved value is kept until [`Store::forget_suspended`] drops it.
//! 3. A future that was forgotten or replaced never writes its result back.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use crate::store::{Inner, Store};

type BoxedFuture = Pin<Box<dyn Future<Output = Rc<dyn Any>>>>;
type SharedFuture = Rc<RefCell<Option<BoxedFuture>>>;

#[derive(Clone)]
pub(crate) enum SuspendSlot {
    Pending(SharedFuture),
    Ready(Rc<dyn Any>),
}

/// Result of [`Store::suspend`].
#[derive(Debug)]
pub enum Suspense<T> {
    Ready(T),
    Pending(SuspendHandle),
}

impl<T> Suspense<T> {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Suspense::Ready(_))
    }

    /// The resolved value, if any.
    #[must_use]
    pub fn ready(self) -> Option<T> {
        match self {
            Suspense::Ready(value) => Some(value),
            Suspense::Pending(_) => None,
        }
    }
}

/// Future that drives a pending load and records its result in the store.
#[must_use = "a pending load only makes progress while its handle is polled"]
pub struct SuspendHandle {
    store: Weak<Inner>,
    key: String,
    future: SharedFuture,
}

impl SuspendHandle {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Future for SuspendHandle {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let mut slot = this.future.borrow_mut();
        // Another handle for the same key already finished the load.
        let Some(future) = slot.as_mut() else {
            return Poll::Ready(());
        };
        let Poll::Ready(value) = future.as_mut().poll(cx) else {
            return Poll::Pending;
        };
        *slot = None;
        drop(slot);

        if let Some(inner) = this.store.upgrade() {
            let mut suspended = inner.suspended.borrow_mut();
            let current = matches!(
                suspended.get(&this.key),
                Some(SuspendSlot::Pending(f)) if Rc::ptr_eq(f, &this.future)
            );
            if current {
                tracing::debug!(key = %this.key, "suspended load resolved");
                suspended.insert(this.key.clone(), SuspendSlot::Ready(value));
            }
        }
        Poll::Ready(())
    }
}

impl fmt::Debug for SuspendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspendHandle")
            .field("key", &self.key)
            .field("done", &self.future.borrow().is_none())
            .finish()
    }
}

impl Store {
    /// Read the value loaded under `key`, starting the load with `start` if
    /// nothing is pending or resolved for it yet.
    ///
    /// A resolved value of a different type than `T` counts as missing and
    /// restarts the load.
    pub fn suspend<T, Fut>(&self, key: impl Into<String>, start: impl FnOnce() -> Fut) -> Suspense<T>
    where
        T: Clone + 'static,
        Fut: Future<Output = T> + 'static,
    {
        let key = key.into();
        let existing = self.inner.suspended.borrow().get(&key).cloned();
        match existing {
            Some(SuspendSlot::Ready(value)) => {
                if let Some(value) = value.downcast_ref::<T>() {
                    return Suspense::Ready(value.clone());
                }
                tracing::debug!(key = %key, "suspended value has another type; reloading");
            }
            Some(SuspendSlot::Pending(future)) => {
                return Suspense::Pending(self.suspend_handle(key, future));
            }
            None => {}
        }

        let load = start();
        let boxed: BoxedFuture = Box::pin(async move { Rc::new(load.await) as Rc<dyn Any> });
        let future = Rc::new(RefCell::new(Some(boxed)));
        self.inner
            .suspended
            .borrow_mut()
            .insert(key.clone(), SuspendSlot::Pending(Rc::clone(&future)));
        Suspense::Pending(self.suspend_handle(key, future))
    }

    /// Drop the pending or resolved entry for `key`. Returns whether one existed.
    pub fn forget_suspended(&self, key: &str) -> bool {
        self.inner.suspended.borrow_mut().remove(key).is_some()
    }

    fn suspend_handle(&self, key: String, future: SharedFuture) -> SuspendHandle {
        SuspendHandle {
            store: Rc::downgrade(&self.inner),
            key,
            future,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    /// Pending on the first poll, ready on the second.
    struct YieldOnce(bool);

    impl Future for YieldOnce {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            if self.0 {
                Poll::Ready(())
            } else {
                self.0 = true;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }

    fn load_user(calls: &Rc<Cell<usize>>) -> impl FnOnce() -> Pin<Box<dyn Future<Output = String>>> {
        let calls = Rc::clone(calls);
        move || {
            calls.set(calls.get() + 1);
            Box::pin(async {
                YieldOnce(false).await;
                "ada".to_owned()
            })
        }
    }

    #[test]
    fn pending_then_ready() {
        let store = Store::new(json!({}));
        let calls = Rc::new(Cell::new(0));

        let Suspense::Pending(handle) = store.suspend::<String, _>("user", load_user(&calls)) else {
            panic!("first read should be pending");
        };
        assert_eq!(handle.key(), "user");
        pollster::block_on(handle);

        let value = store.suspend::<String, _>("user", load_user(&calls)).ready();
        assert_eq!(value.as_deref(), Some("ada"));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn concurrent_askers_share_one_load() {
        let store = Store::new(json!({}));
        let calls = Rc::new(Cell::new(0));
        let first = store.suspend::<String, _>("user", load_user(&calls));
        let second = store.suspend::<String, _>("user", load_user(&calls));
        assert_eq!(calls.get(), 1);

        let (Suspense::Pending(a), Suspense::Pending(b)) = (first, second) else {
            panic!("both reads should be pending");
        };
        pollster::block_on(b);
        pollster::block_on(a);
        assert!(store.suspend::<String, _>("user", load_user(&calls)).is_ready());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn forget_restarts_the_load() {
        let store = Store::new(json!({}));
        let calls = Rc::new(Cell::new(0));
        let Suspense::Pending(handle) = store.suspend::<String, _>("user", load_user(&calls)) else {
            panic!("expected pending");
        };
        assert!(store.forget_suspended("user"));
        assert!(!store.forget_suspended("user"));

        // The forgotten load finishes but does not write back.
        pollster::block_on(handle);
        assert!(!store.suspend::<String, _>("user", load_user(&calls)).is_ready());
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn type_mismatch_reloads() {
        let store = Store::new(json!({}));
        let Suspense::Pending(handle) = store.suspend::<u32, _>("n", || async { 7_u32 }) else {
            panic!("expected pending");
        };
        pollster::block_on(handle);
        assert_eq!(store.suspend::<u32, _>("n", || async { 0_u32 }).ready(), Some(7));
        assert!(!store.suspend::<String, _>("n", || async { String::new() }).is_ready());
    }
}
