//! Async actions bound to a store.
//!
//! An [`Action`] wraps an async function that receives the store and an
//! argument. The action itself adds nothing to the function's semantics; it
//! exists so dev tooling can see which actions ran.

use std::fmt;
use std::future::Future;

use crate::store::Store;

/// Label used by [`Store::action`].
pub const DEFAULT_ACTION_LABEL: &str = "Action";

/// An async function bound to a store, created by [`Store::action`].
pub struct Action<F> {
    store: Store,
    label: String,
    f: F,
}

impl<F> Action<F> {
    /// Run the action to completion.
    ///
    /// The function's result is returned as-is. A successful run is reported
    /// to the store's observer, if any.
    ///
    /// # Errors
    ///
    /// Whatever the wrapped function returns.
    pub async fn call<A, R, E, Fut>(&self, args: A) -> Result<R, E>
    where
        F: Fn(Store, A) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let outcome = (self.f)(self.store.clone(), args).await;
        match &outcome {
            Ok(_) => self
                .store
                .observe(|observer, _| observer.on_action(&self.label)),
            Err(_) => tracing::debug!(label = %self.label, "action failed"),
        }
        outcome
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl<F> fmt::Debug for Action<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("store", &self.store.name())
            .field("label", &self.label)
            .finish()
    }
}

impl Store {
    /// Bind an async function to this store.
    pub fn action<F>(&self, f: F) -> Action<F> {
        self.named_action(DEFAULT_ACTION_LABEL, f)
    }

    /// Like [`action`](Self::action), with a label for dev tooling.
    pub fn named_action<F>(&self, label: impl Into<String>, f: F) -> Action<F> {
        Action {
            store: self.clone(),
            label: label.into(),
            f,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreOptions;
    use crate::error::StoreError;
    use crate::observer::{ObservedEvent, RecordingObserver};
    use neutrix_core::Value;
    use serde_json::json;

    #[test]
    fn call_returns_the_function_result() {
        let store = Store::new(json!({"count": 1}));
        let increment = store.action(|store: Store, by: i64| async move {
            let current = store.get("count")?.as_i64().unwrap_or(0);
            store.set("count", current + by)?;
            Ok::<_, StoreError>(current + by)
        });
        assert_eq!(pollster::block_on(increment.call(4)).unwrap(), 5);
        assert_eq!(store.get("count").unwrap(), Value::from(5));
    }

    #[test]
    fn errors_propagate_unchanged() {
        let store = Store::new(json!({}));
        let fail = store.action(|_store: Store, reason: &'static str| async move {
            Err::<(), _>(reason.to_owned())
        });
        assert_eq!(pollster::block_on(fail.call("offline")).unwrap_err(), "offline");
    }

    #[test]
    fn successful_actions_are_observed() {
        let observer = RecordingObserver::new();
        let store = Store::with_options(
            json!({}),
            StoreOptions::new()
                .with_dev_tools(true)
                .with_observer(observer.clone()),
        );
        let ok = store.named_action("load", |_store: Store, (): ()| async { Ok::<_, ()>(()) });
        let bad = store.named_action("save", |_store: Store, (): ()| async { Err::<(), _>(()) });
        pollster::block_on(ok.call(())).unwrap();
        pollster::block_on(bad.call(())).unwrap_err();

        let actions: Vec<_> = observer
            .events()
            .into_iter()
            .filter_map(|event| match event {
                ObservedEvent::Action { label } => Some(label),
                _ => None,
            })
            .collect();
        assert_eq!(actions, vec!["load".to_owned()]);
    }
}
