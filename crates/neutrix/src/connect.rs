//! One-way reactions between stores.
//!
//! A [`StoreConnection`] watches a source store. After each commit on the
//! source, `when` is asked about the source, and if it answers `true`, `then`
//! runs against the target. Connections hold their stores weakly, so a
//! connection never keeps a dropped store alive.

use std::fmt;
use std::rc::Rc;

use crate::store::{Store, Subscription};

type Condition = Rc<dyn Fn(&Store) -> bool>;
type Reaction = Rc<dyn Fn(&Store)>;

/// A `when`/`then` rule from one store to another.
pub struct StoreConnection {
    source: Store,
    target: Store,
    when: Condition,
    then: Reaction,
    immediate: bool,
}

impl StoreConnection {
    pub fn new(
        source: &Store,
        target: &Store,
        when: impl Fn(&Store) -> bool + 'static,
        then: impl Fn(&Store) + 'static,
    ) -> Self {
        Self {
            source: source.clone(),
            target: target.clone(),
            when: Rc::new(when),
            then: Rc::new(then),
            immediate: false,
        }
    }

    /// Also evaluate the rule once when the connection is made.
    #[must_use]
    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }
}

impl fmt::Debug for StoreConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConnection")
            .field("source", &self.source.name())
            .field("target", &self.target.name())
            .field("immediate", &self.immediate)
            .finish()
    }
}

/// Live connections made by [`connect_stores`].
///
/// Dropping this disconnects everything it holds.
#[must_use = "dropping Connections disconnects every rule"]
#[derive(Debug, Default)]
pub struct Connections {
    subscriptions: Vec<Subscription>,
}

impl Connections {
    /// Tear down every connection. Safe to call more than once.
    pub fn disconnect(&mut self) {
        self.subscriptions.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

/// Wire up every connection.
pub fn connect_stores(connections: impl IntoIterator<Item = StoreConnection>) -> Connections {
    let subscriptions = connections.into_iter().map(wire).collect();
    Connections { subscriptions }
}

/// Wire up a single connection.
pub fn connect_store(connection: StoreConnection) -> Connections {
    connect_stores([connection])
}

fn wire(connection: StoreConnection) -> Subscription {
    let StoreConnection {
        source,
        target,
        when,
        then,
        immediate,
    } = connection;
    let (weak_source, weak_target) = (source.downgrade(), target.downgrade());
    let react = move || {
        let (Some(source), Some(target)) = (weak_source.upgrade(), weak_target.upgrade()) else {
            return;
        };
        if when(&source) {
            tracing::trace!(source = %source.name(), target = %target.name(), "store connection fired");
            then(&target);
        }
    };
    if immediate {
        react();
    }
    source.subscribe(react)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreOptions;
    use neutrix_core::Value;
    use serde_json::json;

    fn pair() -> (Store, Store) {
        let auth = Store::with_options(
            json!({"logged_in": false}),
            StoreOptions::new().with_name("auth"),
        );
        let cart = Store::with_options(
            json!({"items": [1, 2]}),
            StoreOptions::new().with_name("cart"),
        );
        (auth, cart)
    }

    fn clear_cart_on_logout(auth: &Store, cart: &Store) -> StoreConnection {
        StoreConnection::new(
            auth,
            cart,
            |auth| auth.get("logged_in").is_ok_and(|v| v.as_bool() == Some(false)),
            |cart| {
                let _ = cart.set("items", Value::list());
            },
        )
    }

    #[test]
    fn then_runs_when_condition_holds() {
        let (auth, cart) = pair();
        let _conn = connect_store(clear_cart_on_logout(&auth, &cart));

        // Not immediate: nothing happens until the source commits.
        assert_eq!(cart.get("items").unwrap(), Value::from(json!([1, 2])));

        auth.set("logged_in", true).unwrap();
        assert_eq!(cart.get("items").unwrap(), Value::from(json!([1, 2])));

        auth.set("logged_in", false).unwrap();
        assert_eq!(cart.get("items").unwrap(), Value::list());
    }

    #[test]
    fn immediate_evaluates_on_connect() {
        let (auth, cart) = pair();
        let _conn = connect_store(clear_cart_on_logout(&auth, &cart).immediate(true));
        assert_eq!(cart.get("items").unwrap(), Value::list());
    }

    #[test]
    fn disconnect_is_idempotent() {
        let (auth, cart) = pair();
        let mut conns = connect_stores([
            clear_cart_on_logout(&auth, &cart),
            StoreConnection::new(&cart, &auth, |_| false, |_| {}),
        ]);
        assert_eq!(conns.len(), 2);
        assert_eq!(auth.subscriber_count(), 1);

        conns.disconnect();
        conns.disconnect();
        assert!(conns.is_empty());
        assert_eq!(auth.subscriber_count(), 0);
        assert_eq!(cart.subscriber_count(), 0);

        auth.set("logged_in", true).unwrap();
        auth.set("logged_in", false).unwrap();
        assert_eq!(cart.get("items").unwrap(), Value::from(json!([1, 2])));
    }

    #[test]
    fn dropped_target_is_skipped() {
        let (auth, cart) = pair();
        let _conn = connect_store(clear_cart_on_logout(&auth, &cart));
        drop(cart);
        auth.set("logged_in", true).unwrap();
        auth.set("logged_in", false).unwrap();
    }
}
