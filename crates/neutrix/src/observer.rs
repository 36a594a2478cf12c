//! Inspector bridge for external developer tooling.
//!
//! A [`StoreObserver`] is injected at construction through
//! [`StoreOptions::with_observer`](crate::StoreOptions::with_observer) and is
//! only consulted when `dev_tools` is enabled. Its lifecycle is that of the
//! store instance; there is no global hook.
//!
//! Observer failures never reach the commit pipeline: the store logs them at
//! `warn` level and carries on.

use std::cell::RefCell;
use std::rc::Rc;

use neutrix_core::Value;

use crate::error::ObserverError;

/// Receives store lifecycle events for inspection.
pub trait StoreObserver {
    /// Called once after construction with the initial (possibly restored) state.
    fn on_init(&self, name: &str, state: &Value) -> Result<(), ObserverError> {
        let _ = (name, state);
        Ok(())
    }

    /// Called after every commit with a label such as `"Set count"` or
    /// `"Batch Update"`.
    fn on_commit(&self, label: &str, state: &Value) -> Result<(), ObserverError>;

    /// Called after an action future resolves successfully.
    fn on_action(&self, label: &str) -> Result<(), ObserverError> {
        let _ = label;
        Ok(())
    }
}

/// An event captured by [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq)]
pub enum ObservedEvent {
    Init { name: String, state: Value },
    Commit { label: String, state: Value },
    Action { label: String },
}

/// Observer that appends every event to a shared log.
///
/// Clones share the same log, so a test can keep one handle and pass another
/// to the store.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    events: Rc<RefCell<Vec<ObservedEvent>>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.borrow().clone()
    }

    /// Labels of recorded commits, in order.
    #[must_use]
    pub fn commit_labels(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                ObservedEvent::Commit { label, .. } => Some(label.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl StoreObserver for RecordingObserver {
    fn on_init(&self, name: &str, state: &Value) -> Result<(), ObserverError> {
        self.events.borrow_mut().push(ObservedEvent::Init {
            name: name.to_owned(),
            state: state.clone(),
        });
        Ok(())
    }

    fn on_commit(&self, label: &str, state: &Value) -> Result<(), ObserverError> {
        self.events.borrow_mut().push(ObservedEvent::Commit {
            label: label.to_owned(),
            state: state.clone(),
        });
        Ok(())
    }

    fn on_action(&self, label: &str) -> Result<(), ObserverError> {
        self.events.borrow_mut().push(ObservedEvent::Action {
            label: label.to_owned(),
        });
        Ok(())
    }
}
