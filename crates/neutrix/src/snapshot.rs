//! Server-rendered snapshots.
//!
//! [`Store::server_snapshot`] serializes the whole tree to JSON on the
//! rendering side; [`Store::rehydrate`] merges such a snapshot into a client
//! store. Top-level keys from the snapshot replace the store's keys of the
//! same name and every other key is kept.
//!
//! Rehydration is best-effort: a snapshot that fails to parse or validate is
//! logged and ignored, so a bad payload never takes the client down.

use im::OrdMap;
use neutrix_core::{Path, Value};

use crate::error::StoreError;
use crate::store::{Store, guard_value};

/// Commit label used for rehydration.
pub const REHYDRATE_LABEL: &str = "Rehydrate";

impl Store {
    /// Serialize the current state to a JSON document.
    ///
    /// # Errors
    ///
    /// [`StoreError::Serialize`] if encoding fails.
    pub fn server_snapshot(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string(&self.get_state())?)
    }

    /// Shallow-merge a snapshot produced by [`server_snapshot`](Self::server_snapshot).
    ///
    /// Returns whether the state changed. Malformed or rejected snapshots are
    /// logged at `error` level and leave the state untouched.
    pub fn rehydrate(&self, snapshot: &str) -> bool {
        let parsed: serde_json::Value = match serde_json::from_str(snapshot) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::error!(store = %self.name(), error = %err, "failed to parse server snapshot");
                return false;
            }
        };
        let Value::Map(incoming) = Value::from(parsed) else {
            tracing::error!(store = %self.name(), "server snapshot is not an object");
            return false;
        };
        match self.merge_snapshot(incoming) {
            Ok(changed) => changed,
            Err(err) => {
                tracing::error!(store = %self.name(), error = %err, "rejected server snapshot");
                false
            }
        }
    }

    fn merge_snapshot(&self, incoming: OrdMap<String, Value>) -> Result<bool, StoreError> {
        let current = self.get_state();
        let merged = match &current {
            Value::Map(existing) => Value::Map(incoming.union(existing.clone())),
            _ => Value::Map(incoming),
        };
        if merged == current {
            return Ok(false);
        }
        guard_value(&Path::root(), &merged)?;
        self.validate(&merged)?;
        self.commit(merged, &[Path::root()], REHYDRATE_LABEL);
        Ok(true)
    }
}
