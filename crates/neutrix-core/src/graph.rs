//! Dependency graph from state paths to the computed values that read them.
//!
//! Every computed evaluation records one edge per path it reads. When a path
//! changes, [`DependencyGraph::invalidate`] returns every id with an edge to a
//! *related* path (the same path, an ancestor, or a descendant) and drops all
//! edges of those ids; they are re-registered lazily on the next evaluation.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::path::Path;

/// Bidirectional path ↔ id index.
#[derive(Debug, Clone)]
pub struct DependencyGraph<I> {
    by_path: HashMap<Path, HashSet<I>>,
    by_id: HashMap<I, HashSet<Path>>,
}

impl<I: Clone + Eq + Hash> DependencyGraph<I> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_path: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    /// Record that `id` read `path` during its last evaluation.
    pub fn record(&mut self, path: Path, id: I) {
        self.by_id
            .entry(id.clone())
            .or_default()
            .insert(path.clone());
        self.by_path.entry(path).or_default().insert(id);
    }

    /// Remove and return every id whose recorded reads are affected by a
    /// change at `changed`. All edges of the returned ids are dropped.
    pub fn invalidate(&mut self, changed: &Path) -> Vec<I> {
        let hit: Vec<Path> = self
            .by_path
            .keys()
            .filter(|path| path.related_to(changed))
            .cloned()
            .collect();

        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for path in hit {
            for id in self.by_path.remove(&path).into_iter().flatten() {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
        }
        for id in &ids {
            self.forget(id);
        }
        ids
    }

    /// Drop every edge recorded for `id`.
    pub fn forget(&mut self, id: &I) {
        let Some(paths) = self.by_id.remove(id) else {
            return;
        };
        for path in paths {
            if let Some(ids) = self.by_path.get_mut(&path) {
                ids.remove(id);
                if ids.is_empty() {
                    self.by_path.remove(&path);
                }
            }
        }
    }

    /// Paths `id` read during its last evaluation.
    #[must_use]
    pub fn dependencies_of(&self, id: &I) -> Vec<Path> {
        let mut paths: Vec<Path> = self
            .by_id
            .get(id)
            .map(|paths| paths.iter().cloned().collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }

    /// Ids with an edge recorded against exactly `path`.
    #[must_use]
    pub fn dependents_of(&self, path: &Path) -> Vec<I> {
        self.by_path
            .get(path)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of distinct paths with at least one dependent.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_path.clear();
        self.by_id.clear();
    }
}

impl<I: Clone + Eq + Hash> Default for DependencyGraph<I> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
