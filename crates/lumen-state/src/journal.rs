use std::collections::HashMap;
use std::hash::Hash;

use crate::error::StateError;

/// Append-only write log with checkpoints.
///
/// Reads walk the per-key index newest-first; a miss means the caller falls
/// back to its base view. Reverting truncates the log, so no copy of the
/// state is ever taken.
#[derive(Debug, Clone)]
pub struct Journal<K, V> {
    entries: Vec<(K, V)>,
    index: HashMap<K, Vec<usize>>,
    checkpoints: Vec<usize>,
}

impl<K, V> Default for Journal<K, V> {
    fn default() -> Self {
        Self { entries: Vec::new(), index: HashMap::new(), checkpoints: Vec::new() }
    }
}

impl<K: Clone + Eq + Hash, V> Journal<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: K, value: V) {
        let pos = self.entries.len();
        self.index.entry(key.clone()).or_default().push(pos);
        self.entries.push((key, value));
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let pos = *self.index.get(key)?.last()?;
        Some(&self.entries[pos].1)
    }

    /// Records the current position and returns its revision. Revisions grow
    /// by one per call until a revert rewinds them.
    pub fn new_checkpoint(&mut self) -> usize {
        self.checkpoints.push(self.entries.len());
        self.checkpoints.len() - 1
    }

    /// Drops every write made after `revision` was taken. The checkpoint
    /// itself survives, so reverting to it again is a no-op.
    pub fn revert_to(&mut self, revision: usize) -> Result<(), StateError> {
        let mark = *self
            .checkpoints
            .get(revision)
            .ok_or(StateError::InvalidRevision(revision))?;
        while self.entries.len() > mark {
            if let Some((key, _)) = self.entries.pop() {
                if let Some(positions) = self.index.get_mut(&key) {
                    positions.pop();
                    if positions.is_empty() {
                        self.index.remove(&key);
                    }
                }
            }
        }
        self.checkpoints.truncate(revision + 1);
        Ok(())
    }

    /// Latest value of every key written so far, in no particular order.
    pub fn latest(&self) -> impl Iterator<Item = (&K, &V)> {
        self.index.iter().filter_map(move |(key, positions)| {
            positions.last().map(|&pos| (key, &self.entries[pos].1))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
