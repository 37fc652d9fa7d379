//! User-arranged merge order: positions referencing cut results by index.
//!
//! Indices may repeat. Once the order holds anything it never drops back to
//! empty through `remove_at`; out-of-range positions are ignored.

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MergeOrder {
    entries: Vec<usize>,
}

impl MergeOrder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.iter().copied()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.entries.contains(&index)
    }

    /// Add `index` at the end unless it is already present.
    pub fn append(&mut self, index: usize) {
        if !self.contains(index) {
            self.entries.push(index);
        }
    }

    /// Append every result index in `0..result_count` not yet in the order.
    pub fn append_missing(&mut self, result_count: usize) {
        for index in 0..result_count {
            self.append(index);
        }
    }

    /// Insert a copy of the entry at `pos` right after it.
    pub fn duplicate_at(&mut self, pos: usize) {
        if let Some(&index) = self.entries.get(pos) {
            self.entries.insert(pos + 1, index);
        }
    }

    /// Remove the entry at `pos`. Removing the last remaining entry is refused.
    pub fn remove_at(&mut self, pos: usize) {
        if self.entries.len() <= 1 || pos >= self.entries.len() {
            return;
        }
        self.entries.remove(pos);
    }

    /// Move the entry at `from` so it lands before the entry currently at `to`.
    /// `to == len()` moves it to the end.
    pub fn move_to(&mut self, from: usize, to: usize) {
        let len = self.entries.len();
        if from >= len || to > len || from == to {
            return;
        }
        let moved = self.entries.remove(from);
        let target = if from < to { to - 1 } else { to };
        self.entries.insert(target, moved);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl From<Vec<usize>> for MergeOrder {
    fn from(entries: Vec<usize>) -> Self {
        Self { entries }
    }
}
