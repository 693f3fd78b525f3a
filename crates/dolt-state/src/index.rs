//! Ordered active-lane index.
//!
//! Keeps the active entries of one `(session_id, level)` lane sorted by
//! `(last_event_ts_ms, pointer)` so the oldest entry is found without a scan.

use std::collections::{BTreeMap, HashMap};

use crate::storage_traits::{ActiveRecord, Pointer};

/// One entry held by a [`LaneIndex`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedEntry {
    pub pointer: Pointer,
    pub last_event_ts_ms: i64,
    pub token_count: u64,
}

/// Recency-ordered view over a single lane.
pub trait LaneIndex: Send {
    /// Insert or move an entry. Re-inserting a pointer replaces its position.
    fn insert(&mut self, pointer: Pointer, last_event_ts_ms: i64, token_count: u64);

    fn remove(&mut self, pointer: &Pointer) -> Option<IndexedEntry>;

    /// Minimum by `(last_event_ts_ms, pointer)`.
    fn oldest(&self) -> Option<IndexedEntry>;

    /// Maximum by `(last_event_ts_ms, pointer)`.
    fn newest(&self) -> Option<IndexedEntry>;

    fn pop_oldest(&mut self) -> Option<IndexedEntry> {
        let oldest = self.oldest()?;
        self.remove(&oldest.pointer)
    }

    fn total_tokens(&self) -> u64;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries_oldest_first(&self) -> Vec<IndexedEntry>;
}

/// [`LaneIndex`] backed by a `BTreeMap` keyed on `(last_event_ts_ms, pointer)`.
#[derive(Debug, Default, Clone)]
pub struct OrderedLaneIndex {
    order: BTreeMap<(i64, Pointer), u64>,
    positions: HashMap<Pointer, i64>,
    total_tokens: u64,
}

impl OrderedLaneIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from the active entries of a lane; inactive ones are skipped.
    pub fn from_active(records: &[ActiveRecord]) -> Self {
        let mut index = Self::new();
        for active in records.iter().filter(|a| a.lane.is_active) {
            index.insert(
                active.record.pointer.clone(),
                active.lane.last_event_ts_ms,
                active.record.token_count,
            );
        }
        index
    }

    fn entry(key: &(i64, Pointer), tokens: u64) -> IndexedEntry {
        IndexedEntry {
            pointer: key.1.clone(),
            last_event_ts_ms: key.0,
            token_count: tokens,
        }
    }
}

impl LaneIndex for OrderedLaneIndex {
    fn insert(&mut self, pointer: Pointer, last_event_ts_ms: i64, token_count: u64) {
        self.remove(&pointer);
        self.positions.insert(pointer.clone(), last_event_ts_ms);
        self.order.insert((last_event_ts_ms, pointer), token_count);
        self.total_tokens = self.total_tokens.saturating_add(token_count);
    }

    fn remove(&mut self, pointer: &Pointer) -> Option<IndexedEntry> {
        let ts = self.positions.remove(pointer)?;
        let key = (ts, pointer.clone());
        let tokens = self.order.remove(&key)?;
        self.total_tokens = self.total_tokens.saturating_sub(tokens);
        Some(Self::entry(&key, tokens))
    }

    fn oldest(&self) -> Option<IndexedEntry> {
        self.order
            .first_key_value()
            .map(|(key, tokens)| Self::entry(key, *tokens))
    }

    fn newest(&self) -> Option<IndexedEntry> {
        self.order
            .last_key_value()
            .map(|(key, tokens)| Self::entry(key, *tokens))
    }

    fn pop_oldest(&mut self) -> Option<IndexedEntry> {
        let (key, tokens) = self.order.pop_first()?;
        self.positions.remove(&key.1);
        self.total_tokens = self.total_tokens.saturating_sub(tokens);
        Some(Self::entry(&key, tokens))
    }

    fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn entries_oldest_first(&self) -> Vec<IndexedEntry> {
        self.order
            .iter()
            .map(|(key, tokens)| Self::entry(key, *tokens))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ptr(s: &str) -> Pointer {
        Pointer::from(s)
    }

    #[test]
    fn oldest_uses_recency_then_pointer() {
        let mut idx = OrderedLaneIndex::new();
        idx.insert(ptr("b"), 100, 5);
        idx.insert(ptr("a"), 100, 7);
        idx.insert(ptr("c"), 50, 1);

        assert_eq!(idx.oldest().unwrap().pointer, ptr("c"));
        idx.pop_oldest();
        assert_eq!(idx.oldest().unwrap().pointer, ptr("a"));
        assert_eq!(idx.newest().unwrap().pointer, ptr("b"));
    }

    #[test]
    fn total_tracks_inserts_and_removals() {
        let mut idx = OrderedLaneIndex::new();
        idx.insert(ptr("a"), 1, 10);
        idx.insert(ptr("b"), 2, 20);
        assert_eq!(idx.total_tokens(), 30);

        idx.remove(&ptr("a"));
        assert_eq!(idx.total_tokens(), 20);
        assert_eq!(idx.len(), 1);
        assert!(idx.remove(&ptr("missing")).is_none());
    }

    #[test]
    fn reinsert_moves_entry() {
        let mut idx = OrderedLaneIndex::new();
        idx.insert(ptr("a"), 1, 10);
        idx.insert(ptr("b"), 2, 10);
        idx.insert(ptr("a"), 3, 12);

        assert_eq!(idx.len(), 2);
        assert_eq!(idx.total_tokens(), 22);
        let order: Vec<_> = idx
            .entries_oldest_first()
            .into_iter()
            .map(|e| e.pointer)
            .collect();
        assert_eq!(order, vec![ptr("b"), ptr("a")]);
    }

    #[test]
    fn pop_on_empty_is_none() {
        let mut idx = OrderedLaneIndex::new();
        assert!(idx.is_empty());
        assert!(idx.pop_oldest().is_none());
        assert_eq!(idx.total_tokens(), 0);
    }
}
