//! Optimistic pixel writes and their rollback state.
//!
//! Every local paint is applied to the raster immediately and recorded
//! here until the authority confirms or rejects it. The recorded color
//! is always the one from before the *first* unconfirmed write of a
//! coordinate: painting the same pixel again before the verdict arrives
//! sends again but never overwrites the rollback color, so one reject
//! restores exactly the state the authority last confirmed.

use std::collections::{HashMap, hash_map::Entry};

use crate::{ChunkKey, ChunkStore, ColorIndex, PlaceResult, Position};

/// What happened to a local paint request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceOutcome {
    /// The raster changed and a request must go to the authority.
    Sent,
    /// The pixel already had this color; nothing to send.
    Unchanged,
    /// The target tile is not loaded; nothing to send.
    Unloaded,
}

#[derive(Debug, Default)]
pub struct MutationTracker {
    /// Coordinate → color held before the first unconfirmed write.
    pending: HashMap<Position, ColorIndex>,
    /// Chunks holding at least one pending write, with counts. These are
    /// pinned against cache eviction.
    pinned: HashMap<ChunkKey, usize>,
}

impl MutationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a local paint to the raster. On a real change the prior
    /// color is recorded for rollback (first write only) and the caller
    /// must send a place-pixel request.
    pub fn place_local(&mut self, store: &mut ChunkStore, pos: impl Into<Position>, color: ColorIndex) -> PlaceOutcome {
        let pos = pos.into();
        match store.place_pixel(pos, color) {
            PlaceResult::Changed { previous } => {
                if let Entry::Vacant(entry) = self.pending.entry(pos) {
                    entry.insert(previous);
                    *self.pinned.entry(pos.chunk()).or_insert(0) += 1;
                }
                PlaceOutcome::Sent
            }
            PlaceResult::Unchanged => PlaceOutcome::Unchanged,
            PlaceResult::Unloaded => PlaceOutcome::Unloaded,
        }
    }

    /// The authority accepted the write; the optimistic color stands.
    /// Returns whether the coordinate was actually pending.
    pub fn on_confirm(&mut self, pos: impl Into<Position>) -> bool {
        let pos = pos.into();
        if self.pending.remove(&pos).is_some() {
            self.unpin(pos.chunk());
            true
        } else {
            false
        }
    }

    /// The authority rejected the write; restores the pre-mutation color
    /// and returns it, or `None` if nothing was pending.
    pub fn on_reject(&mut self, store: &mut ChunkStore, pos: impl Into<Position>) -> Option<ColorIndex> {
        let pos = pos.into();
        let previous = self.pending.remove(&pos)?;
        self.unpin(pos.chunk());
        store.place_pixel(pos, previous);
        Some(previous)
    }

    fn unpin(&mut self, key: ChunkKey) {
        if let Some(count) = self.pinned.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                self.pinned.remove(&key);
            }
        }
    }

    pub fn is_pending(&self, pos: impl Into<Position>) -> bool {
        self.pending.contains_key(&pos.into())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Chunks that must not be evicted while a verdict is outstanding.
    pub fn pinned_chunks(&self) -> &HashMap<ChunkKey, usize> {
        &self.pinned
    }

    /// Abandons all pending state, e.g. when switching canvases.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.pinned.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Chunk;

    fn store_with_chunk(fill: ColorIndex) -> ChunkStore {
        let mut store = ChunkStore::new();
        store.insert_chunk((0, 0), Chunk::filled(fill));
        store
    }

    #[test]
    fn reject_restores_pre_mutation_color() {
        let mut store = store_with_chunk(1);
        let mut tracker = MutationTracker::new();

        assert_eq!(tracker.place_local(&mut store, (5, 5), 3), PlaceOutcome::Sent);
        assert_eq!(store.get_color_at((5, 5)), Some(3));

        assert_eq!(tracker.on_reject(&mut store, (5, 5)), Some(1));
        assert_eq!(store.get_color_at((5, 5)), Some(1));
        assert!(!tracker.is_pending((5, 5)));
    }

    #[test]
    fn confirm_clears_pending_and_keeps_color() {
        let mut store = store_with_chunk(1);
        let mut tracker = MutationTracker::new();

        tracker.place_local(&mut store, (7, 7), 2);
        assert!(tracker.on_confirm((7, 7)));
        assert!(!tracker.is_pending((7, 7)));
        assert_eq!(store.get_color_at((7, 7)), Some(2));
        // A stray confirmation is a no-op.
        assert!(!tracker.on_confirm((7, 7)));
    }

    #[test]
    fn repaint_before_confirm_keeps_first_rollback_color() {
        let mut store = store_with_chunk(1);
        let mut tracker = MutationTracker::new();

        assert_eq!(tracker.place_local(&mut store, (5, 5), 2), PlaceOutcome::Sent);
        assert_eq!(tracker.place_local(&mut store, (5, 5), 3), PlaceOutcome::Sent);

        // The rollback color is from before the first write of the burst.
        assert_eq!(tracker.on_reject(&mut store, (5, 5)), Some(1));
        assert_eq!(store.get_color_at((5, 5)), Some(1));
    }

    #[test]
    fn unchanged_or_unloaded_writes_send_nothing() {
        let mut store = store_with_chunk(1);
        let mut tracker = MutationTracker::new();

        assert_eq!(tracker.place_local(&mut store, (5, 5), 1), PlaceOutcome::Unchanged);
        assert_eq!(tracker.place_local(&mut store, (999, 5), 2), PlaceOutcome::Unloaded);
        assert_eq!(tracker.pending_len(), 0);
        assert!(tracker.pinned_chunks().is_empty());
    }

    #[test]
    fn pins_track_pending_writes_per_chunk() {
        let mut store = store_with_chunk(1);
        store.insert_chunk((1, 0), Chunk::filled(1));
        let mut tracker = MutationTracker::new();

        tracker.place_local(&mut store, (5, 5), 2);
        tracker.place_local(&mut store, (6, 5), 2);
        tracker.place_local(&mut store, (300, 5), 2);

        assert_eq!(tracker.pinned_chunks().get(&(0, 0)), Some(&2));
        assert_eq!(tracker.pinned_chunks().get(&(1, 0)), Some(&1));

        tracker.on_confirm((5, 5));
        assert_eq!(tracker.pinned_chunks().get(&(0, 0)), Some(&1));
        tracker.on_confirm((6, 5));
        assert!(!tracker.pinned_chunks().contains_key(&(0, 0)));
    }
}
