//! The tile cache: base chunks, the LOD pyramid and history tiles.
//!
//! The store never talks to the network itself; a fetch service hands it
//! decoded rasters. It owns all cached tiles, bounds their total count
//! with least-recently-touched eviction, and guarantees that a chunk
//! holding an unconfirmed local write is never evicted.

use std::collections::HashMap;

use crate::{CHUNK_SIZE, CanvasDescriptor, Chunk, ChunkKey, ColorIndex, Position, Superchunk, SuperchunkKey, Viewport};

/// Default bound on cached tiles across all three maps.
pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// Outcome of a direct pixel write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceResult {
    /// The raster changed; `previous` is the color that was overwritten.
    Changed { previous: ColorIndex },
    /// The pixel already had this color, nothing was written.
    Unchanged,
    /// The owning chunk is not cached, nothing was written.
    Unloaded,
}

#[derive(Debug, Clone)]
struct Stamped<T> {
    value: T,
    touched: u64,
}

#[derive(Debug)]
pub struct ChunkStore {
    chunks: HashMap<ChunkKey, Stamped<Chunk>>,
    superchunks: HashMap<SuperchunkKey, Stamped<Superchunk>>,
    history_chunks: HashMap<ChunkKey, Stamped<Chunk>>,
    capacity: usize,
    clock: u64,
}

impl Default for ChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ChunkStore {
            chunks: HashMap::new(),
            superchunks: HashMap::new(),
            history_chunks: HashMap::new(),
            capacity: capacity.max(1),
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    // === base chunks ===

    pub fn contains(&self, key: ChunkKey) -> bool {
        self.chunks.contains_key(&key)
    }

    pub fn insert_chunk(&mut self, key: ChunkKey, chunk: Chunk) {
        let touched = self.tick();
        self.chunks.insert(key, Stamped { value: chunk, touched });
    }

    pub fn get_chunk(&self, key: ChunkKey) -> Option<&Chunk> {
        self.chunks.get(&key).map(|s| &s.value)
    }

    /// Drops one chunk so the next viewport refresh reloads it.
    pub fn evict_chunk(&mut self, key: ChunkKey) {
        self.chunks.remove(&key);
    }

    /// Refreshes the recency stamp of every listed chunk. Called once per
    /// viewport refresh with the visible set, which makes eviction prefer
    /// tiles far from the current view.
    pub fn touch_all(&mut self, keys: &[ChunkKey]) {
        let touched = self.tick();
        for key in keys {
            if let Some(entry) = self.chunks.get_mut(key) {
                entry.touched = touched;
            }
        }
    }

    /// Reads the color of a logical pixel, or `None` while the owning
    /// tile is not loaded.
    pub fn get_color_at(&self, pos: impl Into<Position>) -> Option<ColorIndex> {
        let pos = pos.into();
        let (ox, oy) = pos.in_chunk_offset();
        self.chunks.get(&pos.chunk()).and_then(|s| s.value.get_pixel(ox, oy))
    }

    /// Writes a pixel and reports what happened; callers use the previous
    /// color to build rollback state.
    pub fn place_pixel(&mut self, pos: impl Into<Position>, color: ColorIndex) -> PlaceResult {
        let pos = pos.into();
        let touched = self.tick();
        let Some(entry) = self.chunks.get_mut(&pos.chunk()) else {
            return PlaceResult::Unloaded;
        };
        let (ox, oy) = pos.in_chunk_offset();
        match entry.value.get_pixel(ox, oy) {
            Some(previous) if previous == color => PlaceResult::Unchanged,
            Some(previous) => {
                entry.value.set_pixel(ox, oy, color);
                entry.touched = touched;
                PlaceResult::Changed { previous }
            }
            None => PlaceResult::Unloaded,
        }
    }

    // === history tiles ===

    pub fn contains_history(&self, key: ChunkKey) -> bool {
        self.history_chunks.contains_key(&key)
    }

    pub fn insert_history_chunk(&mut self, key: ChunkKey, chunk: Chunk) {
        let touched = self.tick();
        self.history_chunks.insert(key, Stamped { value: chunk, touched });
    }

    pub fn get_history_color_at(&self, pos: impl Into<Position>) -> Option<ColorIndex> {
        let pos = pos.into();
        let (ox, oy) = pos.in_chunk_offset();
        self.history_chunks.get(&pos.chunk()).and_then(|s| s.value.get_pixel(ox, oy))
    }

    /// Dropped wholesale when leaving history mode.
    pub fn clear_history(&mut self) {
        self.history_chunks.clear();
    }

    // === LOD pyramid ===

    pub fn contains_superchunk(&self, key: SuperchunkKey) -> bool {
        self.superchunks.contains_key(&key)
    }

    pub fn insert_superchunk(&mut self, key: SuperchunkKey, tile: Superchunk) {
        let touched = self.tick();
        self.superchunks.insert(key, Stamped { value: tile, touched });
    }

    pub fn get_superchunk(&self, key: SuperchunkKey) -> Option<&Superchunk> {
        self.superchunks.get(&key).map(|s| &s.value)
    }

    /// Drops only the base chunks, e.g. when the fetch URL variant
    /// changes and cached rasters no longer match.
    pub fn clear_base(&mut self) {
        self.chunks.clear();
    }

    /// Everything goes; used when switching canvases.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.superchunks.clear();
        self.history_chunks.clear();
    }

    pub fn len(&self) -> usize {
        self.chunks.len() + self.superchunks.len() + self.history_chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evicts least-recently-touched tiles until the cache fits its
    /// capacity again. Base chunks listed in `pinned` (chunks with
    /// pending local writes) are never evicted, even if that temporarily
    /// leaves the cache above capacity.
    pub fn enforce_capacity(&mut self, pinned: &HashMap<ChunkKey, usize>) {
        while self.len() > self.capacity {
            let oldest_chunk = self
                .chunks
                .iter()
                .filter(|(key, _)| !pinned.contains_key(*key))
                .min_by_key(|(_, s)| s.touched)
                .map(|(key, s)| (*key, s.touched));
            let oldest_super = self.superchunks.iter().min_by_key(|(_, s)| s.touched).map(|(key, s)| (*key, s.touched));
            let oldest_history = self.history_chunks.iter().min_by_key(|(_, s)| s.touched).map(|(key, s)| (*key, s.touched));

            let chunk_age = oldest_chunk.map_or(u64::MAX, |(_, t)| t);
            let super_age = oldest_super.map_or(u64::MAX, |(_, t)| t);
            let history_age = oldest_history.map_or(u64::MAX, |(_, t)| t);

            if chunk_age <= super_age && chunk_age <= history_age {
                if let Some((key, _)) = oldest_chunk {
                    log::debug!("evicting chunk ({},{})", key.0, key.1);
                    self.chunks.remove(&key);
                    continue;
                }
            } else if super_age <= history_age {
                if let Some((key, _)) = oldest_super {
                    self.superchunks.remove(&key);
                    continue;
                }
            } else if let Some((key, _)) = oldest_history {
                self.history_chunks.remove(&key);
                continue;
            }
            // Everything left is pinned.
            break;
        }
    }
}

// === visibility computation ===

/// Base chunks whose screen footprint overlaps the viewport plus one
/// tile of margin, clipped to the canvas bounding box and ordered by
/// distance from the viewport center (nearest first).
pub fn visible_chunks(viewport: &Viewport, canvas: &CanvasDescriptor) -> Vec<ChunkKey> {
    let (min_x, min_y, max_x, max_y) = viewport.visible_rect();
    let from = Position::from((min_x, min_y)).chunk();
    let to = Position::from((max_x, max_y)).chunk();

    let mut keys = Vec::new();
    for cy in (from.1 - 1)..=(to.1 + 1) {
        for cx in (from.0 - 1)..=(to.0 + 1) {
            if canvas.chunk_in_bounds(cx, cy) {
                keys.push((cx, cy));
            }
        }
    }
    sort_by_center_distance(&mut keys, viewport);
    keys
}

/// LOD levels worth loading and drawing at the given pixel size.
/// The finest declared level is always eligible; each coarser level `i`
/// drops out once the pixel size falls to `0.25^(i + 2)` or below.
pub fn eligible_lod_levels(pixel_size: f64, canvas: &CanvasDescriptor) -> Vec<usize> {
    let levels = canvas.lod_levels();
    (0..levels)
        .filter(|&level| level + 1 == levels || pixel_size > 0.25_f64.powi(level as i32 + 2))
        .collect()
}

/// LOD tiles of one level overlapping the visible logical rectangle.
/// Level grids are anchored at the canvas corner, not the origin.
pub fn visible_superchunks(viewport: &Viewport, canvas: &CanvasDescriptor, level: usize) -> Vec<SuperchunkKey> {
    let Ok(span) = canvas.lod_tile_span(level) else {
        return Vec::new();
    };
    let count = canvas.tile_counts[level] as i32;
    if count <= 0 || span <= 0 {
        return Vec::new();
    }
    let half = canvas.size / 2;
    let (min_x, min_y, max_x, max_y) = viewport.visible_rect();

    let clamp_tile = |v: f64| -> i32 { (((v + half as f64) / span as f64).floor() as i32).clamp(0, count - 1) };
    let (from_x, to_x) = (clamp_tile(min_x), clamp_tile(max_x));
    let (from_y, to_y) = (clamp_tile(min_y), clamp_tile(max_y));

    let mut keys = Vec::new();
    for cy in from_y..=to_y {
        for cx in from_x..=to_x {
            keys.push((level, cx, cy));
        }
    }
    keys
}

/// Top-left logical corner of an LOD tile.
pub fn superchunk_origin(canvas: &CanvasDescriptor, key: SuperchunkKey) -> (i32, i32) {
    let span = canvas.lod_tile_span(key.0).unwrap_or(canvas.size);
    let half = canvas.size / 2;
    (key.1 * span - half, key.2 * span - half)
}

fn sort_by_center_distance(keys: &mut [ChunkKey], viewport: &Viewport) {
    let span = CHUNK_SIZE as f64;
    let center = |key: &ChunkKey| -> f64 {
        let dx = (key.0 as f64 + 0.5) * span - viewport.x;
        let dy = (key.1 as f64 + 0.5) * span - viewport.y;
        dx * dx + dy * dy
    };
    keys.sort_by(|a, b| center(a).total_cmp(&center(b)));
}
