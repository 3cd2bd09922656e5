//! Canvas descriptors as delivered by the authority.
//!
//! A descriptor is immutable once received; one engine may know several
//! canvases but exactly one is current at a time.

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{CHUNK_SIZE, EngineError, Palette, Rectangle, Result};

/// Numeric canvas identifier used on the wire.
pub type CanvasId = u8;

/// Raw descriptor payload, the shape the authority serializes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasInfo {
    pub id: CanvasId,
    /// Single display letter, also used in shareable position tokens.
    pub letter: String,
    #[serde(default)]
    pub title: String,
    /// Logical edge length in pixels; the canvas is centered on the origin.
    pub size: i32,
    /// LOD tiles per axis, coarsest level first. May be empty for tiny canvases.
    #[serde(default)]
    pub tile_counts: Vec<u32>,
    /// Cooldown between confirmed writes, milliseconds.
    #[serde(default)]
    pub cooldown_ms: u64,
    /// Palette as `#rrggbb` strings.
    pub colors: Vec<String>,
    /// Leading palette entries that are unpaintable ground shades.
    #[serde(default)]
    pub unset_len: usize,
    #[serde(default)]
    pub locked: bool,
    /// Explicit tile bounding box `[[min_x, min_y], [max_x, max_y]]`;
    /// derived from `size` when absent.
    #[serde(default)]
    pub bounds: Option<[[i32; 2]; 2]>,
}

/// A validated, ready-to-use canvas description.
#[derive(Debug, Clone)]
pub struct CanvasDescriptor {
    pub id: CanvasId,
    pub letter: String,
    pub title: String,
    pub size: i32,
    pub tile_counts: Vec<u32>,
    pub cooldown: Duration,
    pub palette: Palette,
    pub locked: bool,
    /// Bounding box of valid chunk coordinates, in tile units.
    pub bounds: Rectangle,
}

impl CanvasDescriptor {
    /// # Errors
    ///
    /// Returns `EngineError::InvalidCanvas` when the payload is unusable
    /// (no colors, non-positive size, bad hex).
    pub fn from_info(info: CanvasInfo) -> Result<Self> {
        if info.size <= 0 {
            return Err(EngineError::InvalidCanvas {
                message: format!("size {} must be positive", info.size),
            });
        }
        if info.colors.is_empty() {
            return Err(EngineError::InvalidCanvas {
                message: "palette is empty".to_string(),
            });
        }
        if info.tile_counts.iter().any(|&c| c == 0 || i64::from(c) > i64::from(info.size)) {
            return Err(EngineError::InvalidCanvas {
                message: format!("bad LOD tile counts {:?} for size {}", info.tile_counts, info.size),
            });
        }
        let palette = Palette::from_hex_list(&info.colors, info.unset_len)?;
        let bounds = match info.bounds {
            Some([[min_x, min_y], [max_x, max_y]]) => Rectangle::new((min_x, min_y), (max_x, max_y)),
            None => {
                // Tiles cover [-size/2, size/2) around the origin.
                let half = info.size / 2;
                let max = (half - 1).div_euclid(CHUNK_SIZE);
                let min = (-half).div_euclid(CHUNK_SIZE);
                Rectangle::new((min, min), (max, max))
            }
        };
        Ok(CanvasDescriptor {
            id: info.id,
            letter: info.letter,
            title: info.title,
            size: info.size,
            tile_counts: info.tile_counts,
            cooldown: Duration::from_millis(info.cooldown_ms),
            palette,
            locked: info.locked,
            bounds,
        })
    }

    pub fn chunk_in_bounds(&self, cx: i32, cy: i32) -> bool {
        self.bounds.contains((cx, cy))
    }

    /// Whether a logical pixel coordinate lies on the canvas at all.
    pub fn pixel_in_bounds(&self, x: i32, y: i32) -> bool {
        let half = self.size / 2;
        (-half..half).contains(&x) && (-half..half).contains(&y)
    }

    pub fn lod_levels(&self) -> usize {
        self.tile_counts.len()
    }

    /// Edge length in logical units of one LOD tile at `level`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::LevelOutOfRange` for an undeclared level.
    pub fn lod_tile_span(&self, level: usize) -> Result<i32> {
        let count = *self.tile_counts.get(level).ok_or(EngineError::LevelOutOfRange {
            level,
            max: self.tile_counts.len(),
        })?;
        Ok(self.size / count.max(1) as i32)
    }
}

/// All canvases known to this session, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct CanvasMap {
    canvases: HashMap<CanvasId, CanvasDescriptor>,
}

impl CanvasMap {
    pub fn from_infos(infos: Vec<CanvasInfo>) -> Result<Self> {
        let mut canvases = HashMap::new();
        for info in infos {
            let desc = CanvasDescriptor::from_info(info)?;
            canvases.insert(desc.id, desc);
        }
        Ok(CanvasMap { canvases })
    }

    pub fn insert(&mut self, desc: CanvasDescriptor) {
        self.canvases.insert(desc.id, desc);
    }

    pub fn get(&self, id: CanvasId) -> Option<&CanvasDescriptor> {
        self.canvases.get(&id)
    }

    /// Lookup by display letter, for parsing shared position tokens.
    pub fn by_letter(&self, letter: &str) -> Option<&CanvasDescriptor> {
        self.canvases.values().find(|c| c.letter == letter)
    }

    /// First canvas a fresh session may be dropped onto.
    pub fn default_canvas(&self) -> Option<&CanvasDescriptor> {
        let mut unlocked: Vec<_> = self.canvases.values().filter(|c| !c.locked).collect();
        unlocked.sort_by_key(|c| c.id);
        unlocked.first().copied()
    }

    pub fn len(&self) -> usize {
        self.canvases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.canvases.is_empty()
    }
}
