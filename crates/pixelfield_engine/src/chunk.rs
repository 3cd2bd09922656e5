//! Tile rasters: base chunks (palette indices) and LOD superchunks
//! (decoded RGBA, display only).

use image::RgbaImage;

use crate::{CHUNK_SIZE, ColorIndex, EngineError, Palette, Result};

/// Grid coordinates of a base chunk, relative to the canvas origin.
pub type ChunkKey = (i32, i32);

/// `(level, cx, cy)` address of an LOD tile; level 0 is coarsest.
pub type SuperchunkKey = (usize, i32, i32);

const CHUNK_PIXELS: usize = (CHUNK_SIZE * CHUNK_SIZE) as usize;

/// A decoded base tile. Owned exclusively by the chunk store; replaced
/// wholesale on reload, mutated only through pixel writes.
#[derive(Debug, Clone)]
pub struct Chunk {
    pixels: Vec<ColorIndex>,
}

impl Chunk {
    /// A blank chunk filled with the ground color.
    pub fn filled(index: ColorIndex) -> Self {
        Chunk {
            pixels: vec![index; CHUNK_PIXELS],
        }
    }

    pub fn from_pixels(pixels: Vec<ColorIndex>) -> Result<Self> {
        if pixels.len() != CHUNK_PIXELS {
            return Err(EngineError::ChunkSizeMismatch {
                len: pixels.len(),
                expected: CHUNK_PIXELS,
            });
        }
        Ok(Chunk { pixels })
    }

    /// Decodes a chunk endpoint response. A payload of exactly
    /// `CHUNK_SIZE²` bytes is a raw index buffer; anything else is an
    /// encoded image whose pixels are snapped to the nearest palette
    /// entry (fully transparent pixels become the ground index 0).
    pub fn decode(bytes: &[u8], palette: &Palette) -> Result<Self> {
        if bytes.len() == CHUNK_PIXELS {
            return Ok(Chunk { pixels: bytes.to_vec() });
        }
        let img = image::load_from_memory(bytes)?.to_rgba8();
        if img.width() != CHUNK_SIZE as u32 || img.height() != CHUNK_SIZE as u32 {
            return Err(EngineError::ChunkSizeMismatch {
                len: (img.width() * img.height()) as usize,
                expected: CHUNK_PIXELS,
            });
        }
        let mut pixels = Vec::with_capacity(CHUNK_PIXELS);
        for p in img.pixels() {
            if p.0[3] == 0 {
                pixels.push(0);
            } else {
                pixels.push(palette.nearest((p.0[0], p.0[1], p.0[2]).into()));
            }
        }
        Ok(Chunk { pixels })
    }

    /// Reads the pixel at chunk-local coordinates.
    pub fn get_pixel(&self, x: i32, y: i32) -> Option<ColorIndex> {
        if !(0..CHUNK_SIZE).contains(&x) || !(0..CHUNK_SIZE).contains(&y) {
            return None;
        }
        Some(self.pixels[(y * CHUNK_SIZE + x) as usize])
    }

    /// Writes the pixel at chunk-local coordinates, returning the
    /// previous value. Out-of-range writes are ignored.
    pub fn set_pixel(&mut self, x: i32, y: i32, color: ColorIndex) -> Option<ColorIndex> {
        if !(0..CHUNK_SIZE).contains(&x) || !(0..CHUNK_SIZE).contains(&y) {
            return None;
        }
        let idx = (y * CHUNK_SIZE + x) as usize;
        let prev = self.pixels[idx];
        self.pixels[idx] = color;
        Some(prev)
    }

    pub fn pixels(&self) -> &[ColorIndex] {
        &self.pixels
    }
}

/// A decoded LOD tile. Always an RGBA raster of `CHUNK_SIZE²` pixels,
/// covering a canvas area that grows with coarseness.
#[derive(Debug, Clone)]
pub struct Superchunk {
    image: RgbaImage,
}

impl Superchunk {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes)?.to_rgba8();
        if image.width() != CHUNK_SIZE as u32 || image.height() != CHUNK_SIZE as u32 {
            return Err(EngineError::ChunkSizeMismatch {
                len: (image.width() * image.height()) as usize,
                expected: CHUNK_PIXELS,
            });
        }
        Ok(Superchunk { image })
    }

    pub fn from_image(image: RgbaImage) -> Result<Self> {
        if image.width() != CHUNK_SIZE as u32 || image.height() != CHUNK_SIZE as u32 {
            return Err(EngineError::ChunkSizeMismatch {
                len: (image.width() * image.height()) as usize,
                expected: CHUNK_PIXELS,
            });
        }
        Ok(Superchunk { image })
    }

    /// RGBA of the raster pixel at `(x, y)`; `[0, 0, 0, 0]` outside.
    pub fn rgba(&self, x: i32, y: i32) -> [u8; 4] {
        if !(0..CHUNK_SIZE).contains(&x) || !(0..CHUNK_SIZE).contains(&y) {
            return [0; 4];
        }
        self.image.get_pixel(x as u32, y as u32).0
    }
}
