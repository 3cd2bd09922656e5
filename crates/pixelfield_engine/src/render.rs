//! Dirty-flag driven software compositor.
//!
//! Nothing here runs on a timer: state changes mark the scheduler dirty
//! and the host grants one render pass per animation opportunity. The
//! output is a plain RGBA frame the embedder can blit or encode.

use image::RgbaImage;

use crate::{
    ACTIVITY_FRAMES, ActivityQueue, CHUNK_SIZE, CanvasDescriptor, ChunkStore, Color, ColorIndex, Position, Viewport, chunk_store::eligible_lod_levels,
    chunk_store::superchunk_origin,
};

/// Pixel size at which base tiles take over from the LOD pyramid.
pub const BASE_TILE_MIN_PIXEL_SIZE: f64 = 1.0;
/// Pixel size below which grid lines are suppressed.
pub const GRID_MIN_PIXEL_SIZE: f64 = 8.0;

/// Fill for regions whose tiles have not arrived yet.
const UNLOADED_RGB: (u8, u8, u8) = (196, 196, 196);
/// Activity ring color.
const ACTIVITY_RGB: (u8, u8, u8) = (255, 60, 40);

/// A reference image pinned onto the canvas, alpha-blended over the
/// rendered pixels and consulted by the auto-color brush.
#[derive(Debug, Clone)]
pub struct OverlayImage {
    pub image: RgbaImage,
    /// Logical coordinate of the image's top-left pixel.
    pub origin: Position,
    /// Additional opacity applied on top of the image's own alpha.
    pub opacity: f32,
}

impl OverlayImage {
    /// The overlay color covering a logical pixel, if any and not
    /// transparent. Used by the auto-color brush.
    pub fn color_at(&self, pos: impl Into<Position>) -> Option<Color> {
        let pos = pos.into();
        let x = pos.x - self.origin.x;
        let y = pos.y - self.origin.y;
        if x < 0 || y < 0 || x as u32 >= self.image.width() || y as u32 >= self.image.height() {
            return None;
        }
        let p = self.image.get_pixel(x as u32, y as u32).0;
        if p[3] == 0 { None } else { Some(Color::new(p[0], p[1], p[2])) }
    }
}

/// Everything one render pass reads. All references; the scheduler owns
/// nothing but its frame.
pub struct RenderInput<'a> {
    pub canvas: &'a CanvasDescriptor,
    pub viewport: &'a Viewport,
    pub store: &'a ChunkStore,
    pub activity: &'a ActivityQueue,
    /// Logical pixel under the pointer, if any.
    pub cursor: Option<Position>,
    pub selected_color: ColorIndex,
    pub grid_enabled: bool,
    pub history_mode: bool,
    pub eraser_mode: bool,
    pub overlay: Option<&'a OverlayImage>,
}

#[derive(Debug)]
pub struct RenderScheduler {
    dirty: bool,
    width: u32,
    height: u32,
    frame: Vec<u8>,
}

impl RenderScheduler {
    pub fn new(width: u32, height: u32) -> Self {
        RenderScheduler {
            dirty: true,
            width,
            height,
            frame: vec![0; (width * height * 4) as usize],
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.frame = vec![0; (width * height * 4) as usize];
        self.dirty = true;
    }

    /// The last composed RGBA frame, row-major.
    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Runs one pass if anything marked the frame dirty. Returns whether
    /// a render happened.
    pub fn render_if_dirty(&mut self, input: &RenderInput<'_>) -> bool {
        if !self.dirty {
            return false;
        }
        self.render(input);
        true
    }

    /// Composes the full frame, back to front, and clears the dirty flag.
    pub fn render(&mut self, input: &RenderInput<'_>) {
        let eligible = eligible_lod_levels(input.viewport.pixel_size(), input.canvas);
        for sy in 0..self.height {
            for sx in 0..self.width {
                let rgba = resolve_canvas_pixel(input, &eligible, sx, sy);
                self.put(sx, sy, rgba);
            }
        }
        if input.canvas.locked {
            self.hatch_locked();
        }
        if input.grid_enabled {
            self.draw_grid(input);
        }
        if let Some(cursor) = input.cursor {
            self.draw_cursor(input, cursor);
        }
        self.draw_activity(input);
        if let Some(overlay) = input.overlay {
            self.draw_overlay(input, overlay);
        }
        self.dirty = false;
    }

    fn put(&mut self, sx: u32, sy: u32, rgba: [u8; 4]) {
        let idx = ((sy * self.width + sx) * 4) as usize;
        self.frame[idx..idx + 4].copy_from_slice(&rgba);
    }

    fn blend(&mut self, sx: u32, sy: u32, rgb: (u8, u8, u8), alpha: f32) {
        if sx >= self.width || sy >= self.height {
            return;
        }
        let idx = ((sy * self.width + sx) * 4) as usize;
        let a = alpha.clamp(0.0, 1.0);
        for (i, src) in [rgb.0, rgb.1, rgb.2].into_iter().enumerate() {
            let dst = self.frame[idx + i] as f32;
            self.frame[idx + i] = (dst + (src as f32 - dst) * a) as u8;
        }
        self.frame[idx + 3] = self.frame[idx + 3].max((a * 255.0) as u8);
    }

    /// Diagonal hatching over canvases the authority has locked.
    fn hatch_locked(&mut self) {
        for sy in 0..self.height {
            for sx in 0..self.width {
                if (sx + sy) % 16 < 2 {
                    self.blend(sx, sy, (40, 40, 40), 0.35);
                }
            }
        }
    }

    fn draw_grid(&mut self, input: &RenderInput<'_>) {
        let ps = input.viewport.pixel_size();
        if ps < GRID_MIN_PIXEL_SIZE {
            return;
        }
        let (min_x, min_y, max_x, max_y) = input.viewport.visible_rect();
        for gx in (min_x.floor() as i32)..=(max_x.ceil() as i32) {
            let (sx, _) = input.viewport.to_screen(gx as f64, 0.0);
            let strong = gx % 10 == 0;
            let sx = sx.round() as i64;
            if (0..self.width as i64).contains(&sx) {
                for sy in 0..self.height {
                    self.blend(sx as u32, sy, (0, 0, 0), if strong { 0.4 } else { 0.15 });
                }
            }
        }
        for gy in (min_y.floor() as i32)..=(max_y.ceil() as i32) {
            let (_, sy) = input.viewport.to_screen(0.0, gy as f64);
            let strong = gy % 10 == 0;
            let sy = sy.round() as i64;
            if (0..self.height as i64).contains(&sy) {
                for sx in 0..self.width {
                    self.blend(sx, sy as u32, (0, 0, 0), if strong { 0.4 } else { 0.15 });
                }
            }
        }
    }

    /// Highlights the hovered pixel with the active color while letting
    /// the color beneath shine through.
    fn draw_cursor(&mut self, input: &RenderInput<'_>, cursor: Position) {
        let rgb = input.canvas.palette.get_rgb(input.selected_color);
        let (x0, y0) = input.viewport.to_screen(cursor.x as f64, cursor.y as f64);
        let (x1, y1) = input.viewport.to_screen(cursor.x as f64 + 1.0, cursor.y as f64 + 1.0);
        for sy in (y0.max(0.0) as u32)..(y1.max(0.0) as u32).min(self.height) {
            for sx in (x0.max(0.0) as u32)..(x1.max(0.0) as u32).min(self.width) {
                self.blend(sx, sy, rgb, 0.5);
            }
        }
    }

    /// Expanding rings around recent remote writes.
    fn draw_activity(&mut self, input: &RenderInput<'_>) {
        if !input.activity.enabled() {
            return;
        }
        for marker in input.activity.markers() {
            let progress = marker.frame as f64 / ACTIVITY_FRAMES as f64;
            let radius = 0.5 + progress * 4.0; // logical units
            let alpha = (1.0 - progress) as f32 * 0.8;
            let cx = marker.pos.x as f64 + 0.5;
            let cy = marker.pos.y as f64 + 0.5;
            let (x0, y0) = input.viewport.to_screen(cx - radius, cy - radius);
            let (x1, y1) = input.viewport.to_screen(cx + radius, cy + radius);
            self.stroke_rect(x0, y0, x1, y1, ACTIVITY_RGB, alpha);
        }
    }

    fn stroke_rect(&mut self, x0: f64, y0: f64, x1: f64, y1: f64, rgb: (u8, u8, u8), alpha: f32) {
        let (x0, y0) = (x0.round() as i64, y0.round() as i64);
        let (x1, y1) = (x1.round() as i64, y1.round() as i64);
        for sx in x0..=x1 {
            for sy in [y0, y1] {
                if sx >= 0 && sy >= 0 && (sx as u32) < self.width && (sy as u32) < self.height {
                    self.blend(sx as u32, sy as u32, rgb, alpha);
                }
            }
        }
        for sy in y0..=y1 {
            for sx in [x0, x1] {
                if sx >= 0 && sy >= 0 && (sx as u32) < self.width && (sy as u32) < self.height {
                    self.blend(sx as u32, sy as u32, rgb, alpha);
                }
            }
        }
    }

    fn draw_overlay(&mut self, input: &RenderInput<'_>, overlay: &OverlayImage) {
        let (x0, y0) = input.viewport.to_screen(overlay.origin.x as f64, overlay.origin.y as f64);
        let (x1, y1) = input
            .viewport
            .to_screen(overlay.origin.x as f64 + overlay.image.width() as f64, overlay.origin.y as f64 + overlay.image.height() as f64);
        let sy0 = y0.max(0.0) as u32;
        let sy1 = (y1.max(0.0) as u32).min(self.height);
        let sx0 = x0.max(0.0) as u32;
        let sx1 = (x1.max(0.0) as u32).min(self.width);
        for sy in sy0..sy1 {
            for sx in sx0..sx1 {
                let logical = input.viewport.to_logical(sx as f64 + 0.5, sy as f64 + 0.5);
                if let Some(color) = overlay.color_at(logical) {
                    let (r, g, b) = color.get_rgb();
                    self.blend(sx, sy, (r, g, b), overlay.opacity);
                }
            }
        }
    }
}

/// Resolves the canvas color under one screen pixel: base tile if the
/// zoom warrants it and the tile is loaded, else the finest eligible
/// loaded LOD tile (coarser ones act as placeholders), else the
/// unloaded fill. History and eraser modes bypass the LOD pyramid.
fn resolve_canvas_pixel(input: &RenderInput<'_>, eligible: &[usize], sx: u32, sy: u32) -> [u8; 4] {
    let logical = input.viewport.to_logical(sx as f64 + 0.5, sy as f64 + 0.5);
    let palette = &input.canvas.palette;
    let ps = input.viewport.pixel_size();

    if input.history_mode {
        return match input.store.get_history_color_at(logical) {
            Some(index) => opaque(palette.get_rgb(index)),
            None => opaque(UNLOADED_RGB),
        };
    }

    if ps >= BASE_TILE_MIN_PIXEL_SIZE || input.eraser_mode {
        if let Some(index) = input.store.get_color_at(logical) {
            if input.eraser_mode && palette.is_unset(index) {
                return [0, 0, 0, 0];
            }
            return opaque(palette.get_rgb(index));
        }
        if input.eraser_mode {
            // No LOD placeholders in eraser mode, just the flat fill.
            return opaque(UNLOADED_RGB);
        }
    }

    for &level in eligible.iter().rev() {
        let Ok(span) = input.canvas.lod_tile_span(level) else {
            continue;
        };
        let half = input.canvas.size / 2;
        let count = input.canvas.tile_counts[level] as i32;
        let tx = (logical.x + half).div_euclid(span);
        let ty = (logical.y + half).div_euclid(span);
        if !(0..count).contains(&tx) || !(0..count).contains(&ty) {
            continue;
        }
        let key = (level, tx, ty);
        if let Some(tile) = input.store.get_superchunk(key) {
            let (ox, oy) = superchunk_origin(input.canvas, key);
            let px = ((logical.x - ox) as i64 * CHUNK_SIZE as i64 / span as i64) as i32;
            let py = ((logical.y - oy) as i64 * CHUNK_SIZE as i64 / span as i64) as i32;
            let rgba = tile.rgba(px.clamp(0, CHUNK_SIZE - 1), py.clamp(0, CHUNK_SIZE - 1));
            if rgba[3] > 0 {
                return rgba;
            }
        }
    }

    opaque(UNLOADED_RGB)
}

fn opaque(rgb: (u8, u8, u8)) -> [u8; 4] {
    [rgb.0, rgb.1, rgb.2, 0xFF]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CanvasInfo, Chunk};

    fn canvas() -> CanvasDescriptor {
        CanvasDescriptor::from_info(CanvasInfo {
            id: 0,
            letter: "d".to_string(),
            title: String::new(),
            size: 65536,
            tile_counts: vec![1, 4, 16, 64],
            cooldown_ms: 4000,
            colors: vec!["#CAE3FF".into(), "#FFFFFF".into(), "#000000".into(), "#FF0000".into()],
            unset_len: 1,
            locked: false,
            bounds: None,
        })
        .unwrap()
    }

    fn base_input<'a>(canvas: &'a CanvasDescriptor, viewport: &'a Viewport, store: &'a ChunkStore, activity: &'a ActivityQueue) -> RenderInput<'a> {
        RenderInput {
            canvas,
            viewport,
            store,
            activity,
            cursor: None,
            selected_color: 3,
            grid_enabled: false,
            history_mode: false,
            eraser_mode: false,
            overlay: None,
        }
    }

    fn pixel(scheduler: &RenderScheduler, sx: u32, sy: u32) -> [u8; 4] {
        let (w, _) = scheduler.size();
        let idx = ((sy * w + sx) * 4) as usize;
        scheduler.frame()[idx..idx + 4].try_into().unwrap()
    }

    #[test]
    fn render_clears_dirty_flag() {
        let canvas = canvas();
        let mut viewport = Viewport::new(64, 64);
        viewport.set_zoom(10.0);
        let store = ChunkStore::new();
        let activity = ActivityQueue::new(true);
        let mut scheduler = RenderScheduler::new(64, 64);

        assert!(scheduler.is_dirty());
        assert!(scheduler.render_if_dirty(&base_input(&canvas, &viewport, &store, &activity)));
        assert!(!scheduler.is_dirty());
        assert!(!scheduler.render_if_dirty(&base_input(&canvas, &viewport, &store, &activity)));
        scheduler.mark_dirty();
        assert!(scheduler.render_if_dirty(&base_input(&canvas, &viewport, &store, &activity)));
    }

    #[test]
    fn base_tile_color_lands_under_its_screen_pixel() {
        let canvas = canvas();
        let mut viewport = Viewport::new(64, 64);
        viewport.set_zoom(10.0); // 4 px per logical pixel
        viewport.set_position(0.0, 0.0);

        let mut store = ChunkStore::new();
        let mut chunk = Chunk::filled(1);
        chunk.set_pixel(2, 2, 3); // logical (2,2) -> red
        store.insert_chunk((0, 0), chunk);

        let activity = ActivityQueue::new(true);
        let mut scheduler = RenderScheduler::new(64, 64);
        scheduler.render(&base_input(&canvas, &viewport, &store, &activity));

        let (sx, sy) = viewport.to_screen(2.5, 2.5);
        assert_eq!(pixel(&scheduler, sx as u32, sy as u32), [0xFF, 0, 0, 0xFF]);
        // Logical (-1,-1) has no chunk -> unloaded fill.
        let (sx, sy) = viewport.to_screen(-0.5, -0.5);
        assert_eq!(pixel(&scheduler, sx as u32, sy as u32), [196, 196, 196, 0xFF]);
    }

    #[test]
    fn eraser_mode_renders_unset_as_transparent() {
        let canvas = canvas();
        let mut viewport = Viewport::new(16, 16);
        viewport.set_zoom(10.0);
        viewport.set_position(0.0, 0.0);

        let mut store = ChunkStore::new();
        store.insert_chunk((0, 0), Chunk::filled(0)); // all ground
        let activity = ActivityQueue::new(true);
        let mut scheduler = RenderScheduler::new(16, 16);

        let mut input = base_input(&canvas, &viewport, &store, &activity);
        input.eraser_mode = true;
        scheduler.render(&input);
        assert_eq!(pixel(&scheduler, 8, 8), [0, 0, 0, 0]);
    }

    #[test]
    fn history_mode_reads_the_history_cache() {
        let canvas = canvas();
        let mut viewport = Viewport::new(16, 16);
        viewport.set_zoom(10.0);
        viewport.set_position(0.0, 0.0);

        let mut store = ChunkStore::new();
        store.insert_chunk((0, 0), Chunk::filled(3));
        store.insert_history_chunk((0, 0), Chunk::filled(2));
        let activity = ActivityQueue::new(true);
        let mut scheduler = RenderScheduler::new(16, 16);

        let mut input = base_input(&canvas, &viewport, &store, &activity);
        input.history_mode = true;
        scheduler.render(&input);
        assert_eq!(pixel(&scheduler, 8, 8), [0, 0, 0, 0xFF]); // black from history
    }

    #[test]
    fn cursor_highlight_blends_selected_color() {
        let canvas = canvas();
        let mut viewport = Viewport::new(64, 64);
        viewport.set_zoom(10.0);
        viewport.set_position(0.0, 0.0);

        let mut store = ChunkStore::new();
        store.insert_chunk((0, 0), Chunk::filled(1)); // white ground
        let activity = ActivityQueue::new(true);
        let mut scheduler = RenderScheduler::new(64, 64);

        let mut input = base_input(&canvas, &viewport, &store, &activity);
        input.cursor = Some(Position::new(2, 2));
        input.selected_color = 2; // black
        scheduler.render(&input);

        let (sx, sy) = viewport.to_screen(2.5, 2.5);
        let px = pixel(&scheduler, sx as u32, sy as u32);
        // Halfway between white and black.
        assert!(px[0] > 100 && px[0] < 160, "blended channel was {}", px[0]);
    }

    #[test]
    fn overlay_color_at_respects_bounds_and_alpha() {
        let mut img = RgbaImage::new(2, 2);
        img.put_pixel(0, 0, image::Rgba([10, 20, 30, 255]));
        img.put_pixel(1, 1, image::Rgba([0, 0, 0, 0]));
        let overlay = OverlayImage {
            image: img,
            origin: Position::new(100, 100),
            opacity: 0.5,
        };
        assert_eq!(overlay.color_at((100, 100)), Some(Color::new(10, 20, 30)));
        assert_eq!(overlay.color_at((101, 101)), None); // transparent
        assert_eq!(overlay.color_at((99, 100)), None); // outside
    }
}
