//! The single source of truth for client-side session state.
//!
//! Instead of an ambient global store, one `AppState` is constructed at
//! startup and handed to the controller. Reads go through accessors,
//! writes through the typed transition methods below; network and input
//! layers never touch the fields directly.

use std::time::{Duration, Instant};

use chrono::NaiveDate;

use pixelfield_engine::{CanvasDescriptor, CanvasId, CanvasMap, ColorIndex, PositionToken, Viewport, clamp_zoom};

use crate::protocol::{ChatEntry, ConfirmPayload, InitPayload};
use crate::settings::{Options, SavedPosition};

/// Which historical snapshot is being browsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistorySelection {
    pub date: NaiveDate,
    pub hour: u8,
}

#[derive(Debug)]
pub struct AppState {
    canvases: CanvasMap,
    current_canvas: Option<CanvasId>,
    viewport: Viewport,
    selected_color: ColorIndex,

    grid_enabled: bool,
    activity_enabled: bool,
    sound_enabled: bool,
    eraser_mode: bool,
    /// Paint colors are sampled from the reference overlay.
    auto_brush: bool,
    history: Option<HistorySelection>,

    player_count: u32,
    total_pixels: u64,
    daily_pixels: u64,
    cooldown_deadline: Option<Instant>,
    chat: Vec<ChatEntry>,
    last_notification: Option<u64>,

    options: Options,
}

impl AppState {
    pub fn new(options: Options, win_width: u32, win_height: u32) -> Self {
        let mut viewport = Viewport::new(win_width, win_height);
        if let Some(saved) = options.last_position {
            viewport.set_position(saved.x as f64, saved.y as f64);
            viewport.set_zoom(clamp_zoom(saved.zoom));
        }
        AppState {
            canvases: CanvasMap::default(),
            current_canvas: options.active_canvas,
            viewport,
            selected_color: 0,
            grid_enabled: options.grid_enabled,
            activity_enabled: options.activity_enabled,
            sound_enabled: options.sound_enabled,
            eraser_mode: false,
            auto_brush: false,
            history: None,
            player_count: 0,
            total_pixels: 0,
            daily_pixels: 0,
            cooldown_deadline: None,
            chat: Vec::new(),
            last_notification: None,
            options,
        }
    }

    // === accessors ===

    pub fn canvases(&self) -> &CanvasMap {
        &self.canvases
    }

    pub fn current_canvas_id(&self) -> Option<CanvasId> {
        self.current_canvas
    }

    pub fn current_canvas(&self) -> Option<&CanvasDescriptor> {
        self.current_canvas.and_then(|id| self.canvases.get(id))
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut Viewport {
        &mut self.viewport
    }

    pub fn selected_color(&self) -> ColorIndex {
        self.selected_color
    }

    pub fn grid_enabled(&self) -> bool {
        self.grid_enabled
    }

    pub fn activity_enabled(&self) -> bool {
        self.activity_enabled
    }

    pub fn sound_enabled(&self) -> bool {
        self.sound_enabled
    }

    pub fn eraser_mode(&self) -> bool {
        self.eraser_mode
    }

    pub fn auto_brush(&self) -> bool {
        self.auto_brush
    }

    pub fn history(&self) -> Option<HistorySelection> {
        self.history
    }

    pub fn player_count(&self) -> u32 {
        self.player_count
    }

    pub fn pixel_counts(&self) -> (u64, u64) {
        (self.total_pixels, self.daily_pixels)
    }

    pub fn chat(&self) -> &[ChatEntry] {
        &self.chat
    }

    pub fn last_notification(&self) -> Option<u64> {
        self.last_notification
    }

    /// Time left before the authority accepts the next write.
    pub fn cooldown_remaining(&self, now: Instant) -> Duration {
        match self.cooldown_deadline {
            Some(deadline) if deadline > now => deadline - now,
            _ => Duration::ZERO,
        }
    }

    /// The current camera as a shareable token.
    pub fn position_token(&self) -> Option<PositionToken> {
        let canvas = self.current_canvas()?;
        Some(PositionToken::new(
            canvas.letter.clone(),
            self.viewport.x.floor() as i32,
            self.viewport.y.floor() as i32,
            self.viewport.zoom(),
        ))
    }

    // === transitions ===

    /// Installs the canvas descriptors delivered at session start.
    pub fn set_canvases(&mut self, canvases: CanvasMap) {
        self.canvases = canvases;
    }

    /// Applies the init payload and, when nothing was chosen yet, seeds
    /// the default canvas and its first paintable color. Returns the
    /// canvas that became current, if any.
    pub fn apply_init(&mut self, init: &InitPayload) -> Option<CanvasId> {
        self.player_count = init.player_count;
        self.last_notification = init.last_notification;
        self.chat = init.chat.clone();

        if !init.canvases.is_empty() {
            if let Ok(map) = CanvasMap::from_infos(init.canvases.clone()) {
                self.canvases = map;
            }
        }

        let valid = self.current_canvas.is_some_and(|id| self.canvases.get(id).is_some());
        if !valid {
            self.current_canvas = self.canvases.default_canvas().map(|c| c.id);
            self.selected_color = self.current_canvas().map_or(0, |c| c.palette.first_paintable());
        } else if self.current_canvas().is_some_and(|c| !c.palette.is_paintable(self.selected_color)) {
            self.selected_color = self.current_canvas().map_or(0, |c| c.palette.first_paintable());
        }
        self.current_canvas
    }

    /// Switches canvases. Returns `true` when the canvas actually
    /// changed; the caller must then drop all cached tiles and pending
    /// mutations.
    pub fn select_canvas(&mut self, id: CanvasId) -> bool {
        if self.current_canvas == Some(id) || self.canvases.get(id).is_none() {
            return false;
        }
        self.current_canvas = Some(id);
        if let Some(canvas) = self.canvases.get(id) {
            if !canvas.palette.is_paintable(self.selected_color) {
                self.selected_color = canvas.palette.first_paintable();
            }
        }
        true
    }

    /// Selects the active paint color; unpaintable indices are refused.
    pub fn set_selected_color(&mut self, index: ColorIndex) -> bool {
        let paintable = self.current_canvas().is_some_and(|c| c.palette.is_paintable(index));
        if paintable {
            self.selected_color = index;
        }
        paintable
    }

    pub fn set_grid_enabled(&mut self, enabled: bool) {
        self.grid_enabled = enabled;
    }

    pub fn set_activity_enabled(&mut self, enabled: bool) {
        self.activity_enabled = enabled;
    }

    pub fn set_sound_enabled(&mut self, enabled: bool) {
        self.sound_enabled = enabled;
    }

    pub fn set_eraser_mode(&mut self, enabled: bool) {
        self.eraser_mode = enabled;
    }

    pub fn set_auto_brush(&mut self, enabled: bool) {
        self.auto_brush = enabled;
    }

    /// Enters or leaves history browsing. Returns the previous selection
    /// so the caller can clear the history cache when leaving.
    pub fn set_history(&mut self, selection: Option<HistorySelection>) -> Option<HistorySelection> {
        std::mem::replace(&mut self.history, selection)
    }

    pub fn set_player_count(&mut self, count: u32) {
        self.player_count = count;
    }

    /// Applies a confirmation: cooldown and user counters.
    pub fn apply_confirmation(&mut self, confirm: &ConfirmPayload, now: Instant) {
        self.total_pixels = confirm.total_pixels;
        self.daily_pixels = confirm.daily_pixels;
        self.cooldown_deadline = Some(now + Duration::from_millis(confirm.cooldown));
    }

    pub fn apply_refusal_cooldown(&mut self, cooldown_ms: u64, now: Instant) {
        self.cooldown_deadline = Some(now + Duration::from_millis(cooldown_ms));
    }

    pub fn push_chat(&mut self, entry: ChatEntry) {
        self.chat.push(entry);
    }

    pub fn clear_chat(&mut self) {
        self.chat.clear();
    }

    pub fn set_last_notification(&mut self, time: u64) {
        self.last_notification = Some(time);
    }

    /// Mirrors the live state into the persisted options and returns
    /// them for storing.
    pub fn sync_options(&mut self) -> &Options {
        self.options.last_position = self.current_canvas.map(|canvas| SavedPosition {
            canvas,
            x: self.viewport.x.floor() as i32,
            y: self.viewport.y.floor() as i32,
            zoom: self.viewport.zoom(),
        });
        self.options.active_canvas = self.current_canvas;
        self.options.grid_enabled = self.grid_enabled;
        self.options.activity_enabled = self.activity_enabled;
        self.options.sound_enabled = self.sound_enabled;
        &self.options
    }

    pub fn options(&self) -> &Options {
        &self.options
    }
}
