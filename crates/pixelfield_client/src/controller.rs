//! The orchestrator: owns the state container, tile caches, mutation
//! tracker, render scheduler and gesture machine, and wires them to the
//! sync channel and the fetch pool. External UI talks to the engine
//! exclusively through the operations on [`CanvasController`] and the
//! narrow [`HostSink`] callbacks.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use pixelfield_engine::{
    ActivityQueue, BASE_TILE_MIN_PIXEL_SIZE, CanvasDescriptor, CanvasId, ChunkKey, ChunkStore, Color, ColorIndex, MutationTracker, OverlayImage, PlaceOutcome,
    Position, PositionToken, RenderInput, RenderScheduler, Viewport,
    chunk_store::{eligible_lod_levels, visible_chunks, visible_superchunks},
};

use crate::fetch::{ChunkService, DEFAULT_FETCH_CONCURRENCY, FetchPool, TilePayload, TileRequest, TileResult};
use crate::input::{Intent, InteractionController, Key, ModifierRole, PointerEvent};
use crate::protocol::ChatEntry;
use crate::state::{AppState, HistorySelection};
use crate::sync::{CanvasEvent, ChannelCommand, ChannelHandle, SendDisposition};

/// Logical pan distance of one keyboard step at zoom 1; scales with the
/// zoom divisor.
const KEY_PAN_FACTOR: f64 = 4.0;

/// Out-of-scope collaborators, narrowed to the calls this engine makes.
/// All hooks default to no-ops so embedders implement what they need.
pub trait HostSink {
    /// Neutral cue after a confirmed write.
    fn play_confirm_cue(&mut self) {}
    /// Failure cue after a rejected write.
    fn play_reject_cue(&mut self) {}
    /// Transient alert text (rejection reasons, terminal errors).
    fn show_alert(&mut self, _message: &str) {}
    /// The authority demands a challenge before further writes.
    fn open_captcha(&mut self) {}
    fn chat_line(&mut self, _entry: &ChatEntry) {}
    fn chat_cleared(&mut self) {}
    fn notification(&mut self, _text: &str) {}
    fn copy_to_clipboard(&mut self, _text: &str) {}
    fn open_search(&mut self) {}
    /// Ask the embedder for a history date/hour selection.
    fn request_history_selection(&mut self) {}
    /// Debounced connectivity problem indicator.
    fn connection_problem(&mut self) {}
    /// The session is unrecoverable; the embedder should restart it.
    fn reload_required(&mut self) {}
}

/// No-op host for headless use.
#[derive(Default)]
pub struct NullHost;
impl HostSink for NullHost {}

pub struct CanvasController {
    state: AppState,
    store: ChunkStore,
    tracker: MutationTracker,
    scheduler: RenderScheduler,
    activity: ActivityQueue,
    input: InteractionController,
    pool: FetchPool,
    tile_results: mpsc::Receiver<TileResult>,
    channel: Option<ChannelHandle>,
    host: Box<dyn HostSink + Send>,
    cursor: Option<Position>,
    overlay: Option<OverlayImage>,
    /// Write options.toml on changes; embedders running ephemeral
    /// sessions can turn this off.
    pub persist_options: bool,
}

impl CanvasController {
    pub fn new(state: AppState, service: ChunkService, host: Box<dyn HostSink + Send>) -> Self {
        let (pool, tile_results) = FetchPool::new(service, DEFAULT_FETCH_CONCURRENCY);
        let (width, height) = (state.viewport().win_width, state.viewport().win_height);
        let mut input = InteractionController::new();
        input.zoom_toward_cursor = state.options().zoom_toward_cursor;
        let activity = ActivityQueue::new(state.activity_enabled());
        CanvasController {
            state,
            store: ChunkStore::new(),
            tracker: MutationTracker::new(),
            scheduler: RenderScheduler::new(width, height),
            activity,
            input,
            pool,
            tile_results,
            channel: None,
            host,
            cursor: None,
            overlay: None,
            persist_options: true,
        }
    }

    /// Wires in the sync channel once it is spawned.
    pub fn attach_channel(&mut self, channel: ChannelHandle) {
        self.channel = Some(channel);
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn viewport(&self) -> &Viewport {
        self.state.viewport()
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn set_overlay(&mut self, overlay: Option<OverlayImage>) {
        self.overlay = overlay;
        self.scheduler.mark_dirty();
    }

    // === input ===

    pub fn handle_pointer(&mut self, event: PointerEvent) {
        if let PointerEvent::Move { x, y, .. } = event {
            self.set_cursor_screen(x, y);
        }
        let intents = self.input.handle_pointer(event);
        for intent in intents {
            self.handle_intent(intent);
        }
        // Remember the camera once the gesture is over, not per delta.
        if matches!(event, PointerEvent::Up { .. } | PointerEvent::Cancel) {
            self.persist();
        }
    }

    pub fn handle_key(&mut self, key: Key) {
        let intent = self.input.handle_key(key);
        self.handle_intent(intent);
    }

    pub fn handle_modifier(&mut self, role: ModifierRole, down: bool) {
        let intents = self.input.handle_modifier(role, down);
        for intent in intents {
            self.handle_intent(intent);
        }
    }

    fn set_cursor_screen(&mut self, x: f64, y: f64) {
        let logical = self.state.viewport().to_logical(x, y);
        if self.cursor != Some(logical) {
            self.cursor = Some(logical);
            self.scheduler.mark_dirty();
        }
    }

    pub fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::Paint { x, y } => {
                let pos = self.state.viewport().to_logical(x, y);
                self.paint_at(pos, None);
            }
            Intent::BrushPaint { x, y, preserve } => {
                let pos = self.state.viewport().to_logical(x, y);
                let color = if preserve { self.restore_color_at(pos) } else { None };
                if preserve && color.is_none() {
                    return;
                }
                self.paint_at(pos, color);
            }
            Intent::PickColor { x, y } => {
                let pos = self.state.viewport().to_logical(x, y);
                if let Some(color) = self.color_under_cursor(pos) {
                    self.state.set_selected_color(color);
                    self.scheduler.mark_dirty();
                }
            }
            Intent::PanScreen { dx, dy } => {
                self.state.viewport_mut().pan_by_screen(dx, dy);
                self.after_viewport_change();
            }
            Intent::PanStep { dx, dy } => {
                let step = KEY_PAN_FACTOR * self.state.viewport().zoom();
                self.state.viewport_mut().move_by(dx as f64 * step, dy as f64 * step);
                self.after_viewport_change();
                self.persist();
            }
            Intent::ZoomBy { factor, anchor } => {
                self.state.viewport_mut().zoom_by(factor, anchor);
                self.after_viewport_change();
                self.persist();
            }
            Intent::ToggleGrid => self.set_grid_enabled(!self.state.grid_enabled()),
            Intent::ToggleActivity => self.set_activity_enabled(!self.state.activity_enabled()),
            Intent::ToggleSound => {
                let enabled = !self.state.sound_enabled();
                self.state.set_sound_enabled(enabled);
                self.persist();
            }
            Intent::ToggleHistory => {
                if self.state.history().is_some() {
                    self.exit_history();
                } else {
                    self.host.request_history_selection();
                }
            }
            Intent::ToggleAutoBrush => self.state.set_auto_brush(!self.state.auto_brush()),
            Intent::CopyPosition => {
                if let Some(token) = self.state.position_token() {
                    self.host.copy_to_clipboard(&token.to_string());
                }
            }
            Intent::OpenSearch => self.host.open_search(),
        }
    }

    fn after_viewport_change(&mut self) {
        self.scheduler.mark_dirty();
        self.load_visible(false);
    }

    // === painting ===

    /// Color the pick gesture samples: the snapshot color while browsing
    /// history, the live color otherwise.
    fn color_under_cursor(&self, pos: Position) -> Option<ColorIndex> {
        if self.state.history().is_some() {
            self.store.get_history_color_at(pos)
        } else {
            self.store.get_color_at(pos)
        }
    }

    /// Color the preserve-brush restores: the history snapshot when
    /// browsing one, else the reference overlay.
    fn restore_color_at(&self, pos: Position) -> Option<ColorIndex> {
        let canvas = self.state.current_canvas()?;
        if self.state.history().is_some() {
            return self.store.get_history_color_at(pos);
        }
        let overlay = self.overlay.as_ref()?;
        overlay.color_at(pos).map(|c| canvas.palette.nearest(c))
    }

    /// The effective paint color after eraser and auto-color modes.
    fn effective_color(&self, pos: Position, canvas: &CanvasDescriptor) -> ColorIndex {
        if self.state.eraser_mode() {
            return 0;
        }
        if self.state.auto_brush() {
            if let Some(overlay) = &self.overlay {
                if let Some(color) = overlay.color_at(pos) {
                    return canvas.palette.nearest(color);
                }
            }
        }
        self.state.selected_color()
    }

    /// Applies one optimistic paint and ships the request. The write is
    /// gated on the channel being initialized; nothing is written
    /// locally that cannot reach the authority.
    fn paint_at(&mut self, pos: Position, color_override: Option<ColorIndex>) {
        let Some(channel) = &self.channel else {
            return;
        };
        match channel.state() {
            crate::sync::ConnectionState::Initialized => {}
            crate::sync::ConnectionState::Closed => {
                self.host.reload_required();
                return;
            }
            _ => return,
        }
        let Some(canvas) = self.state.current_canvas() else {
            return;
        };
        if canvas.locked || !canvas.pixel_in_bounds(pos.x, pos.y) {
            return;
        }
        // Allow one queued write; past that the countdown must drain.
        if self.state.cooldown_remaining(Instant::now()) > canvas.cooldown {
            return;
        }
        let color = color_override.unwrap_or_else(|| self.effective_color(pos, canvas));
        let canvas_id = canvas.id;

        match self.tracker.place_local(&mut self.store, pos, color) {
            PlaceOutcome::Sent => {
                self.scheduler.mark_dirty();
                let disposition = channel.try_send(ChannelCommand::PlacePixel {
                    canvas: canvas_id,
                    x: pos.x,
                    y: pos.y,
                    color,
                });
                if disposition == SendDisposition::DeadChannel {
                    self.host.reload_required();
                }
            }
            PlaceOutcome::Unchanged | PlaceOutcome::Unloaded => {}
        }
    }

    // === network events ===

    pub fn apply_event(&mut self, event: CanvasEvent) {
        match event {
            CanvasEvent::Initialized(init) => {
                self.state.apply_init(&init);
                // Fresh session truth: reload everything in sight.
                self.load_visible(true);
                self.scheduler.mark_dirty();
            }
            CanvasEvent::PixelPlaced(echo) => {
                // Echoes for other canvases must not touch local tiles.
                if self.state.current_canvas_id() != Some(echo.canvas) {
                    return;
                }
                let pos = Position::new(echo.x, echo.y);
                if let pixelfield_engine::PlaceResult::Changed { .. } = self.store.place_pixel(pos, echo.color) {
                    self.activity.push(pos);
                    self.scheduler.mark_dirty();
                }
            }
            CanvasEvent::PlayerCount(count) => self.state.set_player_count(count),
            CanvasEvent::PixelConfirmed(confirm) => {
                let pos = Position::new(confirm.pos[0], confirm.pos[1]);
                self.tracker.on_confirm(pos);
                self.state.apply_confirmation(&confirm, Instant::now());
                if self.state.sound_enabled() {
                    self.host.play_confirm_cue();
                }
            }
            CanvasEvent::PixelRefused(refuse) => {
                let pos = Position::new(refuse.pos[0], refuse.pos[1]);
                if self.tracker.on_reject(&mut self.store, pos).is_some() {
                    self.scheduler.mark_dirty();
                }
                self.state.apply_refusal_cooldown(refuse.cooldown, Instant::now());
                // Stop a running brush so the refused pixel is not
                // immediately resent.
                self.input.cancel_gesture();
                if self.state.sound_enabled() {
                    self.host.play_reject_cue();
                }
                if !refuse.reason.is_empty() {
                    self.host.show_alert(&refuse.reason);
                }
            }
            CanvasEvent::CaptchaRequired(captcha) => {
                let pos = Position::new(captcha.pos[0], captcha.pos[1]);
                if self.tracker.on_reject(&mut self.store, pos).is_some() {
                    self.scheduler.mark_dirty();
                }
                self.input.cancel_gesture();
                // The paint is not retried after the challenge.
                self.host.open_captcha();
            }
            CanvasEvent::RefreshChunks(list) => {
                let Some(current) = self.state.current_canvas_id() else {
                    return;
                };
                let canvas = self.state.current_canvas().cloned().map(Arc::new);
                for chunk in list.into_iter().filter(|c| c.canvas == current) {
                    let key = (chunk.x, chunk.y);
                    self.store.evict_chunk(key);
                    if let Some(canvas) = &canvas {
                        self.pool.spawn(
                            canvas,
                            TileRequest::Chunk {
                                key,
                                eraser: self.state.eraser_mode(),
                            },
                        );
                    }
                }
                self.scheduler.mark_dirty();
            }
            CanvasEvent::Chat(entry) => {
                self.host.chat_line(&entry);
                self.state.push_chat(entry);
            }
            CanvasEvent::ChatCleared => {
                self.state.clear_chat();
                self.host.chat_cleared();
            }
            CanvasEvent::Notification(notification) => {
                self.state.set_last_notification(notification.time);
                self.host.notification(&notification.text);
            }
            CanvasEvent::ConnectionProblem => self.host.connection_problem(),
            CanvasEvent::ReloadRequired => self.host.reload_required(),
            CanvasEvent::ConnectionFailed { attempts } => {
                self.host.show_alert(&format!("connection lost after {attempts} attempts"));
            }
            CanvasEvent::Disconnected { reason } => {
                log::warn!("authority closed the channel: {reason}");
                self.host.connection_problem();
            }
        }
    }

    // === tile loading ===

    /// Drains finished fetches into the cache. Call from the host loop.
    pub fn pump_tiles(&mut self) {
        while let Ok(result) = self.tile_results.try_recv() {
            self.apply_tile_result(result);
        }
    }

    pub fn apply_tile_result(&mut self, result: TileResult) {
        self.pool.complete(&result.request);
        let payload = match result.payload {
            Ok(payload) => payload,
            // Already logged; the tile stays absent and is retried on
            // the next viewport move.
            Err(_) => return,
        };
        match (result.request, payload) {
            (TileRequest::Chunk { key, .. }, TilePayload::Chunk(chunk)) => self.store.insert_chunk(key, chunk),
            (TileRequest::Superchunk { key }, TilePayload::Superchunk(tile)) => self.store.insert_superchunk(key, tile),
            (TileRequest::HistoryChunk { key, .. }, TilePayload::HistoryChunk(chunk)) => self.store.insert_history_chunk(key, chunk),
            _ => return,
        }
        self.store.enforce_capacity(self.tracker.pinned_chunks());
        self.scheduler.mark_dirty();
    }

    /// Requests a single tile, honoring the canvas bounding box. A
    /// cached tile is only refetched when `force` is set.
    pub fn load_chunk(&mut self, key: ChunkKey, force: bool) {
        let Some(canvas) = self.state.current_canvas() else {
            return;
        };
        if !canvas.chunk_in_bounds(key.0, key.1) {
            return;
        }
        if !force && self.store.contains(key) {
            return;
        }
        let canvas = Arc::new(canvas.clone());
        self.pool.spawn(
            &canvas,
            TileRequest::Chunk {
                key,
                eraser: self.state.eraser_mode(),
            },
        );
    }

    /// Queues fetches for everything the viewport can see, nearest
    /// tiles first.
    pub fn load_visible(&mut self, force: bool) {
        let Some(canvas) = self.state.current_canvas().cloned() else {
            return;
        };
        let canvas = Arc::new(canvas);
        let viewport = self.state.viewport().clone();
        let pixel_size = viewport.pixel_size();

        if let Some(history) = self.state.history() {
            for key in visible_chunks(&viewport, &canvas) {
                if force || !self.store.contains_history(key) {
                    self.pool.spawn(
                        &canvas,
                        TileRequest::HistoryChunk {
                            date: history.date,
                            hour: history.hour,
                            key,
                        },
                    );
                }
            }
            return;
        }

        if pixel_size >= BASE_TILE_MIN_PIXEL_SIZE || self.state.eraser_mode() {
            let visible = visible_chunks(&viewport, &canvas);
            self.store.touch_all(&visible);
            for key in visible {
                if force || !self.store.contains(key) {
                    self.pool.spawn(
                        &canvas,
                        TileRequest::Chunk {
                            key,
                            eraser: self.state.eraser_mode(),
                        },
                    );
                }
            }
        }

        if !self.state.eraser_mode() {
            for level in eligible_lod_levels(pixel_size, &canvas) {
                for key in visible_superchunks(&viewport, &canvas, level) {
                    if force || !self.store.contains_superchunk(key) {
                        self.pool.spawn(&canvas, TileRequest::Superchunk { key });
                    }
                }
            }
        }
    }

    // === external operations ===

    pub fn select_canvas(&mut self, id: CanvasId) {
        if !self.state.select_canvas(id) {
            return;
        }
        // Pending writes belong to the old canvas; abandon them.
        self.tracker.clear();
        self.store.clear();
        self.activity.clear();
        self.scheduler.mark_dirty();
        self.persist();
        self.load_visible(false);
    }

    pub fn set_selected_color(&mut self, index: ColorIndex) -> bool {
        let changed = self.state.set_selected_color(index);
        if changed {
            self.scheduler.mark_dirty();
        }
        changed
    }

    pub fn set_grid_enabled(&mut self, enabled: bool) {
        self.state.set_grid_enabled(enabled);
        self.scheduler.mark_dirty();
        self.persist();
    }

    pub fn set_activity_enabled(&mut self, enabled: bool) {
        self.state.set_activity_enabled(enabled);
        self.activity.set_enabled(enabled);
        self.scheduler.mark_dirty();
        self.persist();
    }

    pub fn set_eraser_mode(&mut self, enabled: bool) {
        if self.state.eraser_mode() == enabled {
            return;
        }
        self.state.set_eraser_mode(enabled);
        // Cached rasters came from the other URL variant.
        self.store.clear_base();
        self.scheduler.mark_dirty();
        self.load_visible(false);
    }

    pub fn enter_history(&mut self, selection: HistorySelection) {
        self.state.set_history(Some(selection));
        self.store.clear_history();
        self.scheduler.mark_dirty();
        self.load_visible(false);
    }

    pub fn exit_history(&mut self) {
        if self.state.set_history(None).is_some() {
            self.store.clear_history();
            self.scheduler.mark_dirty();
            self.load_visible(false);
        }
    }

    /// Jumps to a shared position token.
    pub fn go_to_token(&mut self, token: &PositionToken) -> pixelfield_engine::Result<()> {
        let (canvas, pos, zoom) = token.resolve(self.state.canvases())?;
        self.select_canvas(canvas);
        self.state.viewport_mut().set_position(pos.x as f64, pos.y as f64);
        self.state.viewport_mut().set_zoom(zoom);
        self.after_viewport_change();
        Ok(())
    }

    pub fn send_chat(&mut self, message: &str) {
        if let Some(channel) = &self.channel {
            if channel.try_send(ChannelCommand::Chat { message: message.to_string() }) == SendDisposition::DeadChannel {
                self.host.reload_required();
            }
        }
    }

    fn persist(&mut self) {
        if !self.persist_options {
            return;
        }
        if let Err(err) = self.state.sync_options().store_options() {
            log::warn!("failed to store options: {err}");
        }
    }

    // === rendering ===

    /// Advances marker animation; returns whether another tick is
    /// wanted. Call once per animation opportunity.
    pub fn tick(&mut self) -> bool {
        if self.activity.is_empty() {
            return false;
        }
        let animating = self.activity.tick();
        self.scheduler.mark_dirty();
        animating
    }

    /// Runs one render pass if anything is dirty; returns whether the
    /// frame changed.
    pub fn render_if_dirty(&mut self) -> bool {
        let Some(canvas) = self.state.current_canvas() else {
            return false;
        };
        let input = RenderInput {
            canvas,
            viewport: self.state.viewport(),
            store: &self.store,
            activity: &self.activity,
            cursor: self.cursor,
            selected_color: self.state.selected_color(),
            grid_enabled: self.state.grid_enabled(),
            history_mode: self.state.history().is_some(),
            eraser_mode: self.state.eraser_mode(),
            overlay: self.overlay.as_ref(),
        };
        self.scheduler.render_if_dirty(&input)
    }

    pub fn frame(&self) -> &[u8] {
        self.scheduler.frame()
    }

    pub fn frame_size(&self) -> (u32, u32) {
        self.scheduler.size()
    }

    /// Live color under a logical pixel, for palette pickers.
    pub fn color_at(&self, pos: impl Into<Position>) -> Option<Color> {
        let canvas = self.state.current_canvas()?;
        let index = self.store.get_color_at(pos)?;
        canvas.palette.get(index).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ChunkRef, ConfirmPayload, InitPayload, PixelEcho, RefusePayload};
    use crate::settings::Options;
    use crate::sync::ConnectionState;
    use pixelfield_engine::{CanvasInfo, Chunk};
    use std::sync::{Arc as StdArc, Mutex};

    #[derive(Default, Clone)]
    struct RecordingHost {
        alerts: StdArc<Mutex<Vec<String>>>,
        captcha_opened: StdArc<Mutex<u32>>,
        reject_cues: StdArc<Mutex<u32>>,
        confirm_cues: StdArc<Mutex<u32>>,
        clipboard: StdArc<Mutex<Option<String>>>,
        reloads: StdArc<Mutex<u32>>,
    }

    impl HostSink for RecordingHost {
        fn play_confirm_cue(&mut self) {
            *self.confirm_cues.lock().unwrap() += 1;
        }
        fn play_reject_cue(&mut self) {
            *self.reject_cues.lock().unwrap() += 1;
        }
        fn show_alert(&mut self, message: &str) {
            self.alerts.lock().unwrap().push(message.to_string());
        }
        fn open_captcha(&mut self) {
            *self.captcha_opened.lock().unwrap() += 1;
        }
        fn copy_to_clipboard(&mut self, text: &str) {
            *self.clipboard.lock().unwrap() = Some(text.to_string());
        }
        fn reload_required(&mut self) {
            *self.reloads.lock().unwrap() += 1;
        }
    }

    fn canvas_infos() -> Vec<CanvasInfo> {
        vec![
            CanvasInfo {
                id: 0,
                letter: "d".to_string(),
                title: "Earth".to_string(),
                size: 65536,
                tile_counts: vec![1, 4],
                cooldown_ms: 4000,
                colors: vec!["#CAE3FF".into(), "#FFFFFF".into(), "#000000".into(), "#FF0000".into()],
                unset_len: 1,
                locked: false,
                bounds: None,
            },
            CanvasInfo {
                id: 1,
                letter: "w".to_string(),
                title: "Moon".to_string(),
                size: 1024,
                tile_counts: vec![],
                cooldown_ms: 1000,
                colors: vec!["#000000".into(), "#FFFFFF".into()],
                unset_len: 0,
                locked: false,
                bounds: None,
            },
        ]
    }

    fn controller_with_host(host: RecordingHost) -> CanvasController {
        let mut state = AppState::new(Options::default(), 64, 64);
        state.viewport_mut().set_zoom(10.0);
        let mut controller = CanvasController::new(state, ChunkService::new("http://localhost:9"), Box::new(host));
        controller.persist_options = false;
        controller.apply_event(CanvasEvent::Initialized(Box::new(InitPayload {
            player_count: 1,
            cooldowns: Default::default(),
            chat: vec![],
            last_notification: None,
            canvases: canvas_infos(),
        })));
        controller
    }

    fn with_loaded_chunk(controller: &mut CanvasController, fill: ColorIndex) {
        controller.store.insert_chunk((0, 0), Chunk::filled(fill));
        controller.scheduler.mark_dirty();
    }

    #[tokio::test]
    async fn paint_writes_locally_and_sends_the_request() {
        let host = RecordingHost::default();
        let mut controller = controller_with_host(host);
        with_loaded_chunk(&mut controller, 1);

        let (handle, mut commands) = ChannelHandle::detached(ConnectionState::Initialized);
        controller.attach_channel(handle);
        assert!(controller.set_selected_color(3));

        controller.handle_intent(Intent::Paint { x: 32.0, y: 32.0 });
        let target = controller.viewport().to_logical(32.0, 32.0);
        assert_eq!(controller.store.get_color_at(target), Some(3));

        let cmd = commands.try_recv().expect("a placePixel request must be sent");
        assert_eq!(
            cmd,
            ChannelCommand::PlacePixel {
                canvas: 0,
                x: target.x,
                y: target.y,
                color: 3,
            }
        );
    }

    #[tokio::test]
    async fn paint_is_gated_until_the_channel_initializes() {
        let host = RecordingHost::default();
        let mut controller = controller_with_host(host.clone());
        with_loaded_chunk(&mut controller, 1);

        let (handle, mut commands) = ChannelHandle::detached(ConnectionState::Connecting);
        controller.attach_channel(handle);
        controller.handle_intent(Intent::Paint { x: 32.0, y: 32.0 });
        assert!(commands.try_recv().is_err(), "nothing may be sent while connecting");
        let target = controller.viewport().to_logical(32.0, 32.0);
        assert_eq!(controller.store.get_color_at(target), Some(1), "no local write without a channel");

        // A dead channel demands a session restart instead.
        let (handle, _commands) = ChannelHandle::detached(ConnectionState::Closed);
        controller.attach_channel(handle);
        controller.handle_intent(Intent::Paint { x: 32.0, y: 32.0 });
        assert_eq!(*host.reloads.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn refusal_rolls_back_cancels_brush_and_cues() {
        let host = RecordingHost::default();
        let mut controller = controller_with_host(host.clone());
        with_loaded_chunk(&mut controller, 1);
        let (handle, _commands) = ChannelHandle::detached(ConnectionState::Initialized);
        controller.attach_channel(handle);

        assert!(controller.set_selected_color(3));
        controller.handle_modifier(ModifierRole::PaintBrush, true);
        let target = controller.viewport().to_logical(32.0, 32.0);
        controller.handle_intent(Intent::Paint { x: 32.0, y: 32.0 });
        assert_eq!(controller.store.get_color_at(target), Some(3));

        controller.apply_event(CanvasEvent::PixelRefused(RefusePayload {
            cooldown: 8000,
            reason: "protected zone".to_string(),
            pos: [target.x, target.y],
        }));

        assert_eq!(controller.store.get_color_at(target), Some(1), "rolled back");
        assert!(!controller.input.is_brushing(), "brush gesture cancelled");
        assert_eq!(*host.reject_cues.lock().unwrap(), 1);
        assert_eq!(host.alerts.lock().unwrap().as_slice(), ["protected zone"]);
    }

    #[tokio::test]
    async fn confirmation_clears_pending_and_updates_counters() {
        let host = RecordingHost::default();
        let mut controller = controller_with_host(host.clone());
        with_loaded_chunk(&mut controller, 1);
        let (handle, _commands) = ChannelHandle::detached(ConnectionState::Initialized);
        controller.attach_channel(handle);
        assert!(controller.set_selected_color(2));

        controller.handle_intent(Intent::Paint { x: 32.0, y: 32.0 });
        let target = controller.viewport().to_logical(32.0, 32.0);
        controller.apply_event(CanvasEvent::PixelConfirmed(ConfirmPayload {
            cooldown: 4000,
            total_pixels: 77,
            daily_pixels: 5,
            pos: [target.x, target.y],
        }));

        assert!(!controller.tracker.is_pending(target));
        assert_eq!(controller.state().pixel_counts(), (77, 5));
        assert_eq!(*host.confirm_cues.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn remote_echo_for_another_canvas_is_ignored() {
        let mut controller = controller_with_host(RecordingHost::default());
        with_loaded_chunk(&mut controller, 1);

        controller.apply_event(CanvasEvent::PixelPlaced(PixelEcho { canvas: 1, x: 5, y: 5, color: 3 }));
        assert_eq!(controller.store.get_color_at((5, 5)), Some(1), "tile untouched");
        assert!(controller.activity.is_empty(), "no marker for foreign canvases");

        controller.apply_event(CanvasEvent::PixelPlaced(PixelEcho { canvas: 0, x: 5, y: 5, color: 3 }));
        assert_eq!(controller.store.get_color_at((5, 5)), Some(3));
        assert_eq!(controller.activity.markers().len(), 1);
    }

    #[tokio::test]
    async fn captcha_rejects_and_opens_the_challenge() {
        let host = RecordingHost::default();
        let mut controller = controller_with_host(host.clone());
        with_loaded_chunk(&mut controller, 1);
        let (handle, _commands) = ChannelHandle::detached(ConnectionState::Initialized);
        controller.attach_channel(handle);
        assert!(controller.set_selected_color(2));

        let target = controller.viewport().to_logical(32.0, 32.0);
        controller.handle_intent(Intent::Paint { x: 32.0, y: 32.0 });
        assert_eq!(controller.store.get_color_at(target), Some(2));
        controller.apply_event(CanvasEvent::CaptchaRequired(crate::protocol::CaptchaPayload { pos: [target.x, target.y] }));

        assert_eq!(controller.store.get_color_at(target), Some(1), "rolled back");
        assert_eq!(*host.captcha_opened.lock().unwrap(), 1);
        assert!(!controller.tracker.is_pending(target), "not retried automatically");
    }

    #[tokio::test]
    async fn refresh_chunks_evicts_only_the_active_canvas() {
        let mut controller = controller_with_host(RecordingHost::default());
        with_loaded_chunk(&mut controller, 1);
        controller.store.insert_chunk((1, 1), Chunk::filled(2));

        controller.apply_event(CanvasEvent::RefreshChunks(vec![
            ChunkRef { canvas: 0, x: 0, y: 0 },
            ChunkRef { canvas: 1, x: 1, y: 1 },
        ]));

        assert!(controller.store.get_chunk((0, 0)).is_none(), "active-canvas tile evicted");
        assert!(controller.store.get_chunk((1, 1)).is_some(), "foreign tile kept");
        assert!(controller.pool.is_in_flight(&TileRequest::Chunk { key: (0, 0), eraser: false }), "evicted tile reloads");
    }

    #[tokio::test]
    async fn copy_position_puts_the_token_on_the_clipboard() {
        let host = RecordingHost::default();
        let mut controller = controller_with_host(host.clone());
        controller.state.viewport_mut().set_position(-290.0, 12.0);
        controller.state.viewport_mut().set_zoom(10.0);

        controller.handle_intent(Intent::CopyPosition);
        assert_eq!(host.clipboard.lock().unwrap().as_deref(), Some("#d(-290,12,10)"));
    }

    #[tokio::test]
    async fn out_of_bounds_tile_load_is_a_no_op() {
        let mut controller = controller_with_host(RecordingHost::default());
        // Earth bounds are tiles -128..=127 per axis.
        let before = controller.pool.in_flight();
        controller.load_chunk((500, 0), false);
        assert_eq!(controller.pool.in_flight(), before, "nothing may be fetched outside the bounding box");
        controller.load_chunk((50, 50), false);
        assert_eq!(controller.pool.in_flight(), before + 1, "in-bounds tiles do fetch");
    }

    #[tokio::test]
    async fn history_exit_clears_the_snapshot_cache() {
        let mut controller = controller_with_host(RecordingHost::default());
        controller.store.insert_history_chunk((0, 0), Chunk::filled(2));
        controller.state.set_history(Some(HistorySelection {
            date: chrono::NaiveDate::from_ymd_opt(2024, 3, 7).unwrap(),
            hour: 13,
        }));

        controller.exit_history();
        assert!(controller.store.get_history_color_at((0, 0)).is_none());
        assert!(controller.state.history().is_none());
    }
}
