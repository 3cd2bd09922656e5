//! Gesture and keyboard handling.
//!
//! Raw pointer/touch events are disambiguated by an explicit state
//! machine with named states and transition guards instead of ad-hoc
//! movement checks: a press that never moves resolves to a paint (or a
//! color pick after the long-press delay), movement beyond the threshold
//! reclassifies to panning, a second touch point to pinch zooming, and
//! the two modifier roles drive the continuous brushes. The controller
//! receives high-level [`Intent`]s only.

use std::collections::HashMap;

/// Screen-space distance a pointer may wander before a press stops
/// counting as a tap.
pub const MOVE_THRESHOLD: f64 = 4.0;

/// Hold duration after which a motionless press samples the color under
/// the pointer instead of painting.
pub const LONG_PRESS_MS: u64 = 600;

/// Wheel/keyboard zoom step factor.
pub const ZOOM_STEP: f64 = 1.1;

/// Raw pointer/touch input as delivered by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Down { id: u64, x: f64, y: f64, time_ms: u64 },
    Move { id: u64, x: f64, y: f64, time_ms: u64 },
    Up { id: u64, x: f64, y: f64, time_ms: u64 },
    Wheel { delta: f64, x: f64, y: f64 },
    /// Host lost the pointer (window blur etc.).
    Cancel,
}

/// The two held-modifier brush roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierRole {
    /// Paint continuously with the active color while hovering.
    PaintBrush,
    /// Paint with whatever color is already under the cursor.
    PickBrush,
}

/// Keyboard shortcuts, already translated from keycodes by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    PanLeft,
    PanRight,
    PanUp,
    PanDown,
    ZoomIn,
    ZoomOut,
    ToggleGrid,
    ToggleActivity,
    ToggleSound,
    ToggleHistory,
    ToggleAutoBrush,
    CopyPosition,
    OpenSearch,
}

/// High-level operations handed to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Paint the pixel under these screen coordinates.
    Paint { x: f64, y: f64 },
    /// Continuous-brush paint; `preserve` keeps the color already there.
    BrushPaint { x: f64, y: f64, preserve: bool },
    /// Sample the color under these coordinates into the active color.
    PickColor { x: f64, y: f64 },
    /// Translate the viewport by screen pixels.
    PanScreen { dx: f64, dy: f64 },
    /// Keyboard pan in whole steps; the controller scales by zoom.
    PanStep { dx: i32, dy: i32 },
    /// Multiply the zoom, optionally anchored at screen coordinates.
    ZoomBy { factor: f64, anchor: Option<(f64, f64)> },
    ToggleGrid,
    ToggleActivity,
    ToggleSound,
    ToggleHistory,
    ToggleAutoBrush,
    CopyPosition,
    OpenSearch,
}

/// Named gesture states; transitions are the only place raw deltas are
/// inspected.
#[derive(Debug, Clone, Copy, PartialEq)]
enum GestureState {
    Idle,
    /// One pointer down, not yet classified.
    Pressed { id: u64, start_x: f64, start_y: f64, time_ms: u64 },
    /// Movement exceeded the threshold; consumes motion as pan.
    Panning { id: u64, last_x: f64, last_y: f64 },
    /// Two pointers down; distance delta drives zoom.
    Pinching { distance: f64 },
    /// Modifier-held continuous brush.
    Brushing { preserve: bool },
}

#[derive(Debug)]
pub struct InteractionController {
    state: GestureState,
    /// Live pointer positions, needed to classify multi-touch.
    pointers: HashMap<u64, (f64, f64)>,
    /// Zoom toward the pointer instead of the window center.
    pub zoom_toward_cursor: bool,
}

impl Default for InteractionController {
    fn default() -> Self {
        Self::new()
    }
}

impl InteractionController {
    pub fn new() -> Self {
        InteractionController {
            state: GestureState::Idle,
            pointers: HashMap::new(),
            zoom_toward_cursor: true,
        }
    }

    pub fn is_brushing(&self) -> bool {
        matches!(self.state, GestureState::Brushing { .. })
    }

    /// Aborts whatever gesture is running. Called when the authority
    /// rejects a write, so a continuous brush does not immediately
    /// resend the refused coordinate.
    pub fn cancel_gesture(&mut self) {
        self.state = GestureState::Idle;
    }

    /// Feeds one raw pointer event, returning the intents it resolves to.
    pub fn handle_pointer(&mut self, event: PointerEvent) -> Vec<Intent> {
        match event {
            PointerEvent::Down { id, x, y, time_ms } => self.on_down(id, x, y, time_ms),
            PointerEvent::Move { id, x, y, .. } => self.on_move(id, x, y),
            PointerEvent::Up { id, x, y, time_ms } => self.on_up(id, x, y, time_ms),
            PointerEvent::Wheel { delta, x, y } => {
                let factor = if delta < 0.0 { 1.0 / ZOOM_STEP } else { ZOOM_STEP };
                let anchor = self.zoom_toward_cursor.then_some((x, y));
                vec![Intent::ZoomBy { factor, anchor }]
            }
            PointerEvent::Cancel => {
                self.pointers.clear();
                if !self.is_brushing() {
                    self.state = GestureState::Idle;
                }
                Vec::new()
            }
        }
    }

    fn on_down(&mut self, id: u64, x: f64, y: f64, time_ms: u64) -> Vec<Intent> {
        self.pointers.insert(id, (x, y));
        match self.state {
            GestureState::Brushing { preserve } => {
                // Brush mode swallows presses and paints right away.
                vec![Intent::BrushPaint { x, y, preserve }]
            }
            GestureState::Idle => {
                self.state = GestureState::Pressed { id, start_x: x, start_y: y, time_ms };
                Vec::new()
            }
            GestureState::Pressed { .. } | GestureState::Panning { .. } => {
                // Second simultaneous pointer: reclassify as pinch.
                if let Some(distance) = self.pinch_distance() {
                    self.state = GestureState::Pinching { distance };
                }
                Vec::new()
            }
            GestureState::Pinching { .. } => Vec::new(),
        }
    }

    fn on_move(&mut self, id: u64, x: f64, y: f64) -> Vec<Intent> {
        self.pointers.insert(id, (x, y));
        match self.state {
            GestureState::Brushing { preserve } => {
                vec![Intent::BrushPaint { x, y, preserve }]
            }
            GestureState::Pressed {
                id: press_id,
                start_x,
                start_y,
                ..
            } if press_id == id => {
                let moved = ((x - start_x).powi(2) + (y - start_y).powi(2)).sqrt();
                if moved > MOVE_THRESHOLD {
                    // Once panning, motion is never paint again.
                    self.state = GestureState::Panning { id, last_x: x, last_y: y };
                    vec![Intent::PanScreen {
                        dx: x - start_x,
                        dy: y - start_y,
                    }]
                } else {
                    Vec::new()
                }
            }
            GestureState::Panning { id: pan_id, last_x, last_y } if pan_id == id => {
                self.state = GestureState::Panning { id, last_x: x, last_y: y };
                vec![Intent::PanScreen {
                    dx: x - last_x,
                    dy: y - last_y,
                }]
            }
            GestureState::Pinching { distance } => {
                let Some(new_distance) = self.pinch_distance() else {
                    return Vec::new();
                };
                self.state = GestureState::Pinching { distance: new_distance };
                if new_distance <= f64::EPSILON || distance <= f64::EPSILON {
                    return Vec::new();
                }
                // Spreading fingers moves closer (zoom is a divisor).
                let factor = distance / new_distance;
                let anchor = self.zoom_toward_cursor.then(|| self.pinch_midpoint()).flatten();
                vec![Intent::ZoomBy { factor, anchor }]
            }
            _ => Vec::new(),
        }
    }

    fn on_up(&mut self, id: u64, x: f64, y: f64, time_ms: u64) -> Vec<Intent> {
        self.pointers.remove(&id);
        match self.state {
            GestureState::Brushing { .. } => Vec::new(),
            GestureState::Pressed {
                id: press_id, time_ms: down_ms, ..
            } if press_id == id => {
                self.state = GestureState::Idle;
                if time_ms.saturating_sub(down_ms) >= LONG_PRESS_MS {
                    vec![Intent::PickColor { x, y }]
                } else {
                    vec![Intent::Paint { x, y }]
                }
            }
            GestureState::Panning { id: pan_id, .. } if pan_id == id => {
                self.state = GestureState::Idle;
                Vec::new()
            }
            GestureState::Pinching { .. } => {
                // Drop back to panning with the remaining pointer.
                self.state = match self.pointers.iter().next() {
                    Some((&rest, &(px, py))) => GestureState::Panning {
                        id: rest,
                        last_x: px,
                        last_y: py,
                    },
                    None => GestureState::Idle,
                };
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    /// Modifier keys enter and leave the continuous brush modes.
    /// The paint brush takes priority over the pick brush when both are
    /// held.
    pub fn handle_modifier(&mut self, role: ModifierRole, down: bool) -> Vec<Intent> {
        if down {
            let preserve = match (self.state, role) {
                (GestureState::Brushing { preserve: false }, _) => false,
                (_, ModifierRole::PaintBrush) => false,
                (_, ModifierRole::PickBrush) => true,
            };
            self.state = GestureState::Brushing { preserve };
        } else if self.is_brushing() {
            self.state = GestureState::Idle;
        }
        Vec::new()
    }

    /// Keyboard shortcuts map one-to-one onto controller operations.
    pub fn handle_key(&mut self, key: Key) -> Intent {
        match key {
            Key::PanLeft => Intent::PanStep { dx: -1, dy: 0 },
            Key::PanRight => Intent::PanStep { dx: 1, dy: 0 },
            Key::PanUp => Intent::PanStep { dx: 0, dy: -1 },
            Key::PanDown => Intent::PanStep { dx: 0, dy: 1 },
            Key::ZoomIn => Intent::ZoomBy {
                factor: 1.0 / ZOOM_STEP,
                anchor: None,
            },
            Key::ZoomOut => Intent::ZoomBy { factor: ZOOM_STEP, anchor: None },
            Key::ToggleGrid => Intent::ToggleGrid,
            Key::ToggleActivity => Intent::ToggleActivity,
            Key::ToggleSound => Intent::ToggleSound,
            Key::ToggleHistory => Intent::ToggleHistory,
            Key::ToggleAutoBrush => Intent::ToggleAutoBrush,
            Key::CopyPosition => Intent::CopyPosition,
            Key::OpenSearch => Intent::OpenSearch,
        }
    }

    fn pinch_distance(&self) -> Option<f64> {
        let mut it = self.pointers.values();
        let (x0, y0) = it.next()?;
        let (x1, y1) = it.next()?;
        Some(((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt())
    }

    fn pinch_midpoint(&self) -> Option<(f64, f64)> {
        let mut it = self.pointers.values();
        let (x0, y0) = it.next()?;
        let (x1, y1) = it.next()?;
        Some(((x0 + x1) / 2.0, (y0 + y1) / 2.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn down(id: u64, x: f64, y: f64, t: u64) -> PointerEvent {
        PointerEvent::Down { id, x, y, time_ms: t }
    }
    fn mv(id: u64, x: f64, y: f64, t: u64) -> PointerEvent {
        PointerEvent::Move { id, x, y, time_ms: t }
    }
    fn up(id: u64, x: f64, y: f64, t: u64) -> PointerEvent {
        PointerEvent::Up { id, x, y, time_ms: t }
    }

    #[test]
    fn motionless_tap_paints_at_release() {
        let mut input = InteractionController::new();
        assert!(input.handle_pointer(down(1, 100.0, 100.0, 0)).is_empty());
        let intents = input.handle_pointer(up(1, 100.0, 100.0, 120));
        assert_eq!(intents, vec![Intent::Paint { x: 100.0, y: 100.0 }]);
    }

    #[test]
    fn movement_beyond_threshold_becomes_pan_and_never_paints() {
        let mut input = InteractionController::new();
        input.handle_pointer(down(1, 100.0, 100.0, 0));
        assert!(input.handle_pointer(mv(1, 102.0, 100.0, 10)).is_empty(), "within threshold");
        let intents = input.handle_pointer(mv(1, 110.0, 100.0, 20));
        assert_eq!(intents, vec![Intent::PanScreen { dx: 10.0, dy: 0.0 }]);
        let intents = input.handle_pointer(mv(1, 115.0, 104.0, 30));
        assert_eq!(intents, vec![Intent::PanScreen { dx: 5.0, dy: 4.0 }]);
        assert!(input.handle_pointer(up(1, 115.0, 104.0, 40)).is_empty(), "pan release does not paint");
    }

    #[test]
    fn second_pointer_reclassifies_to_pinch_zoom() {
        let mut input = InteractionController::new();
        input.handle_pointer(down(1, 100.0, 100.0, 0));
        input.handle_pointer(down(2, 200.0, 100.0, 10)); // distance 100
        let intents = input.handle_pointer(mv(2, 300.0, 100.0, 20)); // distance 200
        match intents.as_slice() {
            [Intent::ZoomBy { factor, anchor }] => {
                assert!((factor - 0.5).abs() < 1e-9, "spreading halves the zoom divisor");
                assert_eq!(*anchor, Some((200.0, 100.0)));
            }
            other => panic!("expected zoom intent, got {other:?}"),
        }
        // Lifting one finger falls back to panning, not painting.
        assert!(input.handle_pointer(up(2, 300.0, 100.0, 30)).is_empty());
        assert!(input.handle_pointer(up(1, 100.0, 100.0, 40)).is_empty());
    }

    #[test]
    fn long_press_picks_the_color_instead_of_painting() {
        let mut input = InteractionController::new();
        input.handle_pointer(down(1, 50.0, 60.0, 0));
        let intents = input.handle_pointer(up(1, 50.0, 60.0, LONG_PRESS_MS + 1));
        assert_eq!(intents, vec![Intent::PickColor { x: 50.0, y: 60.0 }]);
    }

    #[test]
    fn brush_modifier_paints_on_hover_and_takes_priority() {
        let mut input = InteractionController::new();
        input.handle_modifier(ModifierRole::PaintBrush, true);
        let intents = input.handle_pointer(mv(1, 10.0, 10.0, 0));
        assert_eq!(
            intents,
            vec![Intent::BrushPaint {
                x: 10.0,
                y: 10.0,
                preserve: false
            }]
        );

        // Paint brush swallows the pick role while held.
        input.handle_modifier(ModifierRole::PickBrush, true);
        let intents = input.handle_pointer(mv(1, 11.0, 10.0, 10));
        assert_eq!(
            intents,
            vec![Intent::BrushPaint {
                x: 11.0,
                y: 10.0,
                preserve: false
            }]
        );

        input.handle_modifier(ModifierRole::PaintBrush, false);
        assert!(!input.is_brushing());
    }

    #[test]
    fn pick_brush_preserves_the_underlying_color() {
        let mut input = InteractionController::new();
        input.handle_modifier(ModifierRole::PickBrush, true);
        let intents = input.handle_pointer(mv(1, 5.0, 5.0, 0));
        assert_eq!(intents, vec![Intent::BrushPaint { x: 5.0, y: 5.0, preserve: true }]);
    }

    #[test]
    fn cancel_gesture_stops_a_brush() {
        let mut input = InteractionController::new();
        input.handle_modifier(ModifierRole::PaintBrush, true);
        assert!(input.is_brushing());
        input.cancel_gesture();
        assert!(!input.is_brushing());
        assert!(input.handle_pointer(mv(1, 5.0, 5.0, 0)).is_empty());
    }

    #[test]
    fn wheel_zoom_anchors_at_the_cursor() {
        let mut input = InteractionController::new();
        let intents = input.handle_pointer(PointerEvent::Wheel { delta: -1.0, x: 3.0, y: 4.0 });
        match intents.as_slice() {
            [Intent::ZoomBy { factor, anchor }] => {
                assert!(*factor < 1.0, "wheel up moves closer");
                assert_eq!(*anchor, Some((3.0, 4.0)));
            }
            other => panic!("expected zoom intent, got {other:?}"),
        }

        input.zoom_toward_cursor = false;
        let intents = input.handle_pointer(PointerEvent::Wheel { delta: -1.0, x: 3.0, y: 4.0 });
        assert_eq!(
            intents,
            vec![Intent::ZoomBy {
                factor: 1.0 / ZOOM_STEP,
                anchor: None
            }]
        );
    }

    #[test]
    fn keyboard_shortcuts_map_directly() {
        let mut input = InteractionController::new();
        assert_eq!(input.handle_key(Key::PanLeft), Intent::PanStep { dx: -1, dy: 0 });
        assert_eq!(input.handle_key(Key::ToggleHistory), Intent::ToggleHistory);
        assert_eq!(input.handle_key(Key::CopyPosition), Intent::CopyPosition);
    }
}
