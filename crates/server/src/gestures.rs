use std::time::{Duration, Instant};

use deskslice_protocol::Rect;

use crate::mapper;

/// Drop drag moves arriving faster than the host can usefully consume them.
const MIN_MOVE_INTERVAL: Duration = Duration::from_millis(16);
/// Drop drag moves smaller than this in both axes (L∞).
const MIN_MOVE_DELTA: i32 = 2;

/// A host input operation produced by the gesture layer, applied in order
/// through the injector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Move { x: i32, y: i32 },
    LeftDown { x: i32, y: i32 },
    LeftUp,
    Click { x: i32, y: i32 },
    Type(String),
    Enter,
}

/// Run-mode drag state machine.
///
/// A pointer that goes down inside the scroll region owns a drag until it
/// lifts; other pointers' moves and ups are dropped meanwhile. Everything is
/// dropped while input is disabled.
#[derive(Debug, Default)]
pub struct GestureState {
    drag_active: bool,
    drag_pointer: i32,
    last_move_at: Option<Instant>,
    last_x: i32,
    last_y: i32,
}

impl GestureState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pointer down: inside the scroll region starts a drag (left button
    /// press), anywhere else is a plain click.
    pub fn handle_down(
        &mut self,
        input_enabled: bool,
        pointer: i32,
        abs_x: i32,
        abs_y: i32,
        plugin: Rect,
        scroll_rel: Rect,
        now: Instant,
    ) -> Vec<Action> {
        if !input_enabled {
            return Vec::new();
        }

        let plugin = plugin.normalize();
        let scroll = scroll_rel.normalize();
        let rel_x = abs_x - plugin.x;
        let rel_y = abs_y - plugin.y;

        if scroll.contains(rel_x, rel_y) {
            self.drag_active = true;
            self.drag_pointer = pointer;
            self.last_move_at = Some(now);
            self.last_x = abs_x;
            self.last_y = abs_y;
            return vec![Action::LeftDown { x: abs_x, y: abs_y }];
        }

        self.drag_active = false;
        vec![Action::Click { x: abs_x, y: abs_y }]
    }

    /// Pointer move: only forwarded while the same pointer drags, and only
    /// past the rate and distance thresholds.
    pub fn handle_move(
        &mut self,
        input_enabled: bool,
        pointer: i32,
        abs_x: i32,
        abs_y: i32,
        now: Instant,
    ) -> Vec<Action> {
        if !input_enabled || !self.drag_active || self.drag_pointer != pointer {
            return Vec::new();
        }

        if let Some(last) = self.last_move_at {
            if now.duration_since(last) < MIN_MOVE_INTERVAL {
                return Vec::new();
            }
        }
        if (abs_x - self.last_x).abs() < MIN_MOVE_DELTA
            && (abs_y - self.last_y).abs() < MIN_MOVE_DELTA
        {
            return Vec::new();
        }

        self.last_move_at = Some(now);
        self.last_x = abs_x;
        self.last_y = abs_y;
        vec![Action::Move { x: abs_x, y: abs_y }]
    }

    /// Pointer up: ends the drag with a left-button release.
    pub fn handle_up(&mut self, input_enabled: bool, pointer: i32) -> Vec<Action> {
        if !input_enabled || !self.drag_active || self.drag_pointer != pointer {
            return Vec::new();
        }
        self.drag_active = false;
        vec![Action::LeftUp]
    }
}

/// Click the chat input, then type the text.
pub fn actions_for_type(input_enabled: bool, text: &str, chat_abs: Rect) -> Vec<Action> {
    if !input_enabled || text.is_empty() {
        return Vec::new();
    }
    let (x, y) = mapper::rect_center(chat_abs);
    vec![Action::Click { x, y }, Action::Type(text.to_string())]
}

/// Click the chat input, then press Enter.
pub fn actions_for_enter(input_enabled: bool, chat_abs: Rect) -> Vec<Action> {
    if !input_enabled {
        return Vec::new();
    }
    let (x, y) = mapper::rect_center(chat_abs);
    vec![Action::Click { x, y }, Action::Enter]
}
