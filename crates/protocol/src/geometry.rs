use serde::{Deserialize, Serialize};

/// A rectangle with a top-left origin, in integer pixels.
///
/// Rectangles arrive from the browser with whatever sign the drag gesture
/// produced; [`Rect::normalize`] flips negative sizes by translating the
/// origin so downstream code can assume `w >= 0 && h >= 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    /// Flip negative sizes by moving the origin. Idempotent.
    pub fn normalize(self) -> Self {
        let mut r = self;
        if r.w < 0 {
            r.x += r.w;
            r.w = -r.w;
        }
        if r.h < 0 {
            r.y += r.h;
            r.h = -r.h;
        }
        r
    }

    /// Edge-inclusive point test. Zero-area rectangles contain nothing.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        if self.w <= 0 || self.h <= 0 {
            return false;
        }
        x >= self.x && x <= self.x + self.w && y >= self.y && y <= self.y + self.h
    }

    /// True when the normalized rectangle has positive area.
    pub fn has_area(&self) -> bool {
        let r = self.normalize();
        r.w > 0 && r.h > 0
    }
}

/// A display attached to the host, in virtual-desktop coordinates.
///
/// Monitors are enumerated once at startup in OS order and assigned 1-based
/// indices; the list is immutable for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Monitor {
    pub index: i32,
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub primary: bool,
}

impl Monitor {
    /// Look up a monitor by its 1-based index.
    pub fn by_index(list: &[Monitor], index: i32) -> Option<Monitor> {
        list.iter().find(|m| m.index == index).copied()
    }
}

/// Calibrated rectangles for the streamed application panel.
///
/// `plugin_abs` is in the coordinate space of the monitor named by
/// `monitor_index` (origin at that monitor's top-left). `chat_rel` and
/// `scroll_rel` are offsets relative to `plugin_abs`. The zero value means
/// "nothing calibrated yet".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Calibration {
    pub monitor_index: i32,
    pub plugin_abs: Rect,
    pub chat_rel: Rect,
    pub scroll_rel: Rect,
}

/// Capture mode: full-monitor calibration vs cropped streaming.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Presetup,
    Run,
}

impl Mode {
    /// Parse a wire value; anything that is not `run` behaves as presetup.
    pub fn parse(s: &str) -> Self {
        if s == "run" {
            Mode::Run
        } else {
            Mode::Presetup
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Presetup => "presetup",
            Mode::Run => "run",
        }
    }
}

/// Which video pipeline the viewer is watching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoMode {
    Webrtc,
    #[default]
    Mjpeg,
}

impl VideoMode {
    /// Parse a wire value; unknown values normalize to webrtc.
    pub fn parse(s: &str) -> Self {
        if s == "mjpeg" {
            VideoMode::Mjpeg
        } else {
            VideoMode::Webrtc
        }
    }
}
